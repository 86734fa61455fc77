// Copyright The otap-link Authors
// SPDX-License-Identifier: Apache-2.0

//! Attribute payloads: typed value columns keyed by parent id.
//!
//! Scalar values land in their own column; arrays and kvlists are
//! CBOR-serialized into the `ser` column so the schema stays flat.

use crate::arrays::{bin_col, bool_col, f64_col, i64_col, str_col, u8_col, u16_col};
use crate::error::Error;
use crate::schema::{ValueType, consts};
use arrow::array::{
    Array, ArrayRef, BinaryBuilder, BooleanBuilder, Float64Builder, Int64Builder, RecordBatch,
    StringBuilder, UInt8Builder, UInt16Builder,
};
use arrow::datatypes::{DataType, Field, Schema};
use ciborium::value::Value as CborValue;
use opentelemetry_proto::tonic::common::v1::any_value::Value;
use opentelemetry_proto::tonic::common::v1::{AnyValue, ArrayValue, KeyValue, KeyValueList};
use otap_link_protocol::proto::opentelemetry::experimental::arrow::v1::ArrowPayloadType;
use std::collections::HashMap;
use std::sync::Arc;

fn to_cbor(value: &AnyValue) -> CborValue {
    match &value.value {
        None => CborValue::Null,
        Some(Value::StringValue(s)) => CborValue::Text(s.clone()),
        Some(Value::BoolValue(b)) => CborValue::Bool(*b),
        Some(Value::IntValue(i)) => CborValue::Integer((*i).into()),
        Some(Value::DoubleValue(d)) => CborValue::Float(*d),
        Some(Value::BytesValue(b)) => CborValue::Bytes(b.clone()),
        Some(Value::ArrayValue(array)) => {
            CborValue::Array(array.values.iter().map(to_cbor).collect())
        }
        Some(Value::KvlistValue(kvlist)) => CborValue::Map(
            kvlist
                .values
                .iter()
                .map(|kv| {
                    let v = kv
                        .value
                        .as_ref()
                        .map(to_cbor)
                        .unwrap_or(CborValue::Null);
                    (CborValue::Text(kv.key.clone()), v)
                })
                .collect(),
        ),
    }
}

fn from_cbor(value: CborValue) -> Result<AnyValue, Error> {
    let inner = match value {
        CborValue::Null => None,
        CborValue::Text(s) => Some(Value::StringValue(s)),
        CborValue::Bool(b) => Some(Value::BoolValue(b)),
        CborValue::Integer(i) => Some(Value::IntValue(i64::try_from(i).map_err(|_| {
            Error::MalformedSerializedValue("integer out of range".into())
        })?)),
        CborValue::Float(f) => Some(Value::DoubleValue(f)),
        CborValue::Bytes(b) => Some(Value::BytesValue(b)),
        CborValue::Array(values) => Some(Value::ArrayValue(ArrayValue {
            values: values
                .into_iter()
                .map(from_cbor)
                .collect::<Result<_, _>>()?,
        })),
        CborValue::Map(entries) => Some(Value::KvlistValue(KeyValueList {
            values: entries
                .into_iter()
                .map(|(k, v)| {
                    let key = match k {
                        CborValue::Text(key) => key,
                        other => {
                            return Err(Error::MalformedSerializedValue(format!(
                                "non-text map key: {other:?}"
                            )));
                        }
                    };
                    Ok(KeyValue {
                        key,
                        value: Some(from_cbor(v)?),
                    })
                })
                .collect::<Result<_, _>>()?,
        })),
        other => {
            return Err(Error::MalformedSerializedValue(format!(
                "unexpected cbor value: {other:?}"
            )));
        }
    };
    Ok(AnyValue { value: inner })
}

pub(crate) fn serialize_value(value: &AnyValue) -> Result<Vec<u8>, Error> {
    let mut buf = Vec::new();
    ciborium::ser::into_writer(&to_cbor(value), &mut buf)
        .map_err(|e| Error::MalformedSerializedValue(e.to_string()))?;
    Ok(buf)
}

pub(crate) fn deserialize_value(bytes: &[u8]) -> Result<AnyValue, Error> {
    let value: CborValue = ciborium::de::from_reader(bytes)
        .map_err(|e| Error::MalformedSerializedValue(e.to_string()))?;
    from_cbor(value)
}

/// The typed-column split of one [`AnyValue`], shared between attribute rows,
/// log bodies, and (for symmetry) anything else that stores a scalar-or-ser
/// value.
pub(crate) struct ValueColumns {
    pub value_type: ValueType,
    pub str: Option<String>,
    pub int: Option<i64>,
    pub double: Option<f64>,
    pub bool: Option<bool>,
    pub bytes: Option<Vec<u8>>,
    pub ser: Option<Vec<u8>>,
}

impl ValueColumns {
    pub(crate) fn split(value: Option<&AnyValue>) -> Result<ValueColumns, Error> {
        let mut out = ValueColumns {
            value_type: ValueType::Empty,
            str: None,
            int: None,
            double: None,
            bool: None,
            bytes: None,
            ser: None,
        };
        let Some(value) = value else {
            return Ok(out);
        };
        match &value.value {
            None => {}
            Some(Value::StringValue(s)) => {
                out.value_type = ValueType::Str;
                out.str = Some(s.clone());
            }
            Some(Value::IntValue(i)) => {
                out.value_type = ValueType::Int;
                out.int = Some(*i);
            }
            Some(Value::DoubleValue(d)) => {
                out.value_type = ValueType::Double;
                out.double = Some(*d);
            }
            Some(Value::BoolValue(b)) => {
                out.value_type = ValueType::Bool;
                out.bool = Some(*b);
            }
            Some(Value::BytesValue(b)) => {
                out.value_type = ValueType::Bytes;
                out.bytes = Some(b.clone());
            }
            Some(Value::ArrayValue(_) | Value::KvlistValue(_)) => {
                out.value_type = ValueType::Ser;
                out.ser = Some(serialize_value(value)?);
            }
        }
        Ok(out)
    }

    pub(crate) fn join(self) -> Result<Option<AnyValue>, Error> {
        let inner = match self.value_type {
            ValueType::Empty => return Ok(None),
            ValueType::Str => Value::StringValue(self.str.unwrap_or_default()),
            ValueType::Int => Value::IntValue(self.int.unwrap_or_default()),
            ValueType::Double => Value::DoubleValue(self.double.unwrap_or_default()),
            ValueType::Bool => Value::BoolValue(self.bool.unwrap_or_default()),
            ValueType::Bytes => Value::BytesValue(self.bytes.unwrap_or_default()),
            ValueType::Ser => {
                return Ok(Some(deserialize_value(&self.ser.unwrap_or_default())?));
            }
        };
        Ok(Some(AnyValue { value: Some(inner) }))
    }
}

/// Builds one attribute payload record.
pub(crate) struct AttrsBuilder {
    parent_id: UInt16Builder,
    key: StringBuilder,
    value_type: UInt8Builder,
    str: StringBuilder,
    int: Int64Builder,
    double: Float64Builder,
    bool: BooleanBuilder,
    bytes: BinaryBuilder,
    ser: BinaryBuilder,
    rows: usize,
}

impl AttrsBuilder {
    pub(crate) fn new() -> Self {
        Self {
            parent_id: UInt16Builder::new(),
            key: StringBuilder::new(),
            value_type: UInt8Builder::new(),
            str: StringBuilder::new(),
            int: Int64Builder::new(),
            double: Float64Builder::new(),
            bool: BooleanBuilder::new(),
            bytes: BinaryBuilder::new(),
            ser: BinaryBuilder::new(),
            rows: 0,
        }
    }

    pub(crate) fn append_all(&mut self, parent_id: u16, attrs: &[KeyValue]) -> Result<(), Error> {
        for kv in attrs {
            self.append(parent_id, kv)?;
        }
        Ok(())
    }

    pub(crate) fn append(&mut self, parent_id: u16, kv: &KeyValue) -> Result<(), Error> {
        let cols = ValueColumns::split(kv.value.as_ref())?;
        self.parent_id.append_value(parent_id);
        self.key.append_value(&kv.key);
        self.value_type.append_value(cols.value_type as u8);
        self.str.append_option(cols.str.as_deref());
        self.int.append_option(cols.int);
        self.double.append_option(cols.double);
        self.bool.append_option(cols.bool);
        self.bytes.append_option(cols.bytes.as_deref());
        self.ser.append_option(cols.ser.as_deref());
        self.rows += 1;
        Ok(())
    }

    /// Finish into a record batch, `None` when no attribute was appended.
    pub(crate) fn finish(mut self) -> Result<Option<RecordBatch>, Error> {
        if self.rows == 0 {
            return Ok(None);
        }
        let schema = Arc::new(Schema::new(vec![
            Field::new(consts::PARENT_ID, DataType::UInt16, false),
            Field::new(consts::ATTR_KEY, DataType::Utf8, false),
            Field::new(consts::VALUE_TYPE, DataType::UInt8, false),
            Field::new(consts::ATTR_STR, DataType::Utf8, true),
            Field::new(consts::ATTR_INT, DataType::Int64, true),
            Field::new(consts::ATTR_DOUBLE, DataType::Float64, true),
            Field::new(consts::ATTR_BOOL, DataType::Boolean, true),
            Field::new(consts::ATTR_BYTES, DataType::Binary, true),
            Field::new(consts::ATTR_SER, DataType::Binary, true),
        ]));
        let columns: Vec<ArrayRef> = vec![
            Arc::new(self.parent_id.finish()),
            Arc::new(self.key.finish()),
            Arc::new(self.value_type.finish()),
            Arc::new(self.str.finish()),
            Arc::new(self.int.finish()),
            Arc::new(self.double.finish()),
            Arc::new(self.bool.finish()),
            Arc::new(self.bytes.finish()),
            Arc::new(self.ser.finish()),
        ];
        Ok(Some(RecordBatch::try_new(schema, columns)?))
    }
}

/// Decode one attribute payload into per-parent attribute lists, preserving
/// row order within each parent.
pub(crate) fn collect_attrs(
    batch: Option<&RecordBatch>,
    payload: ArrowPayloadType,
) -> Result<HashMap<u16, Vec<KeyValue>>, Error> {
    let mut out: HashMap<u16, Vec<KeyValue>> = HashMap::new();
    let Some(batch) = batch else {
        return Ok(out);
    };
    let parent_ids = u16_col(batch, payload, consts::PARENT_ID)?;
    let keys = str_col(batch, payload, consts::ATTR_KEY)?;
    let value_types = u8_col(batch, payload, consts::VALUE_TYPE)?;
    let strs = str_col(batch, payload, consts::ATTR_STR)?;
    let ints = i64_col(batch, payload, consts::ATTR_INT)?;
    let doubles = f64_col(batch, payload, consts::ATTR_DOUBLE)?;
    let bools = bool_col(batch, payload, consts::ATTR_BOOL)?;
    let bytes = bin_col(batch, payload, consts::ATTR_BYTES)?;
    let sers = bin_col(batch, payload, consts::ATTR_SER)?;

    for row in 0..batch.num_rows() {
        let cols = ValueColumns {
            value_type: ValueType::from_u8(value_types.value(row)),
            str: (!strs.is_null(row)).then(|| strs.value(row).to_owned()),
            int: (!ints.is_null(row)).then(|| ints.value(row)),
            double: (!doubles.is_null(row)).then(|| doubles.value(row)),
            bool: (!bools.is_null(row)).then(|| bools.value(row)),
            bytes: (!bytes.is_null(row)).then(|| bytes.value(row).to_vec()),
            ser: (!sers.is_null(row)).then(|| sers.value(row).to_vec()),
        };
        out.entry(parent_ids.value(row)).or_default().push(KeyValue {
            key: keys.value(row).to_owned(),
            value: cols.join()?,
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn any_str(s: &str) -> AnyValue {
        AnyValue {
            value: Some(Value::StringValue(s.into())),
        }
    }

    #[test]
    fn nested_values_roundtrip_through_cbor() {
        let value = AnyValue {
            value: Some(Value::KvlistValue(KeyValueList {
                values: vec![
                    KeyValue {
                        key: "list".into(),
                        value: Some(AnyValue {
                            value: Some(Value::ArrayValue(ArrayValue {
                                values: vec![
                                    any_str("a"),
                                    AnyValue {
                                        value: Some(Value::IntValue(7)),
                                    },
                                    AnyValue {
                                        value: Some(Value::DoubleValue(0.5)),
                                    },
                                ],
                            })),
                        }),
                    },
                    KeyValue {
                        key: "none".into(),
                        value: None,
                    },
                ],
            })),
        };
        let bytes = serialize_value(&value).expect("serialize");
        let restored = deserialize_value(&bytes).expect("deserialize");
        // A `None` kvlist entry value canonicalizes to an empty AnyValue.
        let AnyValue {
            value: Some(Value::KvlistValue(kvlist)),
        } = restored
        else {
            panic!("expected kvlist");
        };
        assert_eq!(kvlist.values[0].key, "list");
        assert_eq!(
            kvlist.values[0].value,
            value
                .value
                .as_ref()
                .map(|v| match v {
                    Value::KvlistValue(kl) => kl.values[0].value.clone().expect("value"),
                    _ => unreachable!(),
                })
        );
        assert_eq!(
            kvlist.values[1].value,
            Some(AnyValue { value: None })
        );
    }

    #[test]
    fn attr_batch_roundtrip() {
        let attrs = vec![
            KeyValue {
                key: "service.name".into(),
                value: Some(any_str("checkout")),
            },
            KeyValue {
                key: "retries".into(),
                value: Some(AnyValue {
                    value: Some(Value::IntValue(3)),
                }),
            },
            KeyValue {
                key: "sampled".into(),
                value: Some(AnyValue {
                    value: Some(Value::BoolValue(true)),
                }),
            },
        ];
        let mut builder = AttrsBuilder::new();
        builder.append_all(4, &attrs).expect("append");
        let batch = builder.finish().expect("finish").expect("non-empty");
        let decoded =
            collect_attrs(Some(&batch), ArrowPayloadType::SpanAttrs).expect("collect");
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[&4], attrs);
    }

    #[test]
    fn empty_builder_produces_no_payload() {
        let builder = AttrsBuilder::new();
        assert!(builder.finish().expect("finish").is_none());
    }
}
