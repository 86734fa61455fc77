// Copyright The otap-link Authors
// SPDX-License-Identifier: Apache-2.0

//! Typed column accessors with uniform error reporting.

use crate::error::Error;
use arrow::array::{
    Array, ArrayRef, BinaryArray, BooleanArray, FixedSizeBinaryArray, Float64Array, Int32Array,
    Int64Array, RecordBatch, StringArray, TimestampNanosecondArray, UInt8Array, UInt16Array,
    UInt32Array,
};
use otap_link_protocol::proto::opentelemetry::experimental::arrow::v1::ArrowPayloadType;

fn col<'a>(
    batch: &'a RecordBatch,
    payload: ArrowPayloadType,
    column: &'static str,
) -> Result<&'a ArrayRef, Error> {
    batch
        .column_by_name(column)
        .ok_or(Error::InvalidColumn { payload, column })
}

macro_rules! typed_col {
    ($name:ident, $array:ty) => {
        pub(crate) fn $name<'a>(
            batch: &'a RecordBatch,
            payload: ArrowPayloadType,
            column: &'static str,
        ) -> Result<&'a $array, Error> {
            col(batch, payload, column)?
                .as_any()
                .downcast_ref::<$array>()
                .ok_or(Error::InvalidColumn { payload, column })
        }
    };
}

typed_col!(u8_col, UInt8Array);
typed_col!(u16_col, UInt16Array);
typed_col!(u32_col, UInt32Array);
typed_col!(i32_col, Int32Array);
typed_col!(i64_col, Int64Array);
typed_col!(f64_col, Float64Array);
typed_col!(bool_col, BooleanArray);
typed_col!(str_col, StringArray);
typed_col!(bin_col, BinaryArray);
typed_col!(fsb_col, FixedSizeBinaryArray);
typed_col!(ts_col, TimestampNanosecondArray);

/// Nullable string cell as an owned value.
pub(crate) fn opt_string(array: &StringArray, row: usize) -> String {
    if array.is_null(row) {
        String::new()
    } else {
        array.value(row).to_owned()
    }
}

/// Nullable fixed-size binary cell as an owned byte vector.
pub(crate) fn opt_bytes(array: &FixedSizeBinaryArray, row: usize) -> Vec<u8> {
    if array.is_null(row) {
        Vec::new()
    } else {
        array.value(row).to_vec()
    }
}
