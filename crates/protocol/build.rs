// Copyright The otap-link Authors
// SPDX-License-Identifier: Apache-2.0

//! A build script for the Arrow stream service message definitions.

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // The message structs are vendored in `src/proto` to avoid depending
    // on protoc at build time (the service plumbing is hand-written on top
    // of `tonic::client::Grpc` / `tonic::server::Grpc`, see `src/client.rs`
    // and `src/server.rs`).
    //
    // To regenerate the messages from the proto file:
    // - Uncomment the following lines.
    // - Run `cargo build` to regenerate.
    // - Comment the following lines.
    // - Commit the changes.
    // prost_build::Config::new()
    //     .out_dir("src/proto")
    //     .compile_protos(
    //         &["proto/opentelemetry/proto/experimental/arrow/v1/arrow_service.proto"],
    //         &["proto"],
    //     )?;
    Ok(())
}
