// SPDX-License-Identifier: MIT OR Apache-2.0

fn main() {
    tonic_prost_build::configure()
        .build_server(false)
        .build_client(true)
        .compile_protos(&["proto/machine.proto"], &["proto"])
        .expect("failed to compile proto/machine.proto");

    println!("cargo:rerun-if-changed=proto/machine.proto");
}
