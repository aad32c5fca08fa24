//! Generated Rust bindings for the worker control-plane RPC contract
//! (spec §6). The wire schema lives in `proto/cloudai/worker_control.proto`;
//! `tonic_build`'s `include_file` turns it into the module below.

#[allow(clippy::large_enum_variant)]
pub mod proto {
    tonic::include_proto!("mod");

    pub const FILE_DESCRIPTOR_SET: &[u8] = tonic::include_file_descriptor_set!("cloudai");
}
