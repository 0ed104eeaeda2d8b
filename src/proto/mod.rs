//! Protocol Buffer definitions and generated code for the discovery RPC
//! service, created by `tonic-build` from `proto/discovery.proto`.

pub mod discovery {
    tonic::include_proto!("discovery");
}
