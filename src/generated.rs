//! Plugin protocol types generated from `proto/provider.proto` at build time.

tonic::include_proto!("skiff.provider.v1");
