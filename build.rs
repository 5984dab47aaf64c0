//! Build script for proto compilation.
//!
//! The plugin protocol types are generated from `proto/provider.proto` into
//! `OUT_DIR` on every build and included via `src/generated.rs`.

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Ensure a protoc binary is available even when the system package is
    // missing, by falling back to the vendored build-dependency.
    if std::env::var_os("PROTOC").is_none() {
        if let Ok(protoc) = protoc_bin_vendored::protoc_bin_path() {
            std::env::set_var("PROTOC", protoc);
        }
    }

    tonic_prost_build::configure().compile_protos(&["proto/provider.proto"], &["proto"])?;

    println!("cargo:rerun-if-changed=proto/provider.proto");

    Ok(())
}
