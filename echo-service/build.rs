use std::{env::var, io::Result, path::PathBuf};

fn main() -> Result<()> {
    let proto_files = &["proto/echo.proto"];
    let proto_folder = "proto";
    let out_dir = PathBuf::from(var("OUT_DIR").map_err(std::io::Error::other)?);

    tonic_prost_build::configure()
        .file_descriptor_set_path(out_dir.join("descriptors.bin"))
        .build_client(false)
        .compile_protos(proto_files, &[proto_folder])
}
