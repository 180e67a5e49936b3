// =============================================================================
// Build script (GTFS-Realtime proto)
// =============================================================================
// The GTFS-Realtime types are hand-defined in src/gtfs.rs for faster iteration.
// Switch to compiling the upstream gtfs-realtime.proto here if the schema
// needs to track a newer transit-realtime release.
// =============================================================================

fn main() {
    // Uncomment to compile the upstream schema instead of the hand-defined types:
    // prost_build::compile_protos(&["proto/gtfs_realtime.proto"], &["proto/"])
    //     .expect("failed to compile GTFS-Realtime protobuf definitions");
    println!("cargo:rerun-if-changed=proto/gtfs_realtime.proto");
}
