//! ---
//! vk_section: "01-core-runtime"
//! vk_subsection: "binary"
//! vk_type: "source"
//! vk_scope: "code"
//! vk_description: "Binary entrypoint for the vipkeep daemon."
//! vk_version: "v0.1.0"
//! vk_owner: "tbd"
//! ---
use vergen::EmitBuilder;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    EmitBuilder::builder()
        .idempotent()
        .all_cargo()
        .all_git()
        .emit()?;
    println!("cargo:rerun-if-changed=build.rs");
    Ok(())
}
