//! maskedit command-line tool
//!
//! Generates a selection mask with semantic segmentation and submits prompt
//! driven edits to an image-edit service.

#[cfg(feature = "cli")]
use maskedit::cli;

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::main().await
}

#[cfg(not(feature = "cli"))]
fn main() {
    eprintln!("CLI feature not enabled. Please rebuild with --features cli");
    std::process::exit(1);
}
