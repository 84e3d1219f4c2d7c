//! IMG.LY On-Device Background Removal CLI Tool

#[cfg(feature = "cli")]
use imgly_bgremove_ondevice::cli;

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
