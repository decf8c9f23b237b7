//! Demo: upload a local file, then download it again with progress output.
//!
//! Interrupt the upload and run the demo again to see it continue from the
//! last acknowledged chunk.
//!
//! Usage:
//!   cargo run --example transfer -- --email EMAIL --password PASSWORD [--workers N] LOCAL_FILE REMOTE_FOLDER

mod cli;

use std::path::Path;

use cli::{credentials_from_parser, format_size, init_tracing, usage_and_exit, ArgParser};
use megacore::TransferProgress;

const USAGE: &str = "Usage: cargo run --example transfer -- --email EMAIL --password PASSWORD [--workers N] LOCAL_FILE REMOTE_FOLDER";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let mut parser = ArgParser::new(USAGE);
    let creds = credentials_from_parser(&mut parser, USAGE);
    let workers = parser.take_value(&["--workers"]);
    let [local, remote]: [String; 2] = parser
        .remaining()
        .try_into()
        .unwrap_or_else(|_| usage_and_exit(USAGE));

    let session = creds.login().await?;
    session.refresh().await?;
    if let Some(workers) = workers {
        session.set_workers(workers.parse()?).await?;
    }
    session
        .watch_status(Box::new(|p: &TransferProgress| {
            println!(
                "  {}: {} / {} ({:.1}%)",
                p.name,
                format_size(p.done),
                format_size(p.total),
                p.percent()
            );
            true
        }))
        .await?;

    println!("Uploading {} to {}", local, remote);
    let node = session.upload_file(&local, &remote).await?;
    let remote_path = format!("{}/{}", remote.trim_end_matches('/'), node.display_name());
    println!("Uploaded as {} ({})", remote_path, node.handle);

    let copy = Path::new(&local).with_extension("download");
    println!("Downloading back to {}", copy.display());
    session.download_to_file(&remote_path, &copy).await?;
    println!("Done");
    Ok(())
}
