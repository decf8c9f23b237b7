//! Demo: list a folder and show the storage quota.
//!
//! Usage:
//!   cargo run --example ls -- --email EMAIL --password PASSWORD [--path /Root] [--recursive]

mod cli;

use cli::{credentials_from_parser, format_size, init_tracing, usage_and_exit, ArgParser};

const USAGE: &str =
    "Usage: cargo run --example ls -- --email EMAIL --password PASSWORD [--path PATH] [--recursive]";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let mut parser = ArgParser::new(USAGE);
    let creds = credentials_from_parser(&mut parser, USAGE);
    let path = parser.take_value(&["--path"]).unwrap_or_else(|| "/Root".to_string());
    let recursive = parser.take_flag(&["--recursive", "-r"]);
    if !parser.remaining().is_empty() {
        usage_and_exit(USAGE);
    }

    let session = creds.login().await?;
    session.refresh().await?;

    let quota = session.quota().await?;
    println!(
        "Storage: {} / {} ({:.1}% used)",
        format_size(quota.used),
        format_size(quota.total),
        quota.usage_percent()
    );

    println!("\n{}:", path);
    let nodes = session.list(&path, recursive)?;
    if nodes.is_empty() {
        println!("  (empty)");
    }
    for node in nodes {
        let shown = session
            .snapshot()
            .path_of(&node.handle)
            .unwrap_or_else(|| node.display_name().to_string());
        if node.is_file() {
            println!("  {}  {}", shown, format_size(node.size));
        } else {
            println!("  {}/", shown);
        }
    }
    Ok(())
}
