//! Demo: keep a session on disk so later runs skip the login.
//!
//! Usage:
//!   cargo run --example cached_session -- --email EMAIL --password PASSWORD [--proxy PROXY]

mod cli;

use cli::{credentials_from_parser, init_tracing, usage_and_exit, ArgParser};
use megacore::SessionHandle;

const SESSION_FILE: &str = "mega_session.bin";
const USAGE: &str =
    "Usage: cargo run --example cached_session -- --email EMAIL --password PASSWORD [--proxy PROXY]";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let mut parser = ArgParser::new(USAGE);
    let creds = credentials_from_parser(&mut parser, USAGE);
    if !parser.remaining().is_empty() {
        usage_and_exit(USAGE);
    }

    let session = match SessionHandle::load_from_file(SESSION_FILE).await {
        Ok(session) => {
            println!("Loaded cached session ({} nodes)", session.snapshot().len());
            session
        }
        Err(e) => {
            println!("No usable cached session ({}), logging in", e);
            let session = creds.login().await?;
            session.refresh().await?;
            session.save_to_file(SESSION_FILE).await?;
            println!("Session saved to {}", SESSION_FILE);
            session
        }
    };

    let info = session.account_info().await?;
    println!("Account: {}", info.email);
    println!("/Root: {} items", session.list("/Root", false)?.len());
    Ok(())
}
