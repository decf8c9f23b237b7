//! Demo: download from a public file link or browse a public folder link.
//!
//! Usage:
//!   cargo run --example public -- URL [--out PATH]

mod cli;

use cli::{format_size, init_tracing, usage_and_exit, ArgParser};
use futures::io::AllowStdIo;
use megacore::{LinkKind, PublicFolder, PublicLink};

const USAGE: &str = "Usage: cargo run --example public -- URL [--out PATH]";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let mut parser = ArgParser::new(USAGE);
    let out = parser.take_value(&["--out", "-o"]);
    let [url]: [String; 1] = parser
        .remaining()
        .try_into()
        .unwrap_or_else(|_| usage_and_exit(USAGE));

    match PublicLink::decode(&url)?.kind {
        LinkKind::File => {
            let info = megacore::public::public_file_info(&url).await?;
            println!("{} ({})", info.name, format_size(info.size));
            let target = out.unwrap_or_else(|| info.name.clone());
            let mut file = AllowStdIo::new(std::fs::File::create(&target)?);
            megacore::public::download_public_file(&url, &mut file).await?;
            println!("Saved to {}", target);
        }
        LinkKind::Folder => {
            let folder = PublicFolder::open(&url).await?;
            println!("{}:", folder.root());
            for node in folder.list(folder.root(), true)? {
                println!("  {}  {}", node.display_name(), format_size(node.size));
            }
            if let Some(out) = out {
                std::fs::create_dir_all(&out)?;
                for node in folder.list(folder.root(), false)?.iter().filter(|n| n.is_file()) {
                    let remote = format!("{}/{}", folder.root(), node.display_name());
                    let local = std::path::Path::new(&out).join(node.display_name());
                    folder.download_to_file(&remote, &local).await?;
                    println!("Saved {}", local.display());
                }
            }
        }
    }
    Ok(())
}
