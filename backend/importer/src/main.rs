use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt};

/// Bulk-load price posts into the Redis store.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path or http(s) URL of a JSON array of price posts
    source: String,

    /// Validate and report without writing anything
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let args = Args::parse();

    importer::load_posts(&args.source, args.dry_run).await?;
    Ok(())
}
