//! # Importer
//!
//! Seeds the price board from a JSON dump, e.g. a scrape of flyer prices or
//! an export from another deployment.
//!
//! ## Input
//! A JSON array of price posts (same shape as `POST /prices`), either bare or
//! under a `posts` key. The source is a local path or an `http(s)://` URL.
//!
//! ## Steps
//! 1. Read and parse the whole document.
//! 2. Sanitize text fields, normalize, validate. Invalid entries are logged
//!    and skipped, never fatal.
//! 3. Unless `--dry-run`, connect with the server's config (`REDIS_URL`,
//!    `REDIS_PASSWORD` secret) and insert each post, creating the submitter's
//!    user record and recording ownership like the HTTP insert does.
//!
//! Ids are assigned by the store, so importing the same file twice creates
//! duplicates.
use anyhow::{Context, Error};
use indicatif::{ProgressBar, ProgressStyle};
use posts::{NewPricePost, PriceStore, UserStore};
use reqwest::Client;
use server::{config::Config, database::RedisStore};
use tokio::fs::read_to_string;
use tracing::{info, warn};

pub mod models;
pub mod utils;

use models::{ImportFile, Summary};
use utils::{is_remote, sanitize, sanitize_email};

pub async fn load_posts(source: &str, dry_run: bool) -> Result<Summary, Error> {
    let raw = read_source(source).await?;
    let file: ImportFile =
        serde_json::from_str(&raw).with_context(|| format!("{source} is not a list of posts"))?;

    if dry_run {
        let (_, summary) = prepare(file.into_posts());
        info!("Dry run, nothing written");
        return Ok(summary);
    }

    let config = Config::load()?;
    let store = RedisStore::connect(&config.redis_url)
        .await
        .context("Failed to connect to Redis")?;

    let summary = insert_all(&store, file.into_posts()).await?;

    info!("Inserted: {}", summary.inserted);
    info!("Rejected: {}", summary.rejected);

    Ok(summary)
}

async fn read_source(source: &str) -> Result<String, Error> {
    if is_remote(source) {
        let response = Client::new()
            .get(source)
            .send()
            .await
            .with_context(|| format!("Failed to fetch {source}"))?
            .error_for_status()?;

        #[cfg(feature = "verbose")]
        info!("Status: {}", response.status());

        return Ok(response.text().await?);
    }

    read_to_string(source)
        .await
        .with_context(|| format!("Failed to read {source}"))
}

fn clean(mut post: NewPricePost) -> NewPricePost {
    post.product = sanitize(&post.product);
    post.address = sanitize(&post.address);
    post.by = sanitize_email(&post.by);
    post.normalized()
}

/// Cleans every entry and keeps the ones that validate. Rejects are logged
/// with their position in the input.
pub fn prepare(posts: Vec<NewPricePost>) -> (Vec<NewPricePost>, Summary) {
    let mut summary = Summary::default();
    let mut valid = Vec::new();

    for (index, post) in posts.into_iter().enumerate() {
        summary.read += 1;

        let post = clean(post);
        match post.validate() {
            Ok(()) => valid.push(post),
            Err(e) => {
                warn!(index, "Skipping entry: {e}");
                summary.rejected += 1;
            }
        }
    }

    info!("Read {} entries, {} valid", summary.read, valid.len());
    (valid, summary)
}

/// Inserts raw entries, going through [`prepare`] first so nothing unclean
/// reaches the store.
pub async fn insert_all<S>(store: &S, posts: Vec<NewPricePost>) -> Result<Summary, Error>
where
    S: PriceStore + UserStore,
{
    let (posts, mut summary) = prepare(posts);

    let pb = ProgressBar::new(posts.len() as u64);
    pb.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
        )?
        .progress_chars("=> "),
    );

    for post in posts {
        let email = post.by.clone();
        pb.set_message(post.product.clone());

        store.create(&email).await?;
        let id = store.insert(post).await?;
        store.record_post(&email, id).await?;

        #[cfg(feature = "verbose")]
        info!(id, %email, "Inserted");

        summary.inserted += 1;
        pb.inc(1);
    }

    pb.finish_with_message("Done");
    Ok(summary)
}
