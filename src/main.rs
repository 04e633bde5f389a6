// src/main.rs

mod analyzer;
mod cli;
mod compressor;
mod discovery;
mod error;
mod hosting;
mod model;
mod sbom;
mod storage;

use anyhow::Context;
use clap::Parser;
use cli::{ActionConfig, Args};
use discovery::FsLister;
use hosting::{Aggregator, GitHubApi, ThreadSleeper};
use std::time::Instant;
use storage::{RecordFormat, S3Broker};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);
    let start_time = Instant::now();

    let config = ActionConfig::from_blob(&args.config).context("reading --config")?;
    let (owner, name) = config.owner_and_name()?;
    info!(owner, repo = name, branch = %config.branch, "collecting repository metadata");

    let manifests = discovery::build_manifests(&FsLister, &config.path);
    info!(count = manifests.len(), files = ?manifests, "build manifests in scope");

    let handle = analyzer::RepoHandle::open(&config.path, &config.branch)
        .with_context(|| format!("opening repository at {}", config.path.display()))?;
    let api = GitHubApi::new(&config.api_url, args.token.as_deref()).context("building hosting API client")?;
    let hosting = Aggregator::new(api, owner, config.retry_policy(), ThreadSleeper);

    let now = chrono::Utc::now();
    let metadata = analyzer::repo_metadata(&handle, &hosting, name, now).context("reading repository metadata")?;
    info!(age = metadata.age, commit_rate = metadata.commit_rate, branch = handle.branch(), "analyzed history");

    let languages = hosting.languages(name).context("reading repository languages")?;
    let packages = sbom::collect(&FsLister, &config.path, config.sbom_file.as_deref()).context("reading SBOM")?;
    let record = compressor::compress(name, metadata, languages, &packages);
    info!(packages = record.packages.len(), languages = record.languages.len(), "record ready");

    match config.upload_target() {
        Some(target) if !args.dry_run => {
            let broker = S3Broker::new(config.region.as_deref(), config.endpoint_url.as_deref())?;
            let key = storage::load_to_s3(&broker, name, &record, &target, RecordFormat::Json, now)
                .with_context(|| format!("uploading record to {}", target.bucket))?;
            println!("s3://{}/{}", target.bucket, key);
        }
        _ => println!("{}", serde_json::to_string_pretty(&record)?),
    }

    info!("Total time: {:.2?}", start_time.elapsed());
    Ok(())
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    // Log to stderr so stdout carries only the record or its key
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}
