//! CLI entry point for mirador.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use mirador_core::util::{format_bytes, truncate_path};
use mirador_core::{
    is_non_retail, parse_preferred_languages, rank, Client, CollectionCatalog, Config, CrawlError,
    Crawler, DownloadManager, DownloadStatus, Entry, IndexStore, Preferences,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

mod cli;

use cli::{Args, Command};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (warn)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "warn",
            1 => "debug",
            _ => "trace",
        }
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!(?args, "CLI arguments parsed");

    let config = Config::load().context("loading configuration")?;

    match args.command {
        Command::Ls {
            path,
            name_only,
            limit,
            json,
        } => cmd_ls(&config, &path, name_only, limit, json).await,
        Command::Index {
            collection,
            force,
            workers,
        } => cmd_index(&config, collection, force, workers.into(), args.quiet).await,
        Command::Search {
            query,
            collection,
            limit,
            json,
        } => cmd_search(&query, collection.as_deref(), i64::from(limit), json).await,
        Command::Find {
            query,
            search_path,
            collection,
            prefer_region,
            prefer_language,
            exact,
            limit,
            json,
        } => {
            let prefs = Preferences {
                region: prefer_region,
                languages: parse_preferred_languages(&prefer_language),
            };
            cmd_find(
                &config,
                &query,
                search_path.as_deref(),
                collection.as_deref(),
                &prefs,
                exact,
                limit as usize,
                json,
            )
            .await
        }
        Command::Download {
            targets,
            output,
            search_path,
            prefer_region,
            prefer_language,
            exact,
            include_nonretail,
            all,
            match_limit,
            dry_run,
        } => {
            let opts = DownloadOpts {
                output,
                search_path,
                prefs: Preferences {
                    region: prefer_region,
                    languages: parse_preferred_languages(&prefer_language),
                },
                exact,
                include_nonretail,
                all,
                match_limit: match_limit as usize,
                dry_run,
                quiet: args.quiet,
            };
            cmd_download(&config, targets, opts).await
        }
        Command::Stats { json } => cmd_stats(json).await,
    }
}

async fn cmd_ls(
    config: &Config,
    path: &str,
    name_only: bool,
    limit: Option<usize>,
    json: bool,
) -> Result<()> {
    let client = Client::new(&config.base_url, config.requests_per_second)?;
    let mut entries = client.list_directory(path).await?;
    if let Some(limit) = limit {
        entries.truncate(limit);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }
    for entry in &entries {
        let marker = if entry.is_dir { "/" } else { "" };
        if name_only {
            println!("{}{marker}", entry.name);
        } else {
            println!(
                "{:>10}  {:<17}  {}{marker}",
                entry.size, entry.date, entry.name
            );
        }
    }
    Ok(())
}

async fn cmd_index(
    config: &Config,
    collection: Option<String>,
    force: bool,
    workers: usize,
    quiet: bool,
) -> Result<()> {
    let store = IndexStore::open(&mirador_core::config::db_path()).await?;
    let client = Client::new(&config.base_url, config.requests_per_second)?;

    let mut crawler = Crawler::new(client, store, config.index_stale_days)
        .with_force(force)
        .with_workers(workers)
        .with_catalog(CollectionCatalog::builtin());

    let bar = (!quiet).then(|| {
        let bar = ProgressBar::new_spinner();
        bar.enable_steady_tick(Duration::from_millis(120));
        bar
    });
    if let Some(bar) = bar.clone() {
        crawler = crawler.with_progress_callback(move |p| {
            bar.set_message(format!(
                "{} dirs  {} files  {} errors  {}",
                p.dirs_processed,
                p.files_found,
                p.errors,
                truncate_path(&p.current_path, 60)
            ));
        });
    }
    let crawler = Arc::new(crawler);

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            let _ = tokio::signal::ctrl_c().await;
            warn!("interrupt received, stopping crawl");
            cancel.cancel();
        }
    });

    let result = match collection {
        Some(name) => crawler.crawl_collection(&name, cancel).await,
        None => crawler.crawl_all(cancel).await,
    };
    if let Some(bar) = bar {
        bar.finish_and_clear();
    }

    let progress = crawler.progress();
    println!(
        "{} directories, {} files indexed, {} errors",
        progress.dirs_processed, progress.files_found, progress.errors
    );
    match result {
        Ok(()) => Ok(()),
        Err(CrawlError::Cancelled) => bail!("crawl cancelled"),
        Err(err) => Err(err.into()),
    }
}

async fn cmd_search(
    query: &str,
    collection: Option<&str>,
    limit: i64,
    json: bool,
) -> Result<()> {
    let store = IndexStore::open(&mirador_core::config::db_path()).await?;
    let results = match collection {
        Some(coll) => store.search_in_collection(query, coll, limit).await?,
        None => store.search(query, limit).await?,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }
    for result in &results {
        println!(
            "{:>10}  {:<24}  {}",
            result.size,
            result.collection_name,
            truncate_path(&result.path, 100)
        );
    }
    println!("{} result(s)", results.len());
    Ok(())
}

/// FTS candidate pool size for ranked lookups; ranking trims it down.
const FIND_CANDIDATES: i64 = 500;

/// Collects file entries to rank: a remote listing when a search path is
/// given, otherwise FTS hits from the local index.
async fn ranking_candidates(
    config: &Config,
    query: &str,
    search_path: Option<&str>,
    collection: Option<&str>,
) -> Result<Vec<Entry>> {
    if let Some(path) = search_path {
        let client = Client::new(&config.base_url, config.requests_per_second)?;
        let entries = client.list_directory(path).await?;
        return Ok(entries.into_iter().filter(|e| !e.is_dir).collect());
    }

    let store = IndexStore::open(&mirador_core::config::db_path()).await?;
    let results = match collection {
        Some(coll) => {
            store
                .search_in_collection(query, coll, FIND_CANDIDATES)
                .await?
        }
        None => store.search(query, FIND_CANDIDATES).await?,
    };
    Ok(results
        .into_iter()
        .map(|r| Entry {
            name: r.name,
            url: r.url,
            size: r.size,
            date: r.date,
            is_dir: false,
        })
        .collect())
}

#[allow(clippy::too_many_arguments)]
async fn cmd_find(
    config: &Config,
    query: &str,
    search_path: Option<&str>,
    collection: Option<&str>,
    prefs: &Preferences,
    exact: bool,
    limit: usize,
    json: bool,
) -> Result<()> {
    let candidates = ranking_candidates(config, query, search_path, collection).await?;
    let mut ranked = rank(&candidates, query, prefs, exact);
    ranked.truncate(limit);

    if json {
        println!("{}", serde_json::to_string_pretty(&ranked)?);
        return Ok(());
    }
    for entry in &ranked {
        println!("{:>10}  {}", entry.size, entry.name);
        println!("            {}", entry.url);
    }
    println!("{} match(es)", ranked.len());
    Ok(())
}

struct DownloadOpts {
    output: Option<PathBuf>,
    search_path: Option<String>,
    prefs: Preferences,
    exact: bool,
    include_nonretail: bool,
    all: bool,
    match_limit: usize,
    dry_run: bool,
    quiet: bool,
}

async fn cmd_download(config: &Config, targets: Vec<String>, opts: DownloadOpts) -> Result<()> {
    let out_dir = opts
        .output
        .clone()
        .unwrap_or_else(|| config.download_dir.clone());

    // Direct URL mode only when every target is an absolute URL;
    // otherwise the targets together form one search query.
    let url_mode = targets
        .iter()
        .all(|t| t.starts_with("http://") || t.starts_with("https://"));

    let picked: Vec<(String, String)> = if url_mode {
        let mut picked = Vec::new();
        for url in &targets {
            match file_name_from_url(url) {
                Ok(name) => picked.push((name, url.clone())),
                Err(err) => warn!(url = %url, error = %err, "skipping"),
            }
        }
        picked
    } else {
        let query = targets.join(" ");
        let candidates =
            ranking_candidates(config, &query, opts.search_path.as_deref(), None).await?;
        let mut matches = rank(&candidates, &query, &opts.prefs, opts.exact);
        if !opts.include_nonretail {
            matches.retain(|e| !is_non_retail(&e.name));
        }
        matches.truncate(opts.match_limit);
        if matches.is_empty() {
            bail!("no match for query: {query}");
        }
        if !opts.all {
            matches.truncate(1);
        }
        matches.into_iter().map(|e| (e.name, e.url)).collect()
    };

    if picked.is_empty() {
        bail!("nothing to download");
    }
    if opts.dry_run {
        for (name, url) in &picked {
            println!("{name}\n            {url}");
        }
        println!(
            "{} file(s) would be downloaded to {}",
            picked.len(),
            out_dir.display()
        );
        return Ok(());
    }

    let client = Client::new(&config.base_url, config.requests_per_second)?;
    let manager = Arc::new(DownloadManager::new(
        client,
        config.max_concurrent_downloads,
    ));
    for (name, url) in &picked {
        match manager.enqueue(name, url, out_dir.join(name)) {
            Ok((_, true)) => {}
            Ok((item, false)) => debug!(id = item.id, "already queued"),
            Err(err) => warn!(url = %url, error = %err, "skipping"),
        }
    }
    if manager.items().is_empty() {
        bail!("nothing to download");
    }

    let multi = (!opts.quiet).then(MultiProgress::new);
    let style = ProgressStyle::with_template(
        "{msg:<44} {bytes:>10} / {total_bytes:<10} {bytes_per_sec:>12} {bar:24}",
    )?;

    let mut bars: HashMap<u64, ProgressBar> = HashMap::new();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                warn!("interrupt received, cancelling downloads");
                manager.cancel_all();
            }
            () = tokio::time::sleep(Duration::from_millis(150)) => {}
        }

        if let Some(multi) = &multi {
            for item in manager.items() {
                let bar = bars.entry(item.id).or_insert_with(|| {
                    let bar = multi.add(ProgressBar::new(0));
                    bar.set_style(style.clone());
                    bar.set_message(truncate_path(&item.name, 44));
                    bar
                });
                bar.set_length(item.total_bytes());
                bar.set_position(item.done_bytes());
                if item.status().is_terminal() && !bar.is_finished() {
                    bar.abandon();
                }
            }
        }

        if !manager.has_active() {
            break;
        }
    }

    let items = manager.items();
    let completed = items
        .iter()
        .filter(|i| i.status() == DownloadStatus::Completed)
        .count();
    let downloaded: u64 = items.iter().map(|i| i.done_bytes()).sum();
    let failed: Vec<_> = items
        .iter()
        .filter(|i| i.status() == DownloadStatus::Failed)
        .collect();

    println!(
        "{completed} of {} downloaded ({})",
        items.len(),
        format_bytes(downloaded)
    );
    for item in &failed {
        let reason = item
            .error()
            .map_or_else(|| "unknown error".to_string(), |e| e.to_string());
        eprintln!("failed: {} ({reason})", item.name);
    }
    if !failed.is_empty() {
        bail!("{} download(s) failed", failed.len());
    }
    Ok(())
}

async fn cmd_stats(json: bool) -> Result<()> {
    let store = IndexStore::open(&mirador_core::config::db_path()).await?;
    let stats = store.stats().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }
    println!("collections: {}", stats.collections);
    println!("directories: {}", stats.directories);
    println!("files:       {}", stats.files);
    Ok(())
}

/// Derives a local file name from the last path segment of a file URL.
fn file_name_from_url(raw: &str) -> Result<String> {
    let url = url::Url::parse(raw).with_context(|| format!("invalid URL: {raw}"))?;
    let name = url
        .path_segments()
        .and_then(|mut s| s.next_back())
        .unwrap_or("");
    if name.is_empty() {
        bail!("URL has no file name: {raw}");
    }
    let decoded = urlencoding::decode(name)
        .map(std::borrow::Cow::into_owned)
        .unwrap_or_else(|_| name.to_string());
    Ok(decoded)
}
