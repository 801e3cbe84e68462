//! Exposes the command line application.
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use filecache_service::cache::{FileCache, RetrieveOptions};
use filecache_service::caching::LockWait;
use filecache_service::config::Config;
use filecache_service::metrics;
use filecache_service::sources::GenericFile;

use crate::logging;

/// File cache commands.
#[derive(Debug, Subcommand)]
enum Command {
    /// Remove files exceeding the configured age and size limits.
    ///
    /// This is meant to be run by a scheduler, every `prune_interval`.
    Prune,

    /// Remove all cached files which are not currently in use.
    Clear,

    /// Retrieve a file through the cache and print its local path.
    ///
    /// With `--once`, the cached file is usually gone by the time this returns, so its size is
    /// printed instead.
    Get {
        /// The URL of the file, either `http(s)://...` or `<storage>://<path>`.
        url: String,

        /// Delete the cached file again once it has been retrieved.
        #[arg(long)]
        once: bool,

        /// Fail instead of waiting if the file is currently being written.
        #[arg(long)]
        no_wait: bool,
    },

    /// Check whether a file exists at its source and passes the configured limits.
    Exists {
        /// The URL of the file, either `http(s)://...` or `<storage>://<path>`.
        url: String,
    },
}

/// Command line interface parser.
#[derive(Debug, Parser)]
#[command(bin_name = "filecache", version)]
struct Cli {
    /// Path to your configuration file.
    #[arg(long, short, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    /// Returns the path to the configuration file.
    fn config(&self) -> Option<&Path> {
        self.config.as_deref()
    }
}

/// Runs the main application.
pub fn execute() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::get(cli.config()).context("failed loading config")?;

    let _sentry = sentry::init(sentry::ClientOptions {
        dsn: config.sentry_dsn.clone(),
        release: sentry::release_name!(),
        ..Default::default()
    });

    // SAFETY: We are still single-threaded at this point.
    unsafe { logging::init_logging(&config) };
    if let Some(ref statsd) = config.metrics.statsd {
        metrics::configure_statsd(
            &config.metrics.prefix,
            statsd,
            config.metrics.custom_tags.clone(),
        )
        .context("failed to configure statsd")?;
    }

    let cache = FileCache::new(&config).context("failed to create the file cache")?;

    match cli.command {
        Command::Prune => {
            cache.prune().context("failed to prune the cache")?;
        }
        Command::Clear => {
            cache.clear().context("failed to clear the cache")?;
        }
        Command::Get { url, once, no_wait } => {
            let options = RetrieveOptions {
                once,
                lock_wait: if no_wait {
                    LockWait::Fail
                } else {
                    LockWait::Block
                },
            };
            let file = GenericFile::new(url);
            let (path, size) = runtime()?
                .block_on(cache.get_with(&file, options, |_, path| async move {
                    let size = std::fs::metadata(&path).map(|metadata| metadata.len());
                    (path, size)
                }))
                .with_context(|| format!("failed to retrieve `{file}`"))?;
            let size = size.context("failed to read the retrieved file")?;
            println!("{}", retrieved_message(&path, size, once));
        }
        Command::Exists { url } => {
            let file = GenericFile::new(url);
            let exists = runtime()?
                .block_on(cache.exists(&file))
                .with_context(|| format!("failed to check `{file}`"))?;
            println!("{exists}");
            if !exists {
                anyhow::bail!("`{file}` does not exist");
            }
        }
    }

    Ok(())
}

/// What `get` prints for a retrieved file.
fn retrieved_message(path: &Path, size: u64, once: bool) -> String {
    if once {
        format!("{size} bytes retrieved, `{}` was released for removal", path.display())
    } else {
        path.display().to_string()
    }
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to create the async runtime")
}
