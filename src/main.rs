mod cache;
mod config;
mod controller;
mod event;
mod fallback;
mod host;
mod http;
mod message;
mod network;
mod route;
mod sync;
#[cfg(test)]
mod testing;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use url::Url;

use crate::cache::{CacheResult, CacheStorage, SqliteStorage};
use crate::controller::OfflineController;
use crate::host::ServiceHost;
use crate::http::{Destination, Request, Response};
use crate::message::ClientMessage;
use crate::network::HttpNetwork;

#[derive(Parser, Debug)]
#[command(name = "wildcache")]
#[command(about = "Offline cache controller for the Wildlife Incident Reporter")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/wildcache/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Origin to serve, overriding the config file
  #[arg(long, global = true)]
  origin: Option<Url>,

  /// Cache version to use, overriding the config file
  #[arg(long, global = true)]
  cache_version: Option<String>,

  /// Cache database path, overriding the config file
  #[arg(long, global = true)]
  db: Option<PathBuf>,

  /// Keep the cache in memory for this run only
  #[arg(long, global = true, conflicts_with = "db")]
  ephemeral: bool,

  /// Write logs to this file instead of stderr
  #[arg(long, global = true)]
  log_file: Option<PathBuf>,

  /// Enable debug logging
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Install the current version: precache, then activate
  Install,
  /// Delete cache stores left behind by other versions
  Activate,
  /// Request a path through the controller and print the response
  Fetch {
    /// Path or URL to request
    path: String,
    /// Treat the request as a full page load
    #[arg(long)]
    navigate: bool,
    /// Expected use of the response
    #[arg(long, value_enum, default_value_t = Destination::Other)]
    destination: Destination,
    /// HTTP method
    #[arg(long, default_value = "GET")]
    method: reqwest::Method,
  },
  /// Cache a list of URLs on demand
  CacheUrls {
    #[arg(required = true)]
    urls: Vec<String>,
  },
  /// Fire a background sync
  Sync {
    #[arg(long, default_value = sync::SYNC_INCIDENTS_TAG)]
    tag: String,
  },
  /// List cache stores and their entries
  Stores,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _guard = init_tracing(args.verbose, args.log_file.as_deref())?;

  // Load configuration
  let mut config = config::Config::load(args.config.as_deref())?;

  // Command line overrides
  if let Some(origin) = args.origin {
    config.origin = origin;
  }
  if let Some(version) = args.cache_version {
    config.cache_version = version;
  }
  if let Some(db) = args.db {
    config.storage.path = Some(db);
  }

  let storage = Arc::new(if args.ephemeral {
    SqliteStorage::in_memory()?
  } else {
    match &config.storage.path {
      Some(path) => SqliteStorage::open_at(path)?,
      None => SqliteStorage::open_default()?,
    }
  });
  let scope = config.storage_scope();
  let network = Arc::new(HttpNetwork::new()?);
  let controller = OfflineController::new(config, Arc::clone(&storage), network)?;

  match args.command {
    Command::Install => {
      let host = ServiceHost::new(controller);
      let outcome = host.register().await?;
      print_json(&outcome)?;
    }
    Command::Activate => {
      let outcome = controller.activate().await?;
      print_json(&outcome)?;
    }
    Command::Fetch {
      path,
      navigate,
      destination,
      method,
    } => {
      let url = controller.config().resolve(&path)?;
      let request = if navigate {
        Request::navigate(url)
      } else {
        Request::get(url).with_destination(destination)
      }
      .with_method(method);

      let host = ServiceHost::resume(controller);
      let result = host.fetch(request).await?;
      print_response(&result);
    }
    Command::CacheUrls { urls } => {
      let host = ServiceHost::resume(controller);
      let mut page = host.open_client()?;
      debug!(page = page.id(), "Posting CACHE_URLS");
      host.post_message(ClientMessage::CacheUrls { urls }).await?;
      let notification = page
        .recv()
        .await
        .ok_or_else(|| eyre!("Page closed before caching completed"))?;
      print_json(&notification)?;
    }
    Command::Sync { tag } => {
      let host = ServiceHost::resume(controller);
      let outcome = host.sync(&tag).await?;
      print_json(&outcome)?;
    }
    Command::Stores => {
      for name in storage.keys(&scope)? {
        let entries = storage.entries(&scope, &name)?;
        println!("{} ({} entries)", name, entries.len());
        for key in entries {
          println!("  {}", key);
        }
      }
    }
  }

  Ok(())
}

/// Log to stderr, or to `log_file` through a non-blocking writer.
///
/// The returned guard must be held until exit so buffered lines are flushed.
fn init_tracing(verbose: bool, log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
  let default = if verbose { "wildcache=debug" } else { "wildcache=info" };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

  match log_file {
    Some(path) => {
      let file_name = path
        .file_name()
        .ok_or_else(|| eyre!("Invalid log file path: {}", path.display()))?;
      let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

      let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));
      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();
      Ok(Some(guard))
    }
    None => {
      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
      Ok(None)
    }
  }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
  let json =
    serde_json::to_string_pretty(value).map_err(|e| eyre!("Failed to serialize output: {}", e))?;
  println!("{}", json);
  Ok(())
}

fn print_response(result: &CacheResult<Response>) {
  let response = &result.data;
  match result.cached_at {
    Some(at) => println!("{} ({:?}, cached {})", response.status, result.source, at),
    None => println!("{} ({:?})", response.status, result.source),
  }
  for (name, value) in &response.headers {
    println!("{}: {}", name, value);
  }
  println!();
  println!("{}", response.text());
}
