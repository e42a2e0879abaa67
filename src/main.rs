use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use rrcl::cache::base_name;
use rrcl::{
  CacheStore, Config, HttpTransport, Lifecycle, MemoryStore, Partition, RequestDescriptor,
  ResourceClass, SqliteStore,
};

#[derive(Parser, Debug)]
#[command(name = "rrcl")]
#[command(about = "Resolve requests through network, versioned store and offline fallback")]
#[command(version)]
struct Args {
  /// Path to config file (default: ./rrcl.yaml or $XDG_CONFIG_HOME/rrcl/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Override the version generation embedded in partition names
  #[arg(short, long, global = true)]
  generation: Option<u64>,

  /// SQLite store location (default: $XDG_DATA_HOME/rrcl/store.db)
  #[arg(long, global = true, conflicts_with = "ephemeral")]
  store: Option<PathBuf>,

  /// Keep everything in memory for this run
  #[arg(long, global = true)]
  ephemeral: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Resolve one request and print the body to stdout
  Fetch {
    url: String,

    /// Resource class (document, api, static-asset, other); derived from the url if omitted
    #[arg(long)]
    class: Option<ResourceClass>,

    #[arg(short = 'X', long, default_value = "GET")]
    method: String,

    /// Request header as `name: value`
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,

    /// Print resolution counters to stderr afterwards
    #[arg(long)]
    stats: bool,
  },
  /// Provision partitions for the current generation
  Install,
  /// Provision the current generation and prune older ones
  Activate,
  /// Shut down, optionally deleting the current generation's partitions
  Retire {
    #[arg(long)]
    reset: bool,
  },
  /// List partitions in the store
  Partitions,
  /// Delete expired entries from every partition with a max age
  Sweep,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let (writer, _guard) = tracing_appender::non_blocking(std::io::stderr());
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("rrcl=info")),
    )
    .with_writer(writer)
    .with_target(false)
    .init();

  let args = Args::parse();

  // Load configuration
  let mut config = Config::load(args.config.as_deref())?;

  // Override generation if specified on command line
  if let Some(generation) = args.generation {
    config.generation = generation;
    config.validate()?;
  }

  if args.ephemeral {
    return run(args.command, config, Arc::new(MemoryStore::new())).await;
  }

  let store = match args.store.as_deref().or(config.store.path.as_deref()) {
    Some(path) => SqliteStore::open_at(path)?,
    None => SqliteStore::open_default()?,
  };
  run(args.command, config, Arc::new(store)).await
}

async fn run<S: CacheStore + 'static>(command: Command, config: Config, store: Arc<S>) -> Result<()> {
  let config = Arc::new(config);
  let mut lifecycle = Lifecycle::new(Arc::clone(&config), Arc::clone(&store));

  match command {
    Command::Fetch {
      url,
      class,
      method,
      headers,
      stats,
    } => {
      lifecycle.install()?;
      let router = lifecycle.router(Arc::new(HttpTransport::new(&config.network)?))?;

      let mut descriptor = RequestDescriptor::new(url, method);
      if let Some(class) = class {
        descriptor = descriptor.with_class(class);
      }
      for header in headers {
        let (name, value) = header
          .split_once(':')
          .ok_or_else(|| eyre!("Invalid header '{}', expected 'name: value'", header))?;
        descriptor = descriptor.with_header(name.trim(), value.trim());
      }

      let resolved = router.route(&descriptor).await;
      eprintln!("{} ({:?})", resolved.status(), resolved.source);
      std::io::stdout().write_all(resolved.body())?;

      if stats {
        eprintln!("{}", serde_json::to_string_pretty(&router.stats())?);
      }
    }
    Command::Install => {
      lifecycle.install()?;
      for partition in lifecycle.partitions() {
        println!("{}", partition.name());
      }
    }
    Command::Activate => {
      let report = lifecycle.activate()?;
      for name in &report.pruned {
        println!("pruned {}", name);
      }
      for name in &report.failed {
        println!("failed {}", name);
      }
    }
    Command::Retire { reset } => {
      lifecycle.install()?;
      for name in lifecycle.retire(reset)? {
        println!("deleted {}", name);
      }
    }
    Command::Partitions => {
      for name in store.list_partitions()? {
        let partition = Partition::named(name.as_str());
        let generation = match partition.version() {
          Some(version) if version == config.generation => format!("v{} (current)", version),
          Some(version) => format!("v{}", version),
          None => "unversioned".to_string(),
        };
        println!("{}\t{}\t{}", name, base_name(&name), generation);
      }
    }
    Command::Sweep => {
      lifecycle.install()?;
      println!("{}", lifecycle.sweep()?);
    }
  }

  Ok(())
}
