//! strata server binary.
//!
//! Reads `config.toml` (or the path given with `--config`), applies
//! `STRATA_*` environment overrides, opens the SQLite store and serves the
//! REST API over HTTP.
//!
//! # Password hash generation
//!
//! To generate the argon2 PHC string for an `[[operators]]` entry:
//!
//! ```
//! cargo run -p strata-server -- hash-password
//! ```

use std::{path::PathBuf, sync::Arc};

use anyhow::Context as _;
use argon2::{Argon2, PasswordHasher, password_hash::SaltString};
use clap::{Parser, Subcommand};
use rand_core::OsRng;
use strata_api::AppState;
use strata_core::{
  access::{Abilities, ApiKeySpec, KeyKind},
  store::{KeyStore, Materializer, SchemaRegistry},
};
use strata_server::{ServerConfig, expand_tilde};
use strata_store_sqlite::SqliteStore;
use tokio::net::TcpListener;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Strata runtime-defined table store")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "config.toml", global = true)]
  config: PathBuf,

  #[command(subcommand)]
  command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
  /// Serve the HTTP API (the default).
  Serve,
  /// Print the argon2 hash for a password entered on stdin and exit.
  HashPassword,
  /// Issue an API key and print its token.
  CreateKey {
    /// Human-readable key name.
    name:       String,
    /// Auth id that row rules compare against.
    #[arg(long)]
    owner:      Option<String>,
    /// Issue a public (`pk_`) key instead of a secret one.
    #[arg(long)]
    public:     bool,
    /// Comma-separated abilities, or `*`.
    #[arg(long, default_value = "*")]
    abilities:  String,
    /// Comma-separated table names; empty means all tables.
    #[arg(long, value_delimiter = ',')]
    tables:     Vec<String>,
    /// Requests per minute; 0 disables limiting.
    #[arg(long, default_value_t = strata_core::access::DEFAULT_RATE_LIMIT)]
    rate_limit: u32,
  },
  /// Add missing timestamp and soft-delete columns to every table.
  RepairSoftDeletes,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  // Helper mode: hash a password and exit.
  if let Some(Command::HashPassword) = cli.command {
    let password = read_password()?;
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
      .hash_password(password.as_bytes(), &salt)
      .map_err(|e| anyhow::anyhow!("argon2 error: {e}"))?
      .to_string();
    println!("{hash}");
    return Ok(());
  }

  let server_cfg = ServerConfig::load(&cli.config).context("failed to read configuration")?;

  let store_path = expand_tilde(&server_cfg.store_path);
  let store = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;

  match cli.command.unwrap_or(Command::Serve) {
    Command::Serve => serve(server_cfg, store).await,
    Command::HashPassword => Ok(()),
    Command::CreateKey {
      name,
      owner,
      public,
      abilities,
      tables,
      rate_limit,
    } => {
      let abilities = Abilities::try_from(
        abilities
          .split(',')
          .map(|a| a.trim().to_string())
          .filter(|a| !a.is_empty())
          .collect::<Vec<_>>(),
      )
      .context("invalid abilities")?;
      let spec = ApiKeySpec {
        owner,
        kind: if public { KeyKind::Public } else { KeyKind::Secret },
        abilities,
        tables,
        rate_limit,
        ..ApiKeySpec::new(name)
      };
      let issued = store.create_key(spec).await.context("failed to create key")?;
      println!("{}", issued.token);
      tracing::info!(key_id = issued.key.id, hint = %issued.key.hint, "api key issued");
      Ok(())
    }
    Command::RepairSoftDeletes => {
      let tables = store.list_tables().await.context("failed to list tables")?;
      for table in tables {
        let name = table.table_name.clone();
        let added = store
          .repair_system_columns(table)
          .await
          .with_context(|| format!("failed to repair {name}"))?;
        if added.is_empty() {
          tracing::info!(table = %name, "nothing to repair");
        } else {
          tracing::info!(table = %name, columns = ?added, "added missing columns");
        }
      }
      Ok(())
    }
  }
}

async fn serve(server_cfg: ServerConfig, store: SqliteStore) -> anyhow::Result<()> {
  if server_cfg.operators.is_empty() {
    tracing::warn!("no operators configured; the management API is unreachable");
  }

  let state = AppState::new(Arc::new(store), server_cfg.api_config())
    .context("invalid webhook configuration")?;
  let app = strata_server::app(state);
  let address = server_cfg.address();

  tracing::info!("Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, app).await.context("server error")?;

  Ok(())
}

/// Read a password line from stdin. The terminal echoes it.
fn read_password() -> anyhow::Result<String> {
  use std::io::{self, BufRead, Write};
  let stdin = io::stdin();
  print!("Password: ");
  io::stdout().flush().ok();
  let mut line = String::new();
  stdin.lock().read_line(&mut line)?;
  Ok(
    line
      .trim_end_matches('\n')
      .trim_end_matches('\r')
      .to_string(),
  )
}
