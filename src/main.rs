//! enclave-admin - command-line access to an enclave store

use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use enclave_store::{
    with_fallback, BackendKind, Document, Enclave, EnclaveError, Scope, SortSpec, StoreConfig,
};

#[derive(Debug, Parser)]
#[command(name = "enclave-admin")]
#[command(about = "Inspect and administer enclave collections, records and grants")]
struct Cli {
    #[command(flatten)]
    store: StoreArgs,

    #[command(subcommand)]
    command: Command,
}

/// Store settings; each one overrides the config file
#[derive(Debug, Args)]
struct StoreArgs {
    /// TOML config file
    #[arg(long, env = "CONFIG")]
    config: Option<PathBuf>,

    /// Backend implementation (couch, memory)
    #[arg(long, env = "STORE_BACKEND")]
    backend: Option<BackendKind>,

    /// Store base URL
    #[arg(long, env = "STORE_URL")]
    url: Option<String>,

    #[arg(long, env = "STORE_USERNAME")]
    username: Option<String>,

    #[arg(long, env = "STORE_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Refuse every operation that writes
    #[arg(long, env = "STORE_READ_ONLY")]
    read_only: bool,

    /// Namespace prepended to collection names
    #[arg(long, env = "ROOT_PREFIX")]
    root_prefix: Option<String>,

    /// Request timeout in seconds
    #[arg(long, env = "STORE_TIMEOUT_SECS")]
    timeout_secs: Option<u64>,

    /// Identity the calls are made on behalf of
    #[arg(long = "as", env = "ENCLAVE_IDENTITY")]
    identity: Option<String>,

    /// Log level
    #[arg(long, env = "LOG_LEVEL", default_value = "warn")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

impl StoreArgs {
    fn build_config(&self) -> anyhow::Result<StoreConfig> {
        let mut config = match &self.config {
            Some(path) => StoreConfig::load(path)?,
            None => StoreConfig::default(),
        };

        if let Some(backend) = self.backend {
            config.backend = backend;
        }
        if let Some(url) = &self.url {
            config.url = url.clone();
        }
        if self.username.is_some() {
            config.username = self.username.clone();
        }
        if self.password.is_some() {
            config.password = self.password.clone();
        }
        if self.read_only {
            config.read_only = true;
        }
        if let Some(prefix) = &self.root_prefix {
            config.root_prefix = prefix.clone();
        }
        if let Some(timeout) = self.timeout_secs {
            config.request_timeout_secs = timeout;
        }

        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create a collection (idempotent)
    Create {
        collection: String,
        /// Extra field to index, repeatable
        #[arg(long = "index")]
        indexes: Vec<String>,
    },

    /// Remove a collection and its records
    Remove { collection: String },

    /// List collections under the root
    ListCollections {
        /// Include record counts
        #[arg(long)]
        verbose: bool,
    },

    /// Insert a record from a JSON object
    Insert {
        collection: String,
        pk: String,
        json: String,
    },

    /// Read a record
    Get { collection: String, pk: String },

    /// Merge a JSON object onto a record
    Update {
        collection: String,
        pk: String,
        json: String,
        /// Insert the record when it does not exist
        #[arg(long)]
        fallback: bool,
    },

    /// Delete a record
    Delete { collection: String, pk: String },

    /// Query records, e.g. `filter cars "rentalPrice >= 200" --sort '[{"rentalPrice":"asc"}]'`
    Filter {
        collection: String,
        conditions: Vec<String>,
        /// JSON sort spec, or asc/desc on timestamp
        #[arg(long)]
        sort: Option<String>,
        #[arg(long)]
        limit: Option<f64>,
        #[arg(long, default_value = "0")]
        skip: usize,
    },

    /// Count records
    Count { collection: String },

    /// Grant write (and read) access
    GrantWrite { identity: String },

    /// Grant read access
    GrantRead { identity: String },

    /// Revoke read (and write) access
    RevokeRead { identity: String },

    /// Revoke write access
    RevokeWrite { identity: String },

    /// Show the grants of an identity
    Check { identity: String },
}

#[derive(Serialize)]
struct AccessReport<'a> {
    identity: &'a str,
    read: bool,
    write: bool,
}

fn parse_document(raw: &str) -> anyhow::Result<Document> {
    match serde_json::from_str::<Value>(raw).context("record must be JSON")? {
        Value::Object(doc) => Ok(doc),
        other => anyhow::bail!("record must be a JSON object, got {}", other),
    }
}

fn parse_sort(raw: &str) -> anyhow::Result<Option<SortSpec>> {
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok(SortSpec::from_json(&value)?)
}

fn print<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = cli.store.build_config()?;
    let scope = Scope::from(cli.store.identity.clone());
    debug!(backend = %config.backend, url = %config.url, "Opening enclave");
    let enclave = Enclave::open(&config).await?;

    match cli.command {
        Command::Create {
            collection,
            indexes,
        } => {
            let indexes: Vec<&str> = indexes.iter().map(String::as_str).collect();
            enclave.create_collection(&scope, &collection, &indexes).await?;
            print(&collection)
        }
        Command::Remove { collection } => {
            enclave.remove_collection(&scope, &collection).await?;
            print(&collection)
        }
        Command::ListCollections { verbose } => {
            if verbose {
                print(&enclave.list_collections_verbose(&scope).await?)
            } else {
                print(&enclave.list_collections(&scope).await?)
            }
        }
        Command::Insert {
            collection,
            pk,
            json,
        } => {
            let doc = parse_document(&json)?;
            print(&enclave.insert_record(&scope, &collection, &pk, doc).await?)
        }
        Command::Get { collection, pk } => print(&enclave.get_record(&scope, &collection, &pk).await?),
        Command::Update {
            collection,
            pk,
            json,
            fallback,
        } => {
            let mut doc = parse_document(&json)?;
            if fallback {
                doc = with_fallback(doc);
            }
            print(&enclave.update_record(&scope, &collection, &pk, doc).await?)
        }
        Command::Delete { collection, pk } => {
            print(&enclave.delete_record(&scope, &collection, &pk).await?)
        }
        Command::Filter {
            collection,
            conditions,
            sort,
            limit,
            skip,
        } => {
            let sort = sort.as_deref().map(parse_sort).transpose()?.flatten();
            let conditions: Vec<&str> = conditions.iter().map(String::as_str).collect();
            let docs = enclave
                .filter_page(&scope, &collection, &conditions, sort, limit, skip)
                .await?;
            print(&docs)
        }
        Command::Count { collection } => print(&enclave.count(&scope, &collection).await?),
        Command::GrantWrite { identity } => {
            enclave.grant_write_access(&identity).await?;
            print(&identity)
        }
        Command::GrantRead { identity } => {
            enclave.grant_read_access(&identity).await?;
            print(&identity)
        }
        Command::RevokeRead { identity } => {
            enclave.revoke_read_access(&identity).await?;
            print(&identity)
        }
        Command::RevokeWrite { identity } => {
            enclave.revoke_write_access(&identity).await?;
            print(&identity)
        }
        Command::Check { identity } => {
            let report = AccessReport {
                identity: &identity,
                read: enclave.has_read_access(&identity).await?,
                write: enclave.has_write_access(&identity).await?,
            };
            print(&report)
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("enclave_store={},info", cli.store.log_level).into());
    let registry = tracing_subscriber::registry().with(filter);
    if cli.store.log_json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_target(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    if let Err(e) = run(cli).await {
        if let Some(err) = e.downcast_ref::<EnclaveError>() {
            if err.is_fatal() {
                error!("Backing store unreachable, exiting: {}", err);
                std::process::exit(1);
            }
            error!(kind = %err.kind(), "{}", err);
        }
        return Err(e);
    }
    Ok(())
}
