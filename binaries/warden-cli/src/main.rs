//! dbwarden CLI
//!
//! Runs database audits against a single connection URL and manages the
//! local bruteforce corpus.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;
use tracing_subscriber::EnvFilter;
use url::Url;
use uuid::Uuid;

use warden_bruteforce::StorageProviderFactory;
use warden_cipher::Credential;
use warden_config::{LogFormat, LoggingConfig, WardenConfig};
use warden_core::{Backend, CancelToken, ScanStore};
use warden_saver::{RecordVersion, SaverRunner, StaticNvdCatalog, UrlConnector};
use warden_store::MemoryStore;

#[derive(Parser)]
#[command(name = "warden")]
#[command(about = "dbwarden - database security audits")]
#[command(version)]
struct Cli {
    /// Config file (defaults to $WARDEN_CONFIG or the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Audit one database
    Scan {
        /// postgres, mysql, redis or mongodb
        backend: Backend,

        /// Connection URL with credentials
        url: String,

        /// Project whose secrets join the bruteforce corpus
        #[arg(long)]
        project: Option<i64>,

        /// Skip credential bruteforcing
        #[arg(long)]
        no_bruteforce: bool,

        /// Only check whether the database is reachable from here
        #[arg(long)]
        public_only: bool,

        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check a password against a stored hash
    Verify {
        hash: String,
        password: String,

        /// Account name, needed for Postgres md5 and Mongo SCRAM-SHA-1
        #[arg(short, long, default_value = "")]
        username: String,
    },

    /// Manage the bruteforce corpus
    Bruteforce {
        #[command(subcommand)]
        command: BruteforceCommands,
    },
}

#[derive(Subcommand)]
enum BruteforceCommands {
    /// Append a newline separated wordlist to the global corpus
    Import { file: PathBuf },

    /// Print the global corpus
    ListPasswords,

    /// Add a project specific secret, tried before the global corpus
    AddSecret { project: i64, secret: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => WardenConfig::load(path),
        None => WardenConfig::load_default(),
    }
    .context("loading config")?;
    init_logging(&config.logging, cli.json_logs);

    let store = Arc::new(
        MemoryStore::open(config.store_path())
            .with_context(|| format!("opening {}", config.store_path().display()))?,
    );

    match cli.command {
        Commands::Scan {
            backend,
            url,
            project,
            no_bruteforce,
            public_only,
            json,
        } => {
            let options = ScanOptions {
                project: project.unwrap_or(config.bruteforce.project_id),
                no_bruteforce,
                public_only,
                json,
            };
            cmd_scan(&config, store, backend, url, options).await
        }
        Commands::Verify {
            hash,
            password,
            username,
        } => cmd_verify(&hash, &password, &username),
        Commands::Bruteforce { command } => cmd_bruteforce(store, command).await,
    }
}

fn init_logging(logging: &LoggingConfig, json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if json || logging.format == LogFormat::Json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Hide the password part of a connection URL
fn redact(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut url) => {
            if url.password().is_some() {
                let _ = url.set_password(Some("***"));
            }
            url.to_string()
        }
        Err(_) => "<invalid url>".to_string(),
    }
}

struct ScanOptions {
    project: i64,
    no_bruteforce: bool,
    public_only: bool,
    json: bool,
}

async fn cmd_scan(
    config: &WardenConfig,
    store: Arc<MemoryStore>,
    backend: Backend,
    url: String,
    options: ScanOptions,
) -> Result<()> {
    let group = store.create_scan_group(options.project).await;
    let scan = store.create_scan(backend, group.id).await?;

    let provider = StorageProviderFactory::new(store.clone(), config.bruteforce.page_size);
    let connector = UrlConnector::new(
        url.clone(),
        Duration::from_secs(config.connection.timeout_secs),
    );
    let runner = SaverRunner::new(
        store.clone(),
        Arc::new(connector),
        Arc::new(provider),
        Arc::new(StaticNvdCatalog::new(config.nvd.ignored_cves.iter().cloned())),
    )
    .with_hook(Arc::new(RecordVersion::new(store.clone())))
    .with_progress_interval(Duration::from_millis(config.bruteforce.progress_interval_ms))
    .with_bruteforce(!options.no_bruteforce);

    let cancel = CancelToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, cancelling scan");
            on_interrupt.cancel();
        }
    });

    let span = tracing::info_span!("run", id = %Uuid::new_v4(), scan_id = scan.id);
    println!("Scanning {} ({})", redact(&url), backend.display_name());
    let outcome = async {
        if options.public_only {
            runner.scan_for_public_access_only(&scan, backend).await
        } else {
            runner
                .run_saver_remote_with_cancel(&scan, backend, cancel)
                .await
        }
    }
    .instrument(span)
    .await;

    let results = store.results_for(scan.id).await;
    if options.json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        for result in &results {
            println!("  [{:<7}] {}", result.severity, result.message);
        }
        let bruteforce = store.bruteforce_results_for(scan.id).await;
        if !bruteforce.is_empty() {
            println!("\nBruteforce:");
            for row in &bruteforce {
                match &row.password {
                    Some(password) => println!("  {:<20} cracked: {}", row.username, password),
                    None => println!("  {:<20} {}/{} tried", row.username, row.tried, row.total),
                }
            }
        }
        let finished = store.get_scan(scan.id).await?;
        println!("\nStatus: {}", finished.status);
    }

    store.save().await?;
    outcome.with_context(|| format!("scan {} failed", scan.id))
}

fn cmd_verify(hash: &str, password: &str, username: &str) -> Result<()> {
    let credential = Credential::new(username, false, hash);
    let matched = credential
        .try_verify(password)
        .with_context(|| format!("parsing {} hash", credential.format().name()))?;

    println!("Format: {}", credential.format().name());
    if matched {
        println!("Match");
    } else {
        println!("No match");
    }
    Ok(())
}

async fn cmd_bruteforce(store: Arc<MemoryStore>, command: BruteforceCommands) -> Result<()> {
    match command {
        BruteforceCommands::Import { file } => {
            let reader = BufReader::new(
                File::open(&file).with_context(|| format!("opening {}", file.display()))?,
            );
            let added = store.import_passwords(reader).await?;
            store.save().await?;
            println!("Imported {} new passwords", added);
        }
        BruteforceCommands::ListPasswords => {
            for password in store.list_passwords().await {
                println!("{}", password);
            }
        }
        BruteforceCommands::AddSecret { project, secret } => {
            if store.add_project_secret(project, &secret).await {
                store.save().await?;
                println!("Added secret to project {}", project);
            } else {
                println!("Secret already known for project {}", project);
            }
        }
    }
    Ok(())
}
