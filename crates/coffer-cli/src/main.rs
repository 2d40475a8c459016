//! coffer: end-to-end-encrypted vault client
//!
//! Account commands:
//!   init --email <addr>            - create a local account, print the recovery phrase
//!   recover                        - reset the password with the recovery phrase
//!   passwd                         - change the password
//!   collection create|share        - manage collections
//!
//! File commands:
//!   import <path> -C <collection>  - encrypt a file into the vault (local only)
//!   edit <file> <path>             - replace a file's content
//!   upload | onload | offload | cloud-delete | sync <file>
//!   sync-collection <collection>   - sync every file of a collection
//!   status [-C <collection>]       - show local sync state

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use coffer_core::config::{expand_tilde, CofferConfig};
use coffer_core::{CofferError, File, StorageMode, User};
use coffer_storage::{HttpGateway, MemoryGateway, RemoteGateway};
use coffer_sync::{open_store, CollectionSyncReport, ImportRequest, SyncOutcome, VaultContext};
use secrecy::{ExposeSecret, SecretString};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "coffer",
    version,
    about = "End-to-end-encrypted file vault client",
    long_about = "coffer: import, encrypt and sync files with a vault backend that never sees plaintext"
)]
struct Cli {
    /// Path to coffer.toml configuration file
    #[arg(
        long,
        short = 'c',
        env = "COFFER_CONFIG",
        default_value = "~/.config/coffer/coffer.toml"
    )]
    config: PathBuf,

    /// Account to act as (default: the only local account)
    #[arg(long, short = 'u', env = "COFFER_USER", global = true)]
    user: Option<String>,

    /// Log level (trace, debug, info, warn, error); overrides [app] log_level
    #[arg(long, env = "COFFER_LOG", global = true)]
    log: Option<String>,

    /// Log format; overrides [app] log_format
    #[arg(long, env = "COFFER_LOG_FORMAT", global = true)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a local account and print its recovery phrase
    Init {
        #[arg(long)]
        email: String,
    },

    /// Set a new password using the 24-word recovery phrase
    ///
    /// The phrase is read from COFFER_RECOVERY_PHRASE or prompted for.
    Recover,

    /// Change the account password
    Passwd,

    /// Collection management
    Collection {
        #[command(subcommand)]
        action: CollectionAction,
    },

    /// Encrypt a file into a collection; nothing is uploaded yet
    Import {
        /// File to import
        path: PathBuf,
        #[arg(long, short = 'C')]
        collection: String,
        /// Optional thumbnail image stored alongside the file
        #[arg(long)]
        thumbnail: Option<PathBuf>,
        /// encrypted-only, decrypted-only or hybrid (default: [sync] default_storage_mode)
        #[arg(long)]
        mode: Option<StorageMode>,
    },

    /// Replace the content of a vault file with the content of a local file
    Edit { file: String, path: PathBuf },

    /// Upload a local-only or locally modified file
    Upload { file: String },

    /// Restore a cloud-only file to disk
    Onload { file: String },

    /// Drop local copies of a synced file, keeping the cloud copy
    Offload { file: String },

    /// Delete the cloud copy of a file, keeping local content
    #[command(name = "cloud-delete")]
    CloudDelete { file: String },

    /// Sync one file in whichever direction is needed
    ///
    /// Accepts a local file id, or the remote id of a file not yet seen here.
    Sync { file: String },

    /// Sync every file of a collection
    #[command(name = "sync-collection")]
    SyncCollection { collection: String },

    /// Show local sync state
    Status {
        #[arg(long, short = 'C')]
        collection: Option<String>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum CollectionAction {
    /// Create a collection owned by the current account
    Create { name: String },

    /// Give another local account access to a collection
    Share { collection: String, recipient: String },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

impl Commands {
    /// Commands that talk to the backend need an access token.
    fn needs_network(&self) -> bool {
        matches!(
            self,
            Commands::Upload { .. }
                | Commands::Onload { .. }
                | Commands::Offload { .. }
                | Commands::CloudDelete { .. }
                | Commands::Sync { .. }
                | Commands::SyncCollection { .. }
        )
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = expand_tilde(&cli.config);
    let config = CofferConfig::load(&config_path)
        .with_context(|| format!("loading config: {}", config_path.display()))?;

    let level = cli.log.clone().unwrap_or_else(|| config.app.log_level.clone());
    let format = cli.log_format.unwrap_or(match config.app.log_format.as_str() {
        "json" => LogFormat::Json,
        _ => LogFormat::Text,
    });
    init_logging(&level, format);

    run(cli, &config, &config_path).await.inspect_err(|e| {
        if let Some(hint) = hint_for(e) {
            eprintln!("hint: {hint}");
        }
    })
}

async fn run(cli: Cli, config: &CofferConfig, config_path: &Path) -> Result<()> {
    if let Commands::Config {
        action: ConfigAction::Show,
    } = &cli.command
    {
        return cmd_config_show(config, config_path);
    }

    let ctx = open_vault(config, cli.command.needs_network())?;
    let user = cli.user.as_deref();

    match cli.command {
        Commands::Init { email } => cmd_init(&ctx, &email).await,
        Commands::Recover => cmd_recover(&ctx, user).await,
        Commands::Passwd => cmd_passwd(&ctx, user).await,
        Commands::Collection {
            action: CollectionAction::Create { name },
        } => cmd_collection_create(&ctx, user, &name).await,
        Commands::Collection {
            action:
                CollectionAction::Share {
                    collection,
                    recipient,
                },
        } => cmd_collection_share(&ctx, &collection, &recipient).await,
        Commands::Import {
            path,
            collection,
            thumbnail,
            mode,
        } => cmd_import(&ctx, path, collection, thumbnail, mode).await,
        Commands::Edit { file, path } => cmd_edit(&ctx, &file, &path).await,
        Commands::Upload { file } => {
            let cancel = cancel_on_ctrl_c();
            let file = coffer_sync::upload_file(&ctx, &file, &cancel).await?;
            print_file("uploaded", &file);
            Ok(())
        }
        Commands::Onload { file } => {
            let password = read_password("Password: ")?;
            let cancel = cancel_on_ctrl_c();
            let file = coffer_sync::onload_file(&ctx, &file, &password, &cancel).await?;
            print_file("onloaded", &file);
            Ok(())
        }
        Commands::Offload { file } => {
            let cancel = cancel_on_ctrl_c();
            let file = coffer_sync::offload_file(&ctx, &file, &cancel).await?;
            print_file("offloaded", &file);
            Ok(())
        }
        Commands::CloudDelete { file } => {
            let file = coffer_sync::cloud_delete_file(&ctx, &file).await?;
            print_file("deleted from cloud", &file);
            Ok(())
        }
        Commands::Sync { file } => cmd_sync(&ctx, &file).await,
        Commands::SyncCollection { collection } => cmd_sync_collection(&ctx, &collection).await,
        Commands::Status { collection } => cmd_status(&ctx, collection.as_deref()),
        Commands::Config { .. } => Ok(()),
    }
}

fn init_logging(level: &str, format: LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

/// Tailored advice for the error kinds a user can act on.
fn hint_for(err: &anyhow::Error) -> Option<&'static str> {
    let err = err.downcast_ref::<CofferError>()?;
    if err.is_wrong_password() {
        return Some("the password is wrong; `coffer recover` resets it with the recovery phrase");
    }
    match err {
        CofferError::UploadIncomplete { .. } => {
            Some("run the same command again; the upload resumes where it stopped")
        }
        CofferError::Conflict(_) => {
            Some("the remote copy changed elsewhere; run `coffer sync` to see what happened")
        }
        CofferError::IntegrityMismatch(_) => {
            Some("stored ciphertext does not match its recorded hash; do not trust this copy")
        }
        e if e.is_retryable() => Some("the backend could not be reached; try again later"),
        _ => None,
    }
}

// ── Wiring ────────────────────────────────────────────────────────────────────

fn build_gateway(config: &CofferConfig, needs_network: bool) -> Result<Arc<dyn RemoteGateway>> {
    match std::env::var("COFFER_ACCESS_TOKEN") {
        Ok(token) => {
            let gateway = HttpGateway::from_config(&config.cloud, SecretString::from(token))
                .context("building backend client")?;
            Ok(Arc::new(gateway))
        }
        // Local-only commands never call the gateway.
        Err(_) if !needs_network => Ok(Arc::new(MemoryGateway::new())),
        Err(_) => anyhow::bail!(
            "backend access token not set\n\
             Set the COFFER_ACCESS_TOKEN environment variable.\n\
             Example:\n\
             \texport COFFER_ACCESS_TOKEN=your-token"
        ),
    }
}

fn open_vault(config: &CofferConfig, needs_network: bool) -> Result<VaultContext> {
    let state_path = expand_tilde(&config.sync.state_db);
    if let Some(parent) = state_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating state directory: {}", parent.display()))?;
    }
    let store = open_store(&state_path)
        .with_context(|| format!("opening state store: {}", state_path.display()))?;
    let gateway = build_gateway(config, needs_network)?;
    Ok(VaultContext::from_config(config, store, gateway))
}

/// The account named by `--user`, or the only one present.
fn resolve_user(ctx: &VaultContext, requested: Option<&str>) -> Result<User> {
    if let Some(id) = requested {
        return Ok(ctx.repo.get_user(id)?);
    }
    let mut users = ctx.repo.list_users()?;
    match users.len() {
        0 => anyhow::bail!("no local account; run `coffer init --email <addr>` first"),
        1 => Ok(users.remove(0)),
        n => anyhow::bail!("{n} local accounts; choose one with --user or COFFER_USER"),
    }
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling");
            child.cancel();
        }
    });
    token
}

// ── Secrets ───────────────────────────────────────────────────────────────────

fn read_password(prompt: &str) -> Result<SecretString> {
    if let Ok(pw) = std::env::var("COFFER_PASSWORD") {
        return Ok(SecretString::from(pw));
    }
    let pw = rpassword::prompt_password(prompt).context("reading password")?;
    Ok(SecretString::from(pw))
}

/// A new password, read from COFFER_NEW_PASSWORD or prompted for twice.
fn read_new_password() -> Result<SecretString> {
    if let Ok(pw) = std::env::var("COFFER_NEW_PASSWORD") {
        return Ok(SecretString::from(pw));
    }
    let first = rpassword::prompt_password("New password: ").context("reading password")?;
    let second = rpassword::prompt_password("Repeat new password: ").context("reading password")?;
    if first != second {
        anyhow::bail!("passwords do not match");
    }
    Ok(SecretString::from(first))
}

fn read_recovery_phrase() -> Result<SecretString> {
    if let Ok(phrase) = std::env::var("COFFER_RECOVERY_PHRASE") {
        return Ok(SecretString::from(phrase));
    }
    let phrase =
        rpassword::prompt_password("Recovery phrase: ").context("reading recovery phrase")?;
    Ok(SecretString::from(phrase))
}

// ── Account commands ──────────────────────────────────────────────────────────

async fn cmd_init(ctx: &VaultContext, email: &str) -> Result<()> {
    let password = match std::env::var("COFFER_PASSWORD") {
        Ok(pw) => SecretString::from(pw),
        Err(_) => read_new_password()?,
    };
    let reg = coffer_sync::register_user(ctx, email, &password).await?;

    println!("Account created");
    println!("  user:   {}", reg.user.id);
    println!("  email:  {}", reg.user.email);
    println!();
    println!("Recovery phrase (shown once, write it down):");
    println!();
    for (i, word) in reg
        .recovery_phrase
        .expose_secret()
        .split_whitespace()
        .enumerate()
    {
        print!("{:>2}. {word:<12}", i + 1);
        if (i + 1) % 4 == 0 {
            println!();
        }
    }
    println!();
    Ok(())
}

async fn cmd_recover(ctx: &VaultContext, user: Option<&str>) -> Result<()> {
    let user = resolve_user(ctx, user)?;
    let phrase = read_recovery_phrase()?;
    let new_password = read_new_password()?;
    coffer_sync::recover_account(ctx, &user.id, &phrase, &new_password).await?;
    println!("Password reset for {}", user.email);
    Ok(())
}

async fn cmd_passwd(ctx: &VaultContext, user: Option<&str>) -> Result<()> {
    let user = resolve_user(ctx, user)?;
    let old = read_password("Current password: ")?;
    let new = read_new_password()?;
    coffer_sync::change_password(ctx, &user.id, &old, &new).await?;
    println!("Password changed for {}", user.email);
    Ok(())
}

async fn cmd_collection_create(ctx: &VaultContext, user: Option<&str>, name: &str) -> Result<()> {
    let owner = resolve_user(ctx, user)?;
    let password = read_password("Password: ")?;
    let collection = coffer_sync::create_collection(ctx, &owner.id, name, &password).await?;
    println!("Created collection {name}");
    println!("  id:     {}", collection.id);
    Ok(())
}

async fn cmd_collection_share(ctx: &VaultContext, collection: &str, recipient: &str) -> Result<()> {
    let password = read_password("Owner password: ")?;
    let shared = coffer_sync::share_collection(ctx, collection, &password, recipient).await?;
    println!(
        "Shared collection {} with {recipient} ({} member(s))",
        shared.id,
        shared.members.len()
    );
    Ok(())
}

// ── File commands ─────────────────────────────────────────────────────────────

async fn cmd_import(
    ctx: &VaultContext,
    path: PathBuf,
    collection: String,
    thumbnail: Option<PathBuf>,
    mode: Option<StorageMode>,
) -> Result<()> {
    let password = read_password("Password: ")?;
    let req = ImportRequest {
        collection_id: collection,
        source: path,
        thumbnail,
        storage_mode: mode,
    };
    let file = coffer_sync::import_file(ctx, &req, &password)
        .await
        .with_context(|| format!("importing {}", req.source.display()))?;
    print_file("imported", &file);
    Ok(())
}

async fn cmd_edit(ctx: &VaultContext, file_id: &str, path: &Path) -> Result<()> {
    let content = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let password = read_password("Password: ")?;
    let file = coffer_sync::replace_content(ctx, file_id, &content, &password).await?;
    print_file("edited", &file);
    Ok(())
}

async fn cmd_sync(ctx: &VaultContext, file_id: &str) -> Result<()> {
    let password = read_password("Password: ")?;
    let cancel = cancel_on_ctrl_c();
    match coffer_sync::sync_file(ctx, file_id, &password, &cancel).await? {
        SyncOutcome::Uploaded(file) => print_file("uploaded", &file),
        SyncOutcome::Downloaded(file) => print_file("downloaded", &file),
        SyncOutcome::MetadataRefreshed(file) => print_file("metadata refreshed", &file),
        SyncOutcome::Preserved(file) => {
            print_file("remote copy deleted; local edits kept", &file)
        }
        SyncOutcome::Removed => println!("{file_id}: remote copy deleted; removed locally"),
        SyncOutcome::Conflict => {
            println!("{file_id}: changed locally and remotely; local edits kept, nothing moved")
        }
        SyncOutcome::Unchanged => println!("{file_id}: up to date"),
    }
    Ok(())
}

async fn cmd_sync_collection(ctx: &VaultContext, collection_id: &str) -> Result<()> {
    let password = read_password("Password: ")?;
    let cancel = cancel_on_ctrl_c();
    let report = coffer_sync::sync_collection(ctx, collection_id, &password, &cancel).await?;
    print_report(&report);
    if report.failed > 0 {
        anyhow::bail!("{} of {} files failed to sync", report.failed, report.total);
    }
    Ok(())
}

fn cmd_status(ctx: &VaultContext, collection: Option<&str>) -> Result<()> {
    let collections = match collection {
        Some(id) => vec![ctx.repo.get_collection(id)?],
        None => ctx.repo.list_collections()?,
    };
    println!("Data directory: {}", ctx.layout().root().display());
    println!("Collections: {}", collections.len());

    for col in collections {
        let files = ctx.repo.files_in_collection(&col.id)?;
        println!();
        println!("Collection {} ({} files, {} members)", col.id, files.len(), col.members.len());
        for file in files {
            println!(
                "  {:<36}  {:<16}  {:<14}  v{:<3}  {}",
                file.id,
                file.sync_status.to_string(),
                file.storage_mode.to_string(),
                file.version,
                fmt_bytes(file.encrypted_size),
            );
        }
    }
    Ok(())
}

fn cmd_config_show(config: &CofferConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}

// ── Output helpers ────────────────────────────────────────────────────────────

fn print_file(action: &str, file: &File) {
    info!(file_id = %file.id, status = %file.sync_status, "{action}");
    println!("{}: {action}", file.id);
    println!("  status:  {}", file.sync_status);
    println!("  mode:    {}", file.storage_mode);
    println!("  version: {}", file.version);
    if let Some(remote_id) = &file.remote_id {
        println!("  remote:  {remote_id}");
    }
    if let Some(path) = &file.decrypted_path {
        println!("  path:    {}", path.display());
    }
    println!("  hash:    {}", &file.encrypted_hash[..16.min(file.encrypted_hash.len())]);
}

fn print_report(report: &CollectionSyncReport) {
    println!("Sync complete:");
    println!("  uploaded:   {}", report.uploaded);
    println!("  downloaded: {}", report.downloaded);
    println!("  deleted:    {}", report.deleted);
    println!("  unchanged:  {}", report.unchanged);
    println!("  skipped:    {}", report.skipped);
    println!("  failed:     {}", report.failed);
    println!("  total:      {}", report.total);
    for failure in &report.failures {
        println!("  ! {}: {}", failure.file_id, failure.error);
    }
}

fn fmt_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}
