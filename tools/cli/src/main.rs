//! VaultKeep CLI - Command line interface for the local encrypted vault.
//!
//! Every command prepares the engine, performs one operation and exits.
//! Secrets live in a file secret store under the vault root.

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use zeroize::Zeroizing;

use vaultkeep_common::{FolderPath, ItemId};
use vaultkeep_storage::FileSecretStore;
use vaultkeep_vault::{
    FolderNode, ItemFilter, NewItem, SortOrder, VaultConfig, VaultEngine, VaultItem,
};

#[derive(Parser)]
#[command(name = "vaultkeep")]
#[command(about = "VaultKeep - Local encrypted file vault")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Vault directory (default: the platform data directory).
    #[arg(long, global = true)]
    vault: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encrypt files into the vault.
    Add {
        /// Files to add.
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Destination folder (default: root, or the category).
        #[arg(short, long)]
        folder: Option<String>,

        /// Category label.
        #[arg(short, long)]
        category: Option<String>,

        /// MIME type (default: guessed from the extension).
        #[arg(long)]
        mime: Option<String>,
    },

    /// List items.
    List {
        /// Only items directly in this folder.
        #[arg(short, long)]
        folder: Option<String>,

        /// Item type.
        #[arg(short = 't', long, value_enum, default_value = "all")]
        filter: FilterArg,

        /// Ordering.
        #[arg(short, long, value_enum, default_value = "newest")]
        sort: SortArg,

        /// Case-insensitive search over name, category and folder.
        #[arg(short = 'q', long, default_value = "")]
        search: String,

        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Decrypt an item to stdout.
    Cat {
        /// Item id or name.
        item: String,

        /// Folder used to resolve a name.
        #[arg(short, long)]
        folder: Option<String>,
    },

    /// Delete items.
    Rm {
        /// Item ids or names.
        #[arg(required = true)]
        items: Vec<String>,

        /// Folder used to resolve names.
        #[arg(short, long)]
        folder: Option<String>,
    },

    /// Rename an item.
    Rename {
        /// Item id or name.
        item: String,

        /// New display name.
        name: String,

        /// Folder used to resolve a name.
        #[arg(short, long)]
        folder: Option<String>,
    },

    /// Move items to another folder.
    Mv {
        /// Item ids or names.
        #[arg(required = true)]
        items: Vec<String>,

        /// Target folder (default: root).
        #[arg(short, long)]
        to: Option<String>,

        /// Folder used to resolve names.
        #[arg(short, long)]
        folder: Option<String>,
    },

    /// Create a folder.
    Mkdir {
        /// Folder path, e.g. "Trips/2024".
        path: String,
    },

    /// Delete a folder with everything in it.
    Rmdir {
        /// Folder path.
        path: String,

        /// Skip the confirmation check.
        #[arg(long)]
        yes: bool,
    },

    /// Move a folder under another parent.
    Mvdir {
        /// Folder path.
        path: String,

        /// New parent (default: root).
        #[arg(short, long)]
        to: Option<String>,
    },

    /// Rename a folder in place.
    Renamedir {
        /// Folder path.
        path: String,

        /// New folder name.
        name: String,
    },

    /// Show the folder tree.
    Tree,

    /// Decrypt an item into a fresh export directory.
    Export {
        /// Item id or name.
        item: String,

        /// Folder used to resolve a name.
        #[arg(short, long)]
        folder: Option<String>,
    },

    /// Decrypt a folder subtree into a fresh export directory.
    ExportDir {
        /// Folder path.
        path: String,
    },

    /// Remove every export directory.
    PurgeExports,

    /// Toggle the pin of an item.
    Pin {
        /// Item id or name.
        item: String,

        /// Folder used to resolve a name.
        #[arg(short, long)]
        folder: Option<String>,
    },

    /// Show recently opened items.
    Recent {
        /// Maximum number of items.
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },

    /// Show groups of items with identical contents.
    Dupes,

    /// Show storage usage.
    Stats,

    /// Manage the passcode.
    Passcode {
        #[command(subcommand)]
        action: PasscodeAction,
    },

    /// Destroy every item, folder, key and passcode.
    Wipe {
        /// Confirm the wipe.
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum PasscodeAction {
    /// Set or replace the passcode.
    Set,
    /// Remove the passcode.
    Clear,
}

#[derive(Clone, Copy, ValueEnum)]
enum FilterArg {
    All,
    Images,
    Videos,
    Documents,
    Others,
}

impl From<FilterArg> for ItemFilter {
    fn from(value: FilterArg) -> Self {
        match value {
            FilterArg::All => ItemFilter::All,
            FilterArg::Images => ItemFilter::Images,
            FilterArg::Videos => ItemFilter::Videos,
            FilterArg::Documents => ItemFilter::Documents,
            FilterArg::Others => ItemFilter::Others,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum SortArg {
    Newest,
    Oldest,
    Name,
    NameDesc,
    Size,
    SizeDesc,
}

impl From<SortArg> for SortOrder {
    fn from(value: SortArg) -> Self {
        match value {
            SortArg::Newest => SortOrder::Newest,
            SortArg::Oldest => SortOrder::Oldest,
            SortArg::Name => SortOrder::NameAscending,
            SortArg::NameDesc => SortOrder::NameDescending,
            SortArg::Size => SortOrder::SizeAscending,
            SortArg::SizeDesc => SortOrder::SizeDescending,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging; stdout is reserved for command output.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if cli.verbose { "debug" } else { "warn" }));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let root = match cli.vault {
        Some(root) => root,
        None => default_vault_root()?,
    };
    debug!(root = %root.display(), "Using vault");

    if let Commands::Wipe { yes } = cli.command {
        return cmd_wipe(&root, yes).await;
    }

    let engine = open_engine(&root).await?;

    match cli.command {
        Commands::Add {
            files,
            folder,
            category,
            mime,
        } => cmd_add(&engine, &files, folder, category, mime).await,

        Commands::List {
            folder,
            filter,
            sort,
            search,
            json,
        } => cmd_list(&engine, folder, filter.into(), sort.into(), &search, json),

        Commands::Cat { item, folder } => cmd_cat(&engine, &item, folder).await,

        Commands::Rm { items, folder } => cmd_rm(&engine, &items, folder).await,

        Commands::Rename { item, name, folder } => cmd_rename(&engine, &item, name, folder).await,

        Commands::Mv { items, to, folder } => cmd_mv(&engine, &items, to, folder).await,

        Commands::Mkdir { path } => cmd_mkdir(&engine, &path).await,

        Commands::Rmdir { path, yes } => cmd_rmdir(&engine, &path, yes).await,

        Commands::Mvdir { path, to } => cmd_mvdir(&engine, &path, to).await,

        Commands::Renamedir { path, name } => cmd_renamedir(&engine, &path, name).await,

        Commands::Tree => cmd_tree(&engine),

        Commands::Export { item, folder } => cmd_export(&engine, &item, folder).await,

        Commands::ExportDir { path } => cmd_export_dir(&engine, &path).await,

        Commands::PurgeExports => {
            let removed = engine.purge_exports().await.context("Failed to purge exports")?;
            println!("Removed {} export(s)", removed);
            Ok(())
        }

        Commands::Pin { item, folder } => cmd_pin(&engine, &item, folder).await,

        Commands::Recent { limit } => cmd_recent(&engine, limit),

        Commands::Dupes => cmd_dupes(&engine),

        Commands::Stats => cmd_stats(&engine).await,

        Commands::Passcode { action } => cmd_passcode(&engine, action).await,

        Commands::Wipe { .. } => unreachable!("handled before the engine is opened"),
    }
}

fn default_vault_root() -> Result<PathBuf> {
    let base = dirs::data_dir().context("No data directory on this platform")?;
    Ok(base.join("vaultkeep"))
}

fn build_engine(root: &Path) -> Result<VaultEngine> {
    let config = VaultConfig::new(root);
    let secrets = FileSecretStore::new(config.secrets_dir())
        .context("Failed to open secret store")?;
    VaultEngine::builder(config, Arc::new(secrets))
        .build()
        .context("Failed to open vault")
}

/// Prompt for a passcode securely.
fn prompt_passcode(prompt: &str) -> Result<Zeroizing<String>> {
    let passcode = rpassword::prompt_password(prompt).context("Failed to read passcode")?;
    Ok(Zeroizing::new(passcode))
}

/// Build and prepare the engine, checking the passcode if one is set.
async fn open_engine(root: &Path) -> Result<VaultEngine> {
    let engine = build_engine(root)?;
    if engine.key_store().has_passcode().await? {
        let passcode = prompt_passcode("Passcode: ")?;
        if !engine.key_store().verify_passcode(&passcode).await? {
            anyhow::bail!("Wrong passcode");
        }
    }
    engine.prepare().await.context("Failed to prepare vault")?;
    Ok(engine)
}

fn parse_folder(folder: Option<String>) -> Option<FolderPath> {
    FolderPath::from_optional(folder.as_deref())
}

/// Find an item by id, falling back to its name inside `folder`.
fn resolve_item(engine: &VaultEngine, target: &str, folder: Option<&FolderPath>) -> Result<VaultItem> {
    if let Ok(id) = ItemId::new(target) {
        if let Some(item) = engine.get_item(&id) {
            return Ok(item);
        }
    }
    engine.existing_item(target, folder).with_context(|| {
        let place = folder.map(|f| f.as_string()).unwrap_or_else(|| "/".to_string());
        format!("No item '{}' in {}", target, place)
    })
}

fn resolve_items(engine: &VaultEngine, targets: &[String], folder: Option<&FolderPath>) -> Result<Vec<ItemId>> {
    targets
        .iter()
        .map(|t| resolve_item(engine, t, folder).map(|i| i.id))
        .collect()
}

/// MIME type from a file extension; unknown extensions are opaque bytes.
fn guess_mime(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "heic" => "image/heic",
        "webp" => "image/webp",
        "mp4" | "m4v" => "video/mp4",
        "mov" => "video/quicktime",
        "webm" => "video/webm",
        "pdf" => "application/pdf",
        "txt" | "md" => "text/plain",
        "csv" => "text/csv",
        "rtf" => "application/rtf",
        "epub" => "application/epub+zip",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        _ => "application/octet-stream",
    }
}

fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

fn print_item(engine: &VaultEngine, item: &VaultItem) {
    let pin = if engine.is_pinned(&item.id) { "*" } else { " " };
    println!(
        "{} {}  {:>10}  {}  {}",
        pin,
        item.id,
        format_size(item.size),
        item.created_at.with_timezone(&Local).format("%Y-%m-%d %H:%M"),
        item.original_name
    );
}

/// Encrypt files into the vault.
async fn cmd_add(
    engine: &VaultEngine,
    files: &[PathBuf],
    folder: Option<String>,
    category: Option<String>,
    mime: Option<String>,
) -> Result<()> {
    let folder = parse_folder(folder);
    for path in files {
        let data = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .with_context(|| format!("No file name in {}", path.display()))?;
        let mime_type = mime.clone().unwrap_or_else(|| guess_mime(path).to_string());
        let is_image = mime_type.trim().to_ascii_lowercase().starts_with("image/");

        let target = folder
            .clone()
            .or_else(|| category.as_deref().and_then(|c| FolderPath::from_optional(Some(c))));
        let name = engine.unique_item_name(&file_name, target.as_ref());

        let mut new = NewItem::new(data, name, mime_type).image(is_image);
        if let Some(category) = &category {
            new = new.category(category.clone());
        }
        if let Some(folder) = &folder {
            new = new.folder(folder.clone());
        }

        let item = engine
            .add_item(new)
            .await
            .with_context(|| format!("Failed to add {}", path.display()))?;
        info!(id = %item.id, "Added {}", path.display());
        println!("{}  {} ({})", item.id, item.original_name, format_size(item.size));
    }
    Ok(())
}

/// List items.
fn cmd_list(
    engine: &VaultEngine,
    folder: Option<String>,
    filter: ItemFilter,
    sort: SortOrder,
    search: &str,
    json: bool,
) -> Result<()> {
    let mut items = engine.filtered_items(filter, search, sort);
    if folder.is_some() {
        let folder = parse_folder(folder);
        items.retain(|i| i.is_in(folder.as_ref()));
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }
    if items.is_empty() {
        println!("No items.");
        return Ok(());
    }
    for item in &items {
        print_item(engine, item);
    }
    Ok(())
}

/// Decrypt an item to stdout and count it as opened.
async fn cmd_cat(engine: &VaultEngine, target: &str, folder: Option<String>) -> Result<()> {
    use std::io::Write;

    let item = resolve_item(engine, target, parse_folder(folder).as_ref())?;
    let plaintext = engine
        .read_item(&item.id)
        .await
        .with_context(|| format!("Failed to decrypt {}", item.original_name))?;
    engine.record_opened(item.id.clone()).await?;

    let mut stdout = std::io::stdout().lock();
    stdout.write_all(plaintext.as_bytes())?;
    stdout.flush()?;
    Ok(())
}

async fn cmd_rm(engine: &VaultEngine, targets: &[String], folder: Option<String>) -> Result<()> {
    let ids = resolve_items(engine, targets, parse_folder(folder).as_ref())?;
    let deleted = engine
        .delete_items(ids)
        .await
        .context("Failed to delete items")?;
    println!("Deleted {} item(s)", deleted);
    Ok(())
}

async fn cmd_rename(
    engine: &VaultEngine,
    target: &str,
    name: String,
    folder: Option<String>,
) -> Result<()> {
    let item = resolve_item(engine, target, parse_folder(folder).as_ref())?;
    let renamed = engine
        .rename_item(item.id, name)
        .await
        .context("Failed to rename item")?;
    println!("Renamed to {}", renamed.original_name);
    Ok(())
}

async fn cmd_mv(
    engine: &VaultEngine,
    targets: &[String],
    to: Option<String>,
    folder: Option<String>,
) -> Result<()> {
    let ids = resolve_items(engine, targets, parse_folder(folder).as_ref())?;
    let to = parse_folder(to);
    let moved = engine
        .assign_folder(ids, to.clone())
        .await
        .context("Failed to move items")?;
    let place = to.map(|f| f.as_string()).unwrap_or_else(|| "/".to_string());
    println!("Moved {} item(s) to {}", moved, place);
    Ok(())
}

async fn cmd_mkdir(engine: &VaultEngine, path: &str) -> Result<()> {
    let path = FolderPath::parse(path);
    if engine
        .create_folder(path.clone())
        .await
        .context("Failed to create folder")?
    {
        println!("Folder created: {}", path);
    } else {
        println!("Folder already exists: {}", path);
    }
    Ok(())
}

async fn cmd_rmdir(engine: &VaultEngine, path: &str, yes: bool) -> Result<()> {
    let path = FolderPath::parse(path);
    let affected = engine
        .items()
        .iter()
        .filter(|i| i.folder().is_within(&path))
        .count();
    if affected > 0 && !yes {
        anyhow::bail!(
            "{} contains {} item(s); pass --yes to delete them",
            path,
            affected
        );
    }
    let deleted = engine
        .delete_folder(path.clone())
        .await
        .context("Failed to delete folder")?;
    println!("Deleted {} and {} item(s)", path, deleted);
    Ok(())
}

async fn cmd_mvdir(engine: &VaultEngine, path: &str, to: Option<String>) -> Result<()> {
    let from = FolderPath::parse(path);
    match engine
        .move_folder(from.clone(), parse_folder(to))
        .await
        .context("Failed to move folder")?
    {
        Some(new_path) => println!("Moved {} to {}", from, new_path),
        None => println!("{} is already there", from),
    }
    Ok(())
}

async fn cmd_renamedir(engine: &VaultEngine, path: &str, name: String) -> Result<()> {
    let from = FolderPath::parse(path);
    match engine
        .rename_folder(from.clone(), name)
        .await
        .context("Failed to rename folder")?
    {
        Some(new_path) => println!("Renamed {} to {}", from, new_path),
        None => println!("{} is unchanged", from),
    }
    Ok(())
}

fn print_node(node: &FolderNode, depth: usize) {
    println!(
        "{}{}/ ({} item(s))",
        "  ".repeat(depth),
        node.name,
        node.total_items()
    );
    for item in &node.items {
        println!("{}  {}", "  ".repeat(depth), item.original_name);
    }
    for child in &node.children {
        print_node(child, depth + 1);
    }
}

fn cmd_tree(engine: &VaultEngine) -> Result<()> {
    println!("/");
    for item in engine.items_in(None) {
        println!("  {}", item.original_name);
    }
    for node in engine.folder_nodes() {
        print_node(&node, 1);
    }
    Ok(())
}

async fn cmd_export(engine: &VaultEngine, target: &str, folder: Option<String>) -> Result<()> {
    let item = resolve_item(engine, target, parse_folder(folder).as_ref())?;
    let path = engine
        .export_item(&item.id)
        .await
        .with_context(|| format!("Failed to export {}", item.original_name))?;
    println!("{}", path.display());
    Ok(())
}

async fn cmd_export_dir(engine: &VaultEngine, path: &str) -> Result<()> {
    let path = FolderPath::parse(path);
    let dir = engine
        .export_folder(&path)
        .await
        .with_context(|| format!("Failed to export {}", path))?;
    println!("{}", dir.display());
    Ok(())
}

async fn cmd_pin(engine: &VaultEngine, target: &str, folder: Option<String>) -> Result<()> {
    let item = resolve_item(engine, target, parse_folder(folder).as_ref())?;
    let pinned = engine.toggle_pin(item.id).await?;
    println!(
        "{} {}",
        if pinned { "Pinned" } else { "Unpinned" },
        item.original_name
    );
    Ok(())
}

fn cmd_recent(engine: &VaultEngine, limit: Option<usize>) -> Result<()> {
    let items = engine.recent_items(limit);
    if items.is_empty() {
        println!("Nothing opened yet.");
    }
    for item in &items {
        println!("{:>4}x  {}", engine.open_count(&item.id), item.original_name);
    }
    Ok(())
}

fn cmd_dupes(engine: &VaultEngine) -> Result<()> {
    let groups = engine.find_exact_duplicates();
    if groups.is_empty() {
        println!("No duplicates.");
        return Ok(());
    }
    for (n, group) in groups.iter().enumerate() {
        println!("Group {} ({} copies):", n + 1, group.len());
        for item in group {
            print_item(engine, item);
        }
    }
    Ok(())
}

async fn cmd_stats(engine: &VaultEngine) -> Result<()> {
    let snapshot = engine.snapshot();
    let stored = engine.total_storage_bytes().await?;

    println!("Vault: {}", engine.config().root.display());
    println!("  Items: {}", snapshot.items.len());
    println!("  Folders: {}", snapshot.folders.len());
    println!("  Content: {}", format_size(snapshot.logical_bytes()));
    println!("  Stored (encrypted): {}", format_size(stored));
    for (kind, stats) in engine.breakdown_by_type() {
        println!(
            "    {:<10} {:>5}  {}",
            format!("{:?}", kind),
            stats.count,
            format_size(stats.bytes)
        );
    }
    match engine.device_storage().await {
        Ok(disk) => println!(
            "  Device: {} free of {} ({})",
            format_size(disk.available_bytes),
            format_size(disk.total_bytes),
            disk.mount_point.display()
        ),
        Err(e) => debug!(error = %e, "Device storage unavailable"),
    }
    Ok(())
}

async fn cmd_passcode(engine: &VaultEngine, action: PasscodeAction) -> Result<()> {
    match action {
        PasscodeAction::Set => {
            let passcode = prompt_passcode("New passcode: ")?;
            let confirm = prompt_passcode("Confirm passcode: ")?;
            if *passcode != *confirm {
                anyhow::bail!("Passcodes do not match");
            }
            if passcode.is_empty() {
                anyhow::bail!("Passcode cannot be empty");
            }
            engine
                .key_store()
                .set_passcode(&passcode)
                .await
                .context("Failed to set passcode")?;
            println!("Passcode set.");
        }
        PasscodeAction::Clear => {
            engine
                .key_store()
                .clear_passcode()
                .await
                .context("Failed to clear passcode")?;
            println!("Passcode cleared.");
        }
    }
    Ok(())
}

/// Wipe without preparing; a vault with a lost key can still be reset.
async fn cmd_wipe(root: &Path, yes: bool) -> Result<()> {
    if !yes {
        anyhow::bail!("This destroys every item and the key; pass --yes to confirm");
    }
    let engine = build_engine(root)?;
    if engine.key_store().has_passcode().await? {
        let passcode = prompt_passcode("Passcode: ")?;
        if !engine.key_store().verify_passcode(&passcode).await? {
            anyhow::bail!("Wrong passcode");
        }
    }
    engine.wipe_all_data().await.context("Failed to wipe vault")?;
    println!("Vault wiped.");
    Ok(())
}
