/*!
Daybook CLI - Command-line interface for the daybook diary engine.

Manages a diary collection stored in a local JSON file: writing, listing,
editing and deleting entries, and backing the collection up to dated local
files or a locally mounted drive folder.
*/

use clap::{Parser, Subcommand};
use daybook_core::{
    BackupConfig, BackupEngine, Entry, EntryStore, ExportOutcome, FileArea, FolderDrive,
    OffloadDispatcher, RestoreOutcome, StorageArea, UploadOutcome, REMOTE_BACKUP_NAME,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tabled::{Table, Tabled};
use tracing::info;

#[derive(Parser)]
#[command(name = "daybook")]
#[command(about = "CLI for the daybook diary and backup engine")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Directory holding the diary storage file and local backups
    #[arg(short, long, global = true, default_value = "./daybook")]
    data_dir: PathBuf,

    /// Locally mounted drive folder for remote backups
    #[arg(long, global = true)]
    drive_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a new diary entry
    Add {
        /// Entry text
        content: String,
    },
    /// List entries, newest first
    List {
        /// Show full entry text instead of a preview
        #[arg(short, long)]
        full: bool,
    },
    /// Rewrite the text of an existing entry
    Edit {
        /// Entry id (epoch milliseconds)
        id: i64,
        /// Replacement text
        content: String,
    },
    /// Delete an entry
    Delete {
        /// Entry id (epoch milliseconds)
        id: i64,
        /// Skip confirmation prompt
        #[arg(short, long)]
        force: bool,
    },
    /// Export all entries to a dated backup file
    Export,
    /// Restore entries from a backup file
    Import {
        /// Backup file to restore from
        file: PathBuf,
        /// Overwrite existing entries without asking
        #[arg(short, long)]
        yes: bool,
    },
    /// Upload the collection to the drive folder
    Upload,
    /// Download the drive backup and restore it
    Download {
        /// Overwrite existing entries without asking
        #[arg(short, long)]
        yes: bool,
    },
}

#[derive(Tabled)]
struct EntryRow {
    #[tabled(rename = "ID")]
    id: i64,
    #[tabled(rename = "Date")]
    date: String,
    #[tabled(rename = "Entry")]
    content: String,
    #[tabled(rename = "Images")]
    images: usize,
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose);

    let drive_dir = cli
        .drive_dir
        .clone()
        .unwrap_or_else(|| cli.data_dir.join("drive"));

    let area: Arc<dyn StorageArea> = Arc::new(FileArea::open(cli.data_dir.join("storage.json"))?);
    let store = Arc::new(EntryStore::new(area));
    let engine = BackupEngine::new(
        Arc::clone(&store),
        OffloadDispatcher::global(),
        Arc::new(FolderDrive::new(drive_dir)),
        BackupConfig::new(cli.data_dir.join("backups")),
    )?;

    // Execute command
    match cli.command {
        Commands::Add { content } => add_entry(&store, content)?,
        Commands::List { full } => list_entries(&store, full),
        Commands::Edit { id, content } => edit_entry(&store, id, content)?,
        Commands::Delete { id, force } => delete_entry(&store, id, force)?,
        Commands::Export => export_entries(&engine).await?,
        Commands::Import { file, yes } => import_entries(&engine, &file, yes).await?,
        Commands::Upload => upload_entries(&engine).await?,
        Commands::Download { yes } => download_entries(&engine, yes).await?,
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug"))
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn add_entry(store: &EntryStore, content: String) -> Result<(), anyhow::Error> {
    if content.trim().is_empty() {
        return Err(anyhow::anyhow!("entry text must not be empty"));
    }

    let entry = Entry::new(content);
    let id = entry.id;
    store.save(entry);
    println!("✓ Entry {id} saved");
    Ok(())
}

fn list_entries(store: &EntryStore, full: bool) {
    let entries = store.entries();
    if entries.is_empty() {
        println!("No entries found");
        return;
    }

    let rows: Vec<EntryRow> = entries
        .iter()
        .map(|entry| EntryRow {
            id: entry.id,
            date: entry.date.clone(),
            content: if full {
                entry.content.clone()
            } else {
                preview(&entry.content)
            },
            images: entry.images.as_ref().map_or(0, Vec::len),
        })
        .collect();

    let table = Table::new(rows);
    println!("{table}");
}

fn edit_entry(store: &EntryStore, id: i64, content: String) -> Result<(), anyhow::Error> {
    if content.trim().is_empty() {
        return Err(anyhow::anyhow!("entry text must not be empty"));
    }

    if !store.update_content(id, content) {
        return Err(anyhow::anyhow!("no entry with id {id}"));
    }
    println!("✓ Entry {id} updated");
    Ok(())
}

fn delete_entry(store: &EntryStore, id: i64, force: bool) -> Result<(), anyhow::Error> {
    if !force && !confirm(&format!("Delete entry '{id}'?"))? {
        println!("Deletion cancelled");
        return Ok(());
    }

    if !store.delete(id) {
        return Err(anyhow::anyhow!("no entry with id {id}"));
    }
    println!("✓ Entry deleted");
    Ok(())
}

async fn export_entries(engine: &BackupEngine) -> Result<(), anyhow::Error> {
    match engine.export().await? {
        ExportOutcome::NoData => println!("No entries to export"),
        ExportOutcome::Written { path, savings } => {
            println!(
                "✓ Backup written to {} ({})",
                path.display(),
                format_size(savings.encoded_bytes as u64)
            );
            println!(
                "  Space saved by the compact form: {:.1}%",
                savings.percent_saved()
            );
        }
    }
    Ok(())
}

async fn import_entries(
    engine: &BackupEngine,
    file: &Path,
    yes: bool,
) -> Result<(), anyhow::Error> {
    info!("Restoring from {}", file.display());

    let outcome = engine
        .import(file, move || {
            yes || ask_overwrite("Importing will replace your current entries. Continue?")
        })
        .await?;
    report_restore(outcome);
    Ok(())
}

async fn upload_entries(engine: &BackupEngine) -> Result<(), anyhow::Error> {
    match engine.upload().await? {
        UploadOutcome::NoData => println!("No entries to upload"),
        UploadOutcome::Uploaded { savings } => {
            println!(
                "✓ Backup uploaded as {REMOTE_BACKUP_NAME} ({})",
                format_size(savings.encoded_bytes as u64)
            );
            println!(
                "  Space saved by the compact form: {:.1}%",
                savings.percent_saved()
            );
        }
    }
    Ok(())
}

async fn download_entries(engine: &BackupEngine, yes: bool) -> Result<(), anyhow::Error> {
    let outcome = engine
        .download(move || {
            yes || ask_overwrite("Downloading will replace your current entries. Continue?")
        })
        .await?;
    report_restore(outcome);
    Ok(())
}

fn report_restore(outcome: RestoreOutcome) {
    match outcome {
        RestoreOutcome::Cancelled => println!("Restore cancelled"),
        RestoreOutcome::Imported { count } => println!("✓ Restored {count} entries"),
    }
}

/// Prompt failures count as a decline; restores never proceed unconfirmed.
fn ask_overwrite(question: &str) -> bool {
    confirm(question).unwrap_or(false)
}

fn confirm(question: &str) -> Result<bool, anyhow::Error> {
    print!("{question} (y/N): ");
    use std::io::{self, Write};
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;

    Ok(input.trim().to_lowercase().starts_with('y'))
}

fn preview(content: &str) -> String {
    const PREVIEW_CHARS: usize = 48;

    let flat = content.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= PREVIEW_CHARS {
        return flat;
    }
    let cut: String = flat.chars().take(PREVIEW_CHARS).collect();
    format!("{cut}...")
}

fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.1} {}", size, UNITS[unit_index])
    }
}
