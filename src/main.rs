#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::uninlined_format_args,
    clippy::cast_precision_loss
)]

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use futures::stream::{self, StreamExt};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use netshelf::client::{ProtocolRegistry, RemoteFile};
use netshelf::profile::{Secret, ServerProfile};
use netshelf::session::SessionManager;
use netshelf::storage::LocalStorage;
use netshelf::transfer::{TransferCoordinator, TransferStatus};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to the server profiles file
    #[arg(long, default_value = "servers.json")]
    profiles: PathBuf,

    /// Name of the server profile to use (defaults to the first one)
    #[arg(long)]
    server: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List files on the server
    List {
        /// Directory to list (defaults to the profile root)
        path: Option<String>,
    },

    /// Download files from the server
    Download {
        /// Remote file paths
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Fetch a file for playback and print the local locator
    Play {
        /// Remote file path
        path: String,
    },

    /// List downloaded files
    Local,

    /// Remove a downloaded file by name
    Remove {
        /// File name as shown by `local`
        name: String,
    },

    /// Show configured server profiles
    Servers,
}

/// Number of downloads in flight at once.
const MAX_CONCURRENT_DOWNLOADS: usize = 4;

fn load_profiles(path: &PathBuf) -> Result<Vec<ServerProfile>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("could not read profiles file {:?}", path))?;
    let profiles: Vec<ServerProfile> =
        serde_json::from_str(&content).context("profiles file is not valid JSON")?;
    if profiles.is_empty() {
        return Err(anyhow!("profiles file {:?} contains no servers", path));
    }
    Ok(profiles)
}

fn select_profile(profiles: Vec<ServerProfile>, name: Option<&str>) -> Result<ServerProfile> {
    match name {
        None => profiles
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("no server profiles configured")),
        Some(name) => profiles
            .into_iter()
            .find(|p| p.name == name)
            .ok_or_else(|| anyhow!("no server profile named {name:?}")),
    }
}

/// Prompt for the password when the profile carries none.
fn ensure_password(profile: &mut ServerProfile) -> Result<()> {
    if profile.password.is_empty() {
        let password = rpassword::prompt_password(format!(
            "Password for {}@{}: ",
            profile.username, profile.host
        ))?;
        profile.password = Secret::new(password);
    }
    Ok(())
}

/// A minimal handle for a remote path given on the command line; fetch only
/// needs the path and a local file name.
fn remote_handle(path: &str) -> RemoteFile {
    let name = path.trim_end_matches('/').rsplit('/').next().unwrap_or(path);
    RemoteFile::file(name, path, None, None)
}

async fn connect(cli: &Cli) -> Result<(Arc<SessionManager>, TransferCoordinator)> {
    let profiles = load_profiles(&cli.profiles)?;
    let mut profile = select_profile(profiles, cli.server.as_deref())?;
    ensure_password(&mut profile)?;

    let registry = Arc::new(ProtocolRegistry::with_defaults());
    let session = Arc::new(SessionManager::new(registry));

    println!("Connecting to {} ({}) ...", profile.name, profile.url_string());
    session
        .connect(profile)
        .await
        .context("failed to connect")?;

    let storage = LocalStorage::with_default_dirs().context("could not set up local storage")?;
    let coordinator = TransferCoordinator::new(session.clone(), storage);
    Ok((session, coordinator))
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match &cli.command {
        Commands::Servers => {
            let profiles = load_profiles(&cli.profiles)?;
            println!("{:<20} {:<10} {}", "Name", "Protocol", "Address");
            println!("{}", "-".repeat(60));
            for profile in profiles {
                println!(
                    "{:<20} {:<10} {}",
                    profile.name,
                    profile.protocol().to_string(),
                    profile.url_string()
                );
            }
        }

        Commands::List { path } => {
            let (session, _) = connect(&cli).await?;
            let files = session.list_files(path.as_deref()).await?;

            let snapshot = session.snapshot();
            println!("Files in {}:", snapshot.current_path);
            println!("{:<50} {:>10} {:>20}", "Name", "Size", "Modified");
            println!("{}", "-".repeat(82));
            for file in files {
                let size = match (file.is_dir, file.size) {
                    (true, _) => "DIR".to_string(),
                    (false, Some(size)) => human_bytes::human_bytes(size as f64),
                    (false, None) => "-".to_string(),
                };
                let modified = file
                    .modified
                    .map(|m| m.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!("{:<50} {:>10} {:>20}", file.name, size, modified);
            }
        }

        Commands::Download { paths } => {
            let (_, coordinator) = connect(&cli).await?;
            let coordinator = Arc::new(coordinator);
            let multi = MultiProgress::new();
            let style = ProgressStyle::default_spinner();

            let results: Vec<bool> = stream::iter(paths.clone())
                .map(|path| {
                    let coordinator = coordinator.clone();
                    let bar = multi.add(ProgressBar::new_spinner().with_style(style.clone()));
                    async move {
                        let file = remote_handle(&path);
                        bar.set_message(format!("Downloading {}", file.name));
                        bar.enable_steady_tick(Duration::from_millis(100));
                        match coordinator.download(&file).await {
                            Ok(task) => {
                                let note = match task.status {
                                    TransferStatus::Completed => "done",
                                    _ => "unexpected status",
                                };
                                bar.finish_with_message(format!("{} {}", file.name, note));
                                true
                            }
                            Err(e) => {
                                bar.finish_with_message(format!("{} failed: {e}", file.name));
                                false
                            }
                        }
                    }
                })
                .buffer_unordered(MAX_CONCURRENT_DOWNLOADS)
                .collect()
                .await;

            let successful = results.iter().filter(|ok| **ok).count();
            println!("Downloaded {}/{} files", successful, results.len());
            if successful < results.len() {
                return Err(anyhow!("some downloads failed"));
            }
        }

        Commands::Play { path } => {
            let (_, coordinator) = connect(&cli).await?;
            let file = remote_handle(path);
            println!("Fetching {} for playback ...", file.name);
            let locator = coordinator.stream_for_playback(&file).await?;
            // The player takes it from here.
            println!("Ready: {}", locator.display());
        }

        Commands::Local => {
            let storage =
                LocalStorage::with_default_dirs().context("could not set up local storage")?;
            println!("Local downloads in {:?}:", storage.downloads_dir());
            for path in storage.list_downloads() {
                let size = std::fs::metadata(&path)
                    .map(|m| human_bytes::human_bytes(m.len() as f64))
                    .unwrap_or_else(|_| "-".to_string());
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default();
                println!("{:<50} {:>10}", name, size);
            }
        }

        Commands::Remove { name } => {
            let storage =
                LocalStorage::with_default_dirs().context("could not set up local storage")?;
            let target = storage
                .list_downloads()
                .into_iter()
                .find(|p| p.file_name().is_some_and(|n| n.to_string_lossy() == *name));
            match target {
                Some(path) => {
                    storage.delete(&path);
                    println!("Removed {name}");
                }
                None => println!("No local file named {name}"),
            }
        }
    }

    Ok(())
}
