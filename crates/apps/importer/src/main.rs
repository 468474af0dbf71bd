mod commands;

use app_state::load_app_settings;
use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser, Debug)]
#[command(version, about = "Imports photo exports and folders into the media server", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Import every complete takeout export found in the import folder.
    Takeout {
        /// Keep the archive parts even after a clean import.
        #[clap(long, default_value_t = false, action)]
        keep_sources: bool,
    },
    /// Import specific archive parts of one export.
    Archive {
        #[clap(required = true)]
        parts: Vec<PathBuf>,
        #[clap(long, default_value_t = false, action)]
        delete: bool,
    },
    /// Import a folder tree, e.g. a memory card.
    Folder {
        path: PathBuf,
        #[clap(long, default_value = "folder")]
        source_kind: String,
        /// Device label placed in the session tag.
        #[clap(long)]
        label: Option<String>,
        #[clap(long)]
        tag_prefix: Option<String>,
        /// Copy files the server did not take into the extract folder.
        #[clap(long, default_value_t = false, action)]
        copy_failed: bool,
    },
    /// List recorded jobs with their current status.
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let settings = load_app_settings()?;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| settings.logging.level.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match Args::parse().command {
        Command::Takeout { keep_sources } => commands::takeout(settings, keep_sources).await,
        Command::Archive { parts, delete } => commands::archive(settings, &parts, delete).await,
        Command::Folder {
            path,
            source_kind,
            label,
            tag_prefix,
            copy_failed,
        } => {
            commands::folder(
                settings,
                &path,
                source_kind,
                label,
                tag_prefix,
                copy_failed.then_some(true),
            )
            .await
        }
        Command::Status => commands::status(&settings),
    }
}
