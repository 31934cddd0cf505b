mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rua-ext")]
#[command(about = "CLI tool for Rua extension authors")]
#[command(version)]
struct Cli {
    /// Log host internals at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate an extension directory's manifest.json
    Validate {
        /// Extension directory (default: current directory)
        #[arg(default_value = ".")]
        path: PathBuf,
    },
    /// Evaluate a permission check against a manifest
    Check {
        /// Extension directory
        #[arg(long, default_value = ".")]
        extension: PathBuf,
        #[command(subcommand)]
        kind: CheckKind,
    },
    /// Encode or decode extension resource URLs
    Url {
        #[command(subcommand)]
        kind: UrlKind,
    },
    /// Pack an extension directory into a .rua archive
    Pack {
        /// Extension directory (default: current directory)
        #[arg(default_value = ".")]
        path: PathBuf,
        /// Output file (default: <id>-<version>.rua in the current directory)
        #[arg(long, short)]
        out: Option<PathBuf>,
    },
    /// List extensions installed in a data directory
    List {
        /// Host data directory (default: the platform data directory)
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
    /// Install from a directory, a .rua archive, or github:owner/repo[@tag]
    Install {
        source: String,
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
    /// Remove an installed extension and its storage
    Uninstall {
        id: String,
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum CheckKind {
    /// Simple flag check (clipboard, notification, storage, ...)
    Flag { permission: String },
    /// Path-scoped check for fs:read / fs:write
    Path { permission: String, path: String },
    /// Shell check for a program and its arguments
    Shell {
        program: String,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

#[derive(Subcommand)]
enum UrlKind {
    /// Frame source URL for a UI entry
    Encode {
        /// Extension directory
        extension: PathBuf,
        /// UI entry relative to the extension directory
        entry: String,
        #[arg(long, default_value_t = 0)]
        refresh_key: u64,
    },
    /// Resolve an ext:// URL to the file it serves
    Decode { url: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Validate { path } => commands::validate::run(&path),
        Commands::Check { extension, kind } => match kind {
            CheckKind::Flag { permission } => commands::check::run_flag(&extension, &permission),
            CheckKind::Path { permission, path } => {
                commands::check::run_path(&extension, &permission, &path)
            }
            CheckKind::Shell { program, args } => {
                commands::check::run_shell(&extension, &program, &args)
            }
        },
        Commands::Url { kind } => match kind {
            UrlKind::Encode {
                extension,
                entry,
                refresh_key,
            } => commands::url::run_encode(&extension, &entry, refresh_key),
            UrlKind::Decode { url } => commands::url::run_decode(&url),
        },
        Commands::Pack { path, out } => commands::pack::run(&path, out.as_deref()),
        Commands::List { data_dir } => commands::installed::run_list(data_dir),
        Commands::Install { source, data_dir } => {
            commands::installed::run_install(data_dir, &source).await
        }
        Commands::Uninstall { id, data_dir } => commands::installed::run_uninstall(data_dir, &id),
    }
}
