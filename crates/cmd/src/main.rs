// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use cmd::commands;
use cmd::common::{ClientContext, FormatChoice};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(name = "taiga")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (defaults to ~/.taiga/config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Cache directory, overriding the configuration
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Use only locally cached data
    #[arg(long, global = true)]
    offline: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve identifiers to their canonical datafile identifiers
    Resolve {
        /// Identifiers of the form permaname.version[/filename]
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Download or convert a datafile and print the local path
    Fetch {
        id: String,
        /// Local format; defaults to the first one the file allows
        #[arg(short, long, value_enum)]
        format: Option<FormatChoice>,
    },
    /// Show the storage format and the local formats of a datafile
    Formats { id: String },
    /// Print metadata of a dataset, a dataset version, or a datafile as JSON
    Metadata {
        /// permaname, permaname.version, or permaname.version/filename
        target: String,
    },
    /// Print the identifier of the newest version that is not deleted
    Latest { permaname: String },
    /// Print the first rows of a matrix or table datafile
    Show {
        id: String,
        #[arg(short = 'n', long, default_value_t = 10)]
        limit: usize,
    },
}

#[allow(clippy::print_stdout)]
fn print_line(line: &str) {
    println!("{line}");
}

fn main() -> Result<()> {
    diagnostics::init_diagnostics();

    let cli = Cli::parse();
    let context = ClientContext {
        config_path: cli.config,
        cache_dir: cli.cache_dir,
        offline: cli.offline,
    };
    let client = context.open_client()?;

    match &cli.command {
        Commands::Resolve { ids } => commands::resolve_command(&client, ids, print_line),
        Commands::Fetch { id, format } => {
            commands::fetch_command(&client, id, format.map(Into::into), print_line)
        }
        Commands::Formats { id } => commands::formats_command(&client, id, print_line),
        Commands::Metadata { target } => commands::metadata_command(&client, target, print_line),
        Commands::Latest { permaname } => commands::latest_command(&client, permaname, print_line),
        Commands::Show { id, limit } => commands::show_command(&client, id, *limit, print_line),
    }
}
