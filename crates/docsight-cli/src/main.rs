mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::analyze::AnalyzeArgs;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Stream an analysis of a text file from a docsight server
    Analyze(AnalyzeArgs),

    /// List the available analysis actions
    Actions {
        /// Print the actions as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Analyze(args) => commands::analyze::execute(args).await,
        Command::Actions { json } => commands::actions::execute(json),
    }
}
