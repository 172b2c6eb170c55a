// CLI subcommand dispatch.

use clap::Subcommand;

use crate::connect::GlobalArgs;
use crate::output::OutputFormat;

pub mod append;
pub mod get;
pub mod set;
pub mod watch;

#[derive(Subcommand)]
pub enum Command {
    /// Print the value at a field path
    Get(get::GetArgs),
    /// Write a value at a field path
    Set(set::SetArgs),
    /// Append text to a text field
    Append(append::AppendArgs),
    /// Follow the document and print every change
    Watch(watch::WatchArgs),
}

pub async fn run(cmd: Command, global: &GlobalArgs, format: OutputFormat) -> anyhow::Result<()> {
    match cmd {
        Command::Get(args) => get::run(args, global, format).await,
        Command::Set(args) => set::run(args, global, format).await,
        Command::Append(args) => append::run(args, global, format).await,
        Command::Watch(args) => watch::run(args, global, format).await,
    }
}
