use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "crewd",
    about = "MCP orchestration server for evolving agent crews",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the server on the configured transport (default).
    Serve,
    /// Check store connectivity and configuration, then exit.
    Doctor,
    /// Create the database schema and bootstrap the admin key.
    InitDb,
    /// Mint a named API key and print it once.
    MintKey {
        /// Client identifier recorded with the key.
        #[arg(long)]
        client: String,
        /// Permission globs, e.g. "get_*" or "*". Repeatable.
        #[arg(long = "permission", default_value = "*")]
        permissions: Vec<String>,
    },
}
