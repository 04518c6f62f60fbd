use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the chat/suggestion HTTP daemon
    Daemon {},

    /// Embed the suggestion corpus and upsert it into the vector index.
    /// Skips work if the index already holds records.
    Ingest {},

    /// One-off suggestion lookup against the vector index
    Suggest {
        /// The query text
        query: String,

        /// Maximum number of suggestions
        #[clap(short = 'k', long, default_value = "3")]
        top_k: usize,
    },
}
