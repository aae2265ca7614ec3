//! Command-line arguments for the `conductor` binary.

use std::path::PathBuf;

use clap::Parser;

/// Run one agent turn from the terminal.
#[derive(Parser, Debug)]
#[command(name = "conductor", version, about = "Run one agent turn against a model backend")]
pub struct Cli {
    /// Backend adapter (anthropic, openai)
    #[arg(short, long, default_value = "anthropic")]
    pub adapter: String,

    /// Model alias or id; the adapter default when omitted
    #[arg(short, long)]
    pub model: Option<String>,

    /// System prompt
    #[arg(short, long)]
    pub system: Option<String>,

    /// Working directory the tools are confined to
    #[arg(short = 'C', long)]
    pub working_dir: Option<PathBuf>,

    /// Lower the iteration ceiling for this turn
    #[arg(long)]
    pub max_iterations: Option<usize>,

    /// Only allow read-only tools and plan proposals
    #[arg(long)]
    pub plan: bool,

    /// Use non-streaming requests
    #[arg(long)]
    pub no_stream: bool,

    /// Approve every permission request without asking
    #[arg(short, long)]
    pub yes: bool,

    /// Print the final transcript as JSON
    #[arg(long)]
    pub json: bool,

    /// User prompt
    pub prompt: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flags_and_prompt() {
        let cli = Cli::parse_from(["conductor", "-a", "openai", "--plan", "-C", "/tmp", "list files"]);
        assert_eq!(cli.adapter, "openai");
        assert!(cli.plan);
        assert_eq!(cli.working_dir, Some(PathBuf::from("/tmp")));
        assert_eq!(cli.prompt, "list files");
        assert!(!cli.yes);
    }
}
