// src/cli/mod.rs — CLI definition (clap derive)

pub mod progress;
pub mod run;

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "delve",
    about = "Iterative research: plan angles, search, verify, repeat",
    version
)]
pub struct Cli {
    /// Research question
    #[arg(trailing_var_arg = true, required = true)]
    pub query: Vec<String>,

    /// Max research iterations
    #[arg(short, long)]
    pub iterations: Option<u8>,

    /// Confidence needed to stop early (0.0-1.0)
    #[arg(short, long)]
    pub confidence: Option<f32>,

    /// Angles researched per iteration
    #[arg(short, long)]
    pub angles: Option<usize>,

    /// Stop iterating once spend reaches this many USD
    #[arg(long)]
    pub cost_limit: Option<f64>,

    /// Config file path
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Write the report to a file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Write the usage history (JSON) to a file
    #[arg(long)]
    pub usage_out: Option<PathBuf>,

    /// Suppress progress output (only emit the report)
    #[arg(long)]
    pub quiet: bool,

    /// Debug logging
    #[arg(short, long, conflicts_with = "quiet")]
    pub verbose: bool,
}

impl Cli {
    pub fn query_text(&self) -> String {
        self.query.join(" ").trim().to_string()
    }

    pub fn log_level(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else {
            "warn"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_query_words() {
        let cli = Cli::parse_from(["delve", "rust", "async", "runtimes"]);
        assert_eq!(cli.query_text(), "rust async runtimes");
        assert!(cli.iterations.is_none());
        assert_eq!(cli.log_level(), "warn");
    }

    #[test]
    fn test_parse_overrides() {
        let cli = Cli::parse_from([
            "delve", "-i", "2", "-c", "0.7", "-a", "3", "--cost-limit", "0.25",
            "-o", "out.md", "--verbose", "quantum", "computing",
        ]);
        assert_eq!(cli.iterations, Some(2));
        assert_eq!(cli.confidence, Some(0.7));
        assert_eq!(cli.angles, Some(3));
        assert_eq!(cli.cost_limit, Some(0.25));
        assert_eq!(cli.output, Some(PathBuf::from("out.md")));
        assert_eq!(cli.query_text(), "quantum computing");
        assert_eq!(cli.log_level(), "debug");
    }

    #[test]
    fn test_query_required() {
        assert!(Cli::try_parse_from(["delve"]).is_err());
    }

    #[test]
    fn test_quiet_conflicts_with_verbose() {
        assert!(Cli::try_parse_from(["delve", "--quiet", "--verbose", "q"]).is_err());
    }
}
