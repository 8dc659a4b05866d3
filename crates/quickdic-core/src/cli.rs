use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(
    name = "quickdic",
    author,
    version,
    about = "Throttled dictionary attacks against captured WPA handshakes"
)]
pub struct Cli {
    /// Override the quickdic root (defaults to $QUICKDIC_ROOT or /etc/quickdic)
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    /// Output format for command responses
    #[arg(
        long = "output",
        value_enum,
        default_value_t = OutputFormat::Text,
        global = true
    )]
    pub output_format: OutputFormat,

    /// Shorthand for `--output json`
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Crack one capture now
    Run(RunArgs),
    /// Crack the oldest unprocessed capture in the handshake directory
    Next,
    /// Show the wordlist batches a run would use
    Plan,
    /// Show scheduler state and counters
    Status,
    /// Show the most recent security audit records
    Audit(AuditArgs),
    /// Show the last cracked network
    LastCracked(LastCrackedArgs),
    /// Check that the cracking tool and wordlists are usable
    Check,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Capture file to crack
    #[arg(long)]
    pub capture: PathBuf,

    /// BSSID to attack; probed from the capture when omitted
    #[arg(long)]
    pub target: Option<String>,
}

#[derive(Args, Debug)]
pub struct AuditArgs {
    /// Number of records to show
    #[arg(long, default_value_t = 10)]
    pub lines: usize,
}

#[derive(Args, Debug)]
pub struct LastCrackedArgs {
    /// Potfiles to consider (defaults to the configured potfile plus any
    /// *.potfile in the handshake directory)
    #[arg(long = "potfile")]
    pub potfiles: Vec<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_with_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "quickdic",
            "run",
            "--capture",
            "/tmp/a.pcap",
            "--root",
            "/srv/q",
            "--json",
        ])
        .unwrap();
        assert!(cli.json);
        assert_eq!(cli.root, Some(PathBuf::from("/srv/q")));
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.capture, PathBuf::from("/tmp/a.pcap"));
                assert!(args.target.is_none());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn audit_defaults_to_ten_lines() {
        let cli = Cli::try_parse_from(["quickdic", "audit"]).unwrap();
        assert_eq!(cli.output_format, OutputFormat::Text);
        assert!(matches!(cli.command, Commands::Audit(AuditArgs { lines: 10 })));
    }

    #[test]
    fn run_requires_a_capture() {
        assert!(Cli::try_parse_from(["quickdic", "run"]).is_err());
    }
}
