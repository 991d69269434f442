//! CLI argument definitions for tcdock-daemon.
//!
//! Uses `clap` v4 derive macros to parse command-line arguments.

use std::path::PathBuf;

use clap::Parser;

/// Per-container traffic shaping daemon for Docker hosts.
///
/// Applies `org.label-schema.tc.*` label policies to opted-in containers
/// and keeps them in sync with container start/stop events.
#[derive(Parser, Debug)]
#[command(name = "tcdock-daemon")]
#[command(version, about, long_about = None)]
pub struct DaemonCli {
    /// Enable debug logging (every host command is logged).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(short, long)]
    pub debug: bool,

    /// Path to tcdock.toml configuration file.
    ///
    /// Without this flag `/etc/tcdock/tcdock.toml` is used when present,
    /// built-in defaults otherwise.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Override log format (json, pretty).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_format: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_flags() {
        let cli = DaemonCli::try_parse_from(["tcdock-daemon"]).unwrap();
        assert!(!cli.debug);
        assert!(cli.config.is_none());
        assert!(cli.log_format.is_none());
    }

    #[test]
    fn short_flags() {
        let cli = DaemonCli::try_parse_from(["tcdock-daemon", "-d", "-c", "/tmp/tcdock.toml"]).unwrap();
        assert!(cli.debug);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/tcdock.toml")));
    }

    #[test]
    fn long_flags() {
        let cli = DaemonCli::try_parse_from([
            "tcdock-daemon",
            "--debug",
            "--config",
            "tcdock.toml",
            "--log-format",
            "json",
        ])
        .unwrap();
        assert!(cli.debug);
        assert_eq!(cli.log_format.as_deref(), Some("json"));
    }

    #[test]
    fn rejects_unknown_flag() {
        assert!(DaemonCli::try_parse_from(["tcdock-daemon", "--verbose"]).is_err());
    }
}
