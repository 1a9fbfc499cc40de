// SPDX-License-Identifier: Apache-2.0

use clap::Args;
use std::path::PathBuf;

#[derive(Debug, Args, Clone)]
pub struct AgentRun {
    /// Configuration file
    #[arg(long, short = 'c', env = "COURIER_CONFIG", default_value = "/etc/courier/courier.toml")]
    pub config: PathBuf,

    /// Maximum time to wait for the registrar's final flush after shutdown
    /// was requested, on top of the configured shutdown timeout
    #[arg(long, env = "COURIER_EXIT_GRACE", default_value = "5s", value_parser = humantime::parse_duration)]
    pub exit_grace: std::time::Duration,
}

#[derive(Debug, Args, Clone)]
pub struct CheckArgs {
    /// Configuration file
    #[arg(long, short = 'c', env = "COURIER_CONFIG", default_value = "/etc/courier/courier.toml")]
    pub config: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::time::Duration;

    #[derive(Debug, Parser)]
    struct Cli {
        #[command(flatten)]
        run: AgentRun,
    }

    #[test]
    fn test_parse_run_args() {
        let cli = Cli::try_parse_from(["courier", "--config", "/tmp/c.toml", "--exit-grace", "2s"])
            .unwrap();
        assert_eq!(cli.run.config, PathBuf::from("/tmp/c.toml"));
        assert_eq!(cli.run.exit_grace, Duration::from_secs(2));
    }

    #[test]
    fn test_exit_grace_compound_duration() {
        let cli = Cli::try_parse_from(["courier", "--exit-grace", "1m 30s"]).unwrap();
        assert_eq!(cli.run.exit_grace, Duration::from_secs(90));
    }

    #[test]
    fn test_invalid_exit_grace() {
        assert!(Cli::try_parse_from(["courier", "--exit-grace", "soon"]).is_err());
    }
}
