use std::path::PathBuf;

use clap::Parser;

use crate::config::SessionConfig;
use crate::error::ConfigError;
use crate::monitor::DetectionMode;

#[derive(Parser, Debug)]
#[command(name = "hot-patch")]
#[command(version)]
#[command(about = "Run a faulty service, detect its failures and hot-patch it without a restart")]
pub struct Args {
    /// TOML config file; command-line flags override its values
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    /// Failures to observe before patching
    #[arg(long)]
    pub threshold: Option<u64>,

    /// The faulty operation fails on every call divisible by this
    #[arg(long)]
    pub modulus: Option<u64>,

    /// Monitor poll interval in milliseconds
    #[arg(long)]
    pub poll_ms: Option<u64>,

    /// Worker iteration interval in milliseconds
    #[arg(long)]
    pub work_ms: Option<u64>,

    /// Total session duration in milliseconds
    #[arg(long)]
    pub duration_ms: Option<u64>,

    /// How the monitor derives failure evidence
    #[arg(long, value_enum)]
    pub detection: Option<DetectionMode>,

    /// Revert all patches once the session ends
    #[arg(long)]
    pub revert_on_exit: bool,

    /// Print the session report as JSON instead of a summary
    #[arg(long)]
    pub json: bool,

    /// Enable debug logging (RUST_LOG takes precedence)
    #[arg(long, short)]
    pub verbose: bool,
}

impl Args {
    /// Build the effective config: file (or defaults), then flag overrides, then validation.
    ///
    /// # Errors
    /// Any `ConfigError` from loading the file or validating the result.
    pub fn session_config(&self) -> Result<SessionConfig, ConfigError> {
        let mut cfg = match &self.config {
            Some(path) => SessionConfig::load(path)?,
            None => SessionConfig::default(),
        };
        self.apply_overrides(&mut cfg);
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_overrides(&self, cfg: &mut SessionConfig) {
        if let Some(v) = self.threshold {
            cfg.failure_threshold = v;
        }
        if let Some(v) = self.modulus {
            cfg.failure_modulus = v;
        }
        if let Some(v) = self.poll_ms {
            cfg.poll_interval_ms = v;
        }
        if let Some(v) = self.work_ms {
            cfg.work_interval_ms = v;
        }
        if let Some(v) = self.duration_ms {
            cfg.session_duration_ms = v;
        }
        if let Some(v) = self.detection {
            cfg.detection = v;
        }
        if self.revert_on_exit {
            cfg.revert_on_exit = true;
        }
    }

    /// Default log filter when `RUST_LOG` is unset.
    pub fn log_filter(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else {
            "info"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_args_parse_minimal() {
        let args = Args::parse_from(["hot-patch"]);
        assert!(args.config.is_none());
        assert!(args.threshold.is_none());
        assert!(!args.json);
        assert!(!args.verbose);
        assert_eq!(args.session_config().unwrap(), SessionConfig::default());
    }

    #[test]
    fn test_flags_override_defaults() {
        let args = Args::parse_from([
            "hot-patch",
            "--threshold",
            "2",
            "--modulus",
            "4",
            "--duration-ms",
            "500",
            "--detection",
            "failure-events",
            "--revert-on-exit",
        ]);
        let cfg = args.session_config().unwrap();
        assert_eq!(cfg.failure_threshold, 2);
        assert_eq!(cfg.failure_modulus, 4);
        assert_eq!(cfg.session_duration_ms, 500);
        assert_eq!(cfg.detection, DetectionMode::FailureEvents);
        assert!(cfg.revert_on_exit);
    }

    #[test]
    fn test_flags_override_config_file() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(file, "failure_threshold = 9\npoll_interval_ms = 20").expect("write");
        let path = file.path().to_str().expect("utf-8 path").to_string();

        let args = Args::parse_from(["hot-patch", "--config", &path, "--threshold", "4"]);
        let cfg = args.session_config().unwrap();
        assert_eq!(cfg.failure_threshold, 4);
        assert_eq!(cfg.poll_interval_ms, 20);
    }

    #[test]
    fn test_invalid_override_rejected() {
        let args = Args::parse_from(["hot-patch", "--modulus", "1"]);
        assert!(matches!(
            args.session_config(),
            Err(ConfigError::Invalid { field: "failure_modulus", .. })
        ));
    }

    #[test]
    fn test_unknown_detection_rejected_by_parser() {
        assert!(Args::try_parse_from(["hot-patch", "--detection", "psychic"]).is_err());
    }

    #[test]
    fn test_log_filter_follows_verbose() {
        assert_eq!(Args::parse_from(["hot-patch"]).log_filter(), "info");
        assert_eq!(Args::parse_from(["hot-patch", "-v"]).log_filter(), "debug");
    }
}
