//! Command-line argument parsing.
//!
//! Usage:
//!   ani [-c <file>] [--slice N] [--stress P] [--seed S] [--tick-ms MS]
//!       [--max-rounds N] [--check] [-v...] [-q] <script>...

use std::path::PathBuf;

use clap::{ArgAction, Parser};

use crate::config::{self, Config, ConfigError};
use crate::error::{Error, Result};

// ── Public types ──────────────────────────────────────────────────────────────

#[derive(Debug, Parser)]
#[command(name = "ani", version, about = "Run ani animation scripts as cooperative threads")]
pub struct CliArgs {
    /// Scripts to run, one thread each.
    #[arg(required = true)]
    pub scripts: Vec<PathBuf>,

    /// Config file (default: the platform config dir's `ani/config`, then `./.anirc`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Skip the config file search.
    #[arg(long, conflicts_with = "config")]
    pub no_config: bool,

    /// Leaf evaluations per time slice.
    #[arg(long)]
    pub slice: Option<u32>,

    /// Probability of a forced switch at each leaf.
    #[arg(long, value_parser = parse_probability)]
    pub stress: Option<f64>,

    /// Seed for the stress generator.
    #[arg(long)]
    pub seed: Option<u64>,

    /// Milliseconds between scheduler rounds.
    #[arg(long)]
    pub tick_ms: Option<u64>,

    /// Stop after this many scheduler rounds.
    #[arg(long)]
    pub max_rounds: Option<u64>,

    /// Compile and type-check only.
    #[arg(long)]
    pub check: bool,

    /// More logging (repeatable).
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Errors only.
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,
}

fn parse_probability(s: &str) -> std::result::Result<f64, String> {
    let p: f64 = s.parse().map_err(|_| format!("'{s}' is not a number"))?;
    if (0.0..=1.0).contains(&p) {
        Ok(p)
    } else {
        Err(format!("{p} is not between 0 and 1"))
    }
}

// ── Config resolution ─────────────────────────────────────────────────────────

impl CliArgs {
    /// Which config file to load, if any.
    pub fn config_path(&self) -> Option<PathBuf> {
        if self.no_config {
            return None;
        }
        self.config.clone().or_else(config::default_path)
    }

    /// Load the config file and apply command-line overrides on top.
    ///
    /// An explicit `-c` file that cannot be read is an error; per-line
    /// problems inside it are returned for the caller to report.
    pub fn resolve_config(&self) -> Result<(Config, Vec<ConfigError>)> {
        let (mut cfg, errors) = match self.config_path() {
            Some(path) => Config::load_file(&path).map_err(|source| Error::Io { path, source })?,
            None => (Config::new(), Vec::new()),
        };
        self.apply_overrides(&mut cfg);
        Ok((cfg, errors))
    }

    pub fn apply_overrides(&self, cfg: &mut Config) {
        if let Some(n) = self.slice {
            cfg.slice = n;
        }
        if let Some(p) = self.stress {
            cfg.stress = p;
        }
        if let Some(s) = self.seed {
            cfg.seed = s;
        }
        if let Some(ms) = self.tick_ms {
            cfg.tick_ms = ms;
        }
        if self.max_rounds.is_some() {
            cfg.max_rounds = self.max_rounds;
        }
    }

    /// Default log filter directive for `-v`/`-q`.
    pub fn log_level(&self) -> &'static str {
        if self.quiet {
            return "error";
        }
        match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn parse(argv: &[&str]) -> CliArgs {
        CliArgs::try_parse_from(std::iter::once("ani").chain(argv.iter().copied())).unwrap()
    }

    #[test]
    fn scripts_are_required() {
        assert!(CliArgs::try_parse_from(["ani"]).is_err());
    }

    #[test]
    fn plain_scripts() {
        let a = parse(&["a.ani", "b.ani"]);
        assert_eq!(a.scripts, [PathBuf::from("a.ani"), PathBuf::from("b.ani")]);
        assert!(!a.check);
        assert_eq!(a.log_level(), "warn");
    }

    #[test]
    fn verbosity_counts() {
        assert_eq!(parse(&["-vv", "x.ani"]).log_level(), "debug");
        assert_eq!(parse(&["-q", "x.ani"]).log_level(), "error");
        assert!(CliArgs::try_parse_from(["ani", "-q", "-v", "x.ani"]).is_err());
    }

    #[test]
    fn stress_is_range_checked() {
        assert_eq!(parse(&["--stress", "0.3", "x.ani"]).stress, Some(0.3));
        assert!(CliArgs::try_parse_from(["ani", "--stress", "2", "x.ani"]).is_err());
    }

    #[test]
    fn flags_override_config_file() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "/set slice=32\n/set seed=9\n/set bogus=1").unwrap();
        let path = f.path().to_str().unwrap().to_owned();
        let a = parse(&["-c", &path, "--slice", "8", "--check", "x.ani"]);
        let (cfg, errs) = a.resolve_config().unwrap();
        assert_eq!(errs.len(), 1);
        assert_eq!(cfg.slice, 8);
        assert_eq!(cfg.seed, 9);
        assert!(a.check);
    }

    #[test]
    fn missing_explicit_config_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing");
        let a = parse(&["-c", path.to_str().unwrap(), "x.ani"]);
        assert!(matches!(a.resolve_config(), Err(Error::Io { .. })));
    }

    #[test]
    fn no_config_uses_defaults() {
        let a = parse(&["--no-config", "--max-rounds", "3", "x.ani"]);
        let (cfg, errs) = a.resolve_config().unwrap();
        assert!(errs.is_empty());
        assert_eq!(cfg.max_rounds, Some(3));
        assert_eq!(cfg.slice, config::DEFAULT_SLICE);
    }
}
