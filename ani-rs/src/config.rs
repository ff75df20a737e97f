//! `.anirc` configuration file parser.
//!
//! | Directive | Action |
//! |-----------|--------|
//! | `/set <name>=<value>` or `/set <name> <value>` | set a runtime option |
//! | Lines starting with `;` | comment, ignored |
//! | Any other `/command` | silently skipped |
//!
//! Recognised options:
//!
//! | Name | Type | Default | Meaning |
//! |------|------|---------|---------|
//! | `slice` | u32 | 256 | leaf evaluations per time slice |
//! | `stress` | 0..=1 | 0 | probability of a forced switch at each leaf |
//! | `seed` | u64 | 0 | seed for the stress generator |
//! | `tick_ms` | u64 | 0 | pause between scheduler rounds, 0 = unpaced |
//! | `max_rounds` | u64 | unlimited | stop the scheduler after this many rounds |

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;

use crate::script::SwitchPolicy;

pub const DEFAULT_SLICE: u32 = 256;

// ── Public API ────────────────────────────────────────────────────────────────

/// A non-fatal error encountered while loading a config file.
#[derive(Debug)]
pub struct ConfigError {
    pub line: usize,
    pub message: String,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

impl std::error::Error for ConfigError {}

/// Runtime options for the interpreter and scheduler.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub slice: u32,
    pub stress: f64,
    pub seed: u64,
    pub tick_ms: u64,
    pub max_rounds: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self { slice: DEFAULT_SLICE, stress: 0.0, seed: 0, tick_ms: 0, max_rounds: None }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse an `.anirc` string.
    ///
    /// Returns the config and a list of errors on recognised lines.  A bad
    /// line leaves the corresponding option at its previous value.
    pub fn load_str(s: &str) -> (Self, Vec<ConfigError>) {
        let mut config = Config::new();
        let mut errors = Vec::new();

        for (i, raw) in s.lines().enumerate() {
            let lineno = i + 1;
            let line = raw.trim();

            if line.is_empty() || line.starts_with(';') {
                continue;
            }

            let Some(rest) = line.strip_prefix('/') else { continue };

            let (cmd, args_str) = rest
                .split_once(|c: char| c.is_ascii_whitespace())
                .unwrap_or((rest, ""));

            if cmd == "set" {
                let tokens = split_args(args_str.trim());
                if let Err(msg) = parse_set(&tokens, &mut config) {
                    errors.push(ConfigError { line: lineno, message: msg });
                }
            }
        }

        (config, errors)
    }

    /// Read and parse a config file from disk.
    pub fn load_file(path: &Path) -> std::io::Result<(Self, Vec<ConfigError>)> {
        let s = std::fs::read_to_string(path)?;
        Ok(Self::load_str(&s))
    }

    /// Apply one `name = value` setting.
    pub fn set(&mut self, name: &str, value: &str) -> Result<(), String> {
        match name {
            "slice" => self.slice = parse_num(name, value)?,
            "stress" => {
                let p: f64 = parse_num(name, value)?;
                if !(0.0..=1.0).contains(&p) {
                    return Err(format!("stress: {p} is not a probability"));
                }
                self.stress = p;
            }
            "seed" => self.seed = parse_num(name, value)?,
            "tick_ms" => self.tick_ms = parse_num(name, value)?,
            "max_rounds" => {
                self.max_rounds = match value {
                    "" | "none" | "unlimited" => None,
                    v => Some(parse_num(name, v)?),
                }
            }
            _ => return Err(format!("unknown option '{name}'")),
        }
        Ok(())
    }

    /// The switch policy every spawned thread starts with.
    pub fn switch_policy(&self) -> SwitchPolicy {
        let policy = SwitchPolicy::slice(self.slice);
        if self.stress > 0.0 {
            policy.with_stress(self.stress, self.seed)
        } else {
            policy
        }
    }

    /// Scheduler pacing interval, or `None` when unpaced.
    pub fn tick(&self) -> Option<Duration> {
        (self.tick_ms > 0).then(|| Duration::from_millis(self.tick_ms))
    }
}

/// The config file used when none is given on the command line: the
/// platform config directory's `ani/config`, then `./.anirc`.
pub fn default_path() -> Option<PathBuf> {
    let candidates = ProjectDirs::from("", "", "ani")
        .map(|dirs| dirs.config_dir().join("config"))
        .into_iter()
        .chain(std::iter::once(PathBuf::from(".anirc")));
    candidates.into_iter().find(|p| p.is_file())
}

// ── Argument tokenizer ────────────────────────────────────────────────────────

/// Split `s` into whitespace-delimited tokens, honouring double-quoted strings
/// and `\"` escapes within them.
fn split_args(s: &str) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();
    let mut cur = String::new();
    let mut in_quotes = false;
    let mut chars = s.chars();

    while let Some(ch) = chars.next() {
        match ch {
            '"' => in_quotes = !in_quotes,
            '\\' if in_quotes => {
                if let Some(escaped) = chars.next() {
                    cur.push(escaped);
                }
            }
            c if c.is_ascii_whitespace() && !in_quotes => {
                if !cur.is_empty() {
                    args.push(std::mem::take(&mut cur));
                }
            }
            c => cur.push(c),
        }
    }
    if !cur.is_empty() {
        args.push(cur);
    }
    args
}

// ── /set ─────────────────────────────────────────────────────────────────────

fn parse_num<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, String> {
    value.parse().map_err(|_| format!("{name}: invalid value '{value}'"))
}

/// Parse `/set <name>=<value>` or `/set <name> <value>`.
fn parse_set(tokens: &[String], config: &mut Config) -> Result<(), String> {
    if tokens.is_empty() {
        return Err("/set: requires an argument".into());
    }

    let (name, value) = if let Some((name, value)) = tokens[0].split_once('=') {
        (name.to_owned(), value.to_owned())
    } else if tokens.len() >= 2 {
        (tokens[0].clone(), tokens[1..].join(" "))
    } else {
        return Err(format!("/set: missing value for '{}'", tokens[0]));
    };

    if name.is_empty() {
        return Err("/set: option name cannot be empty".into());
    }

    config.set(&name, value.trim())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
