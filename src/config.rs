use std::path::PathBuf;
use std::str::FromStr;

use tracing::warn;

use crate::engine::Period;
use crate::limits::MAX_SEED_COUNT;
use crate::model::ConflictPolicy;

pub const WAL_FILE_NAME: &str = "courtside.wal";

/// Process settings, read from `COURTSIDE_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    pub compact_threshold: u64,
    pub conflict_policy: ConflictPolicy,
    pub seed: u64,
    /// Reservations to generate on a demo court; 0 disables seeding.
    pub seed_count: usize,
    pub report_period: Period,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            metrics_port: None,
            compact_threshold: 1000,
            conflict_policy: ConflictPolicy::default(),
            seed: 42,
            seed_count: 0,
            report_period: Period::default(),
        }
    }
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match lookup(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, "unparseable setting, using default");
            default
        }),
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Bad values fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let metrics_port = lookup("COURTSIDE_METRICS_PORT").and_then(|raw| match raw.trim().parse() {
            Ok(port) => Some(port),
            Err(_) => {
                warn!(value = %raw, "unparseable COURTSIDE_METRICS_PORT, metrics disabled");
                None
            }
        });

        let conflict_policy = match lookup("COURTSIDE_CONFLICT_POLICY") {
            None => defaults.conflict_policy,
            Some(raw) => ConflictPolicy::parse(&raw).unwrap_or_else(|| {
                warn!(value = %raw, "unknown COURTSIDE_CONFLICT_POLICY, using pending-blocks");
                defaults.conflict_policy
            }),
        };

        let mut seed_count = parse_or(&lookup, "COURTSIDE_SEED_COUNT", defaults.seed_count);
        if seed_count > MAX_SEED_COUNT {
            warn!(seed_count, max = MAX_SEED_COUNT, "seed count capped");
            seed_count = MAX_SEED_COUNT;
        }

        Self {
            data_dir: lookup("COURTSIDE_DATA_DIR").map_or(defaults.data_dir, PathBuf::from),
            metrics_port,
            compact_threshold: parse_or(&lookup, "COURTSIDE_COMPACT_THRESHOLD", defaults.compact_threshold),
            conflict_policy,
            seed: parse_or(&lookup, "COURTSIDE_SEED", defaults.seed),
            seed_count,
            report_period: lookup("COURTSIDE_REPORT_PERIOD")
                .map_or(defaults.report_period, |raw| Period::parse(&raw)),
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join(WAL_FILE_NAME)
    }
}
