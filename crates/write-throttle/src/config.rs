//! Write-throttle configuration.
//!
//! Holds the three recognized tunables. Keys match case-insensitively and
//! counts are parsed the permissive way legacy hosts expect: malformed
//! numbers silently become zero consumers.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{ThrottleError, ThrottleResult};
use crate::fault;

/// Name under which the harness owns its configuration block.
pub const CONFIG_SECTION: &str = "write_throttle";

/// Recognized configuration keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigKey {
    /// Number of slow consumer instances.
    Blocking,
    /// Number of fast consumer instances.
    NonBlocking,
    /// Fault trigger flag.
    TriggerAsan,
}

impl ConfigKey {
    /// All keys, in the order the host advertises them.
    pub const ALL: [ConfigKey; 3] = [
        ConfigKey::Blocking,
        ConfigKey::NonBlocking,
        ConfigKey::TriggerAsan,
    ];

    /// Canonical spelling of the key.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigKey::Blocking => "Blocking",
            ConfigKey::NonBlocking => "NonBlocking",
            ConfigKey::TriggerAsan => "TriggerAsan",
        }
    }

    /// Case-insensitive lookup.
    pub fn parse(key: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(key))
    }
}

impl std::fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Harness configuration, fixed once registration happens.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ThrottleConfig {
    /// Consumer instances drawing latency from [1s, 3s].
    pub blocking: usize,

    /// Consumer instances drawing latency from [0s, 1s].
    pub non_blocking: usize,

    /// Whether the fault trigger was requested. Only ever observed as false:
    /// a true value aborts the process while it is being applied.
    pub trigger_asan: bool,
}

impl ThrottleConfig {
    /// Create a config with explicit pool sizes.
    pub fn new(blocking: usize, non_blocking: usize) -> Self {
        Self {
            blocking,
            non_blocking,
            trigger_asan: false,
        }
    }

    /// Apply a single key/value pair.
    ///
    /// Unknown keys are rejected and leave the config untouched. Setting
    /// `TriggerAsan` to `true` runs the fault injector right here and never
    /// returns.
    pub fn apply(&mut self, key: &str, value: &str) -> ThrottleResult<()> {
        let Some(parsed) = ConfigKey::parse(key) else {
            warn!(key = %key, "Rejecting unknown write_throttle option");
            return Err(ThrottleError::UnknownOption(key.to_string()));
        };

        match parsed {
            ConfigKey::Blocking => self.blocking = parse_count(value),
            ConfigKey::NonBlocking => self.non_blocking = parse_count(value),
            ConfigKey::TriggerAsan => {
                if value.eq_ignore_ascii_case("true") {
                    self.trigger_asan = true;
                    fault::trigger();
                }
            }
        }

        debug!(key = %parsed, value = %value, "Applied write_throttle option");
        Ok(())
    }

    /// Apply pairs in order. A rejected key does not stop later keys; the
    /// rejections are returned for the caller to report.
    pub fn apply_all<I, K, V>(&mut self, pairs: I) -> Vec<ThrottleError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        pairs
            .into_iter()
            .filter_map(|(k, v)| self.apply(k.as_ref(), v.as_ref()).err())
            .collect()
    }

    /// Build a config from pairs, returning the rejections alongside it.
    pub fn from_pairs<I, K, V>(pairs: I) -> (Self, Vec<ThrottleError>)
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut config = Self::default();
        let errors = config.apply_all(pairs);
        (config, errors)
    }

    /// Load options from a configuration file.
    ///
    /// Reads the `[write_throttle]` table when present, otherwise the top
    /// level. Keys are applied in sorted order. Rejected keys are returned
    /// next to the config; only an unreadable file is an error.
    pub fn load(path: impl AsRef<Path>) -> ThrottleResult<(Self, Vec<ThrottleError>)> {
        let source = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .build()?;

        let mut root: config::Map<String, config::Value> = source.try_deserialize()?;
        let table = match root.remove(CONFIG_SECTION) {
            Some(section) => section.into_table()?,
            None => root,
        };

        let mut pairs = BTreeMap::new();
        for (key, value) in table {
            pairs.insert(key, value.into_string()?);
        }

        Ok(Self::from_pairs(pairs))
    }
}

/// Largest count [`parse_count`] returns.
pub const MAX_COUNT: usize = i32::MAX as usize;

/// Parse a consumer count with `atoi` semantics.
///
/// Leading whitespace is skipped, one optional sign is accepted, then as many
/// decimal digits as follow. Anything else yields whatever was read so far,
/// which is zero when no digit came first. Negative counts clamp to zero and
/// anything past `i32::MAX` clamps to [`MAX_COUNT`], the `strtol` range of a C `int`.
pub fn parse_count(value: &str) -> usize {
    let trimmed = value.trim_start();
    let (negative, digits) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };

    let mut count: u64 = 0;
    for byte in digits.bytes().take_while(u8::is_ascii_digit) {
        count = (count * 10 + u64::from(byte - b'0')).min(MAX_COUNT as u64);
    }

    if negative {
        0
    } else {
        count as usize
    }
}
