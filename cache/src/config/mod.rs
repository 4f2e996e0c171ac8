//! Typed cache configuration and its YAML loader.

pub mod raw;

use crate::error::{CacheError, Result};
use raw::{CacheConfigRaw, RegistryConfigRaw};

use std::collections::HashMap;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Which backend a configuration builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheKind {
  DiskOverflow,
  Volatile,
  SoftReference,
  NoOp,
}

/// Bound of a memory tier, by entry count or by encoded byte size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryBound {
  Entries(u64),
  Bytes(u64),
}

/// Bound of the disk tier, by entry count or by bytes written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskBound {
  Entries(u64),
  Bytes(u64),
}

/// What happens to an entry evicted from the memory tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PersistenceStrategy {
  /// The entry is dropped.
  #[default]
  None,
  /// The entry is serialized into the disk tier.
  SwapOnOverflow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvictionPolicy {
  #[default]
  Lru,
}

/// The full set of options a single cache is created from.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
  pub kind: CacheKind,
  pub memory_bound: MemoryBound,
  pub disk_bound: DiskBound,
  pub time_to_idle: Option<Duration>,
  pub time_to_live: Option<Duration>,
  pub eviction_policy: EvictionPolicy,
  pub persistence: PersistenceStrategy,
  /// Overrides the registry's default disk directory.
  pub disk_directory: Option<PathBuf>,
  /// How many values a soft-reference cache keeps alive before reclaiming.
  /// `None` means [`DEFAULT_SOFT_CAPACITY`](crate::DEFAULT_SOFT_CAPACITY).
  pub soft_capacity: Option<usize>,
  pub shards: Option<usize>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      kind: CacheKind::DiskOverflow,
      memory_bound: MemoryBound::Entries(10_000),
      disk_bound: DiskBound::Entries(100_000),
      time_to_idle: None,
      time_to_live: None,
      eviction_policy: EvictionPolicy::Lru,
      persistence: PersistenceStrategy::None,
      disk_directory: None,
      soft_capacity: None,
      shards: None,
    }
  }
}

/// Configuration for a whole registry: the default disk directory and pre-declared caches.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RegistryConfig {
  pub default_disk_directory: Option<PathBuf>,
  pub caches: HashMap<String, CacheConfig>,
}

impl RegistryConfig {
  /// Parses and validates a YAML document.
  pub fn from_yaml_str(yaml: &str) -> Result<Self> {
    let raw: RegistryConfigRaw =
      serde_yaml::from_str(yaml).map_err(|e| CacheError::ConfigParse(e.to_string()))?;
    process_raw_config(raw)
  }

  /// Reads, parses and validates a YAML file.
  pub fn from_file(path: &Path) -> Result<Self> {
    let file = File::open(path)?;
    let reader = io::BufReader::new(file);
    let raw: RegistryConfigRaw =
      serde_yaml::from_reader(reader).map_err(|e| CacheError::ConfigParse(e.to_string()))?;
    process_raw_config(raw)
  }
}

/// Validates a raw configuration and converts it into typed values.
pub fn process_raw_config(raw: RegistryConfigRaw) -> Result<RegistryConfig> {
  let mut caches = HashMap::with_capacity(raw.caches.len());
  for (name, raw_cache) in raw.caches {
    let config = process_cache_config(&name, raw_cache)?;
    caches.insert(name, config);
  }

  Ok(RegistryConfig {
    default_disk_directory: raw.default_disk_directory.map(PathBuf::from),
    caches,
  })
}

fn invalid(name: &str, field: &str, message: impl Into<String>) -> CacheError {
  CacheError::InvalidConfigValue {
    field: format!("caches.{}.{}", name, field),
    message: message.into(),
  }
}

fn process_cache_config(name: &str, raw: CacheConfigRaw) -> Result<CacheConfig> {
  let defaults = CacheConfig::default();

  let kind = match raw.kind.as_deref() {
    None | Some("disk_overflow") => CacheKind::DiskOverflow,
    Some("volatile") => CacheKind::Volatile,
    Some("soft_reference") => CacheKind::SoftReference,
    Some("no_op") => CacheKind::NoOp,
    Some(other) => {
      return Err(invalid(
        name,
        "kind",
        format!(
          "Unknown kind '{}'. Expected 'disk_overflow', 'volatile', 'soft_reference', or 'no_op'.",
          other
        ),
      ))
    }
  };

  let memory_bound = match (raw.heap_size_bytes, raw.max_entries_in_memory) {
    (Some(_), Some(_)) => {
      return Err(invalid(
        name,
        "heap_size_bytes",
        "Set either heap_size_bytes or max_entries_in_memory, not both.",
      ))
    }
    (Some(bytes), None) => MemoryBound::Bytes(bytes),
    (None, Some(entries)) => MemoryBound::Entries(entries),
    (None, None) => defaults.memory_bound,
  };

  let disk_bound = match (raw.disk_size_bytes, raw.max_entries_on_disk) {
    (Some(_), Some(_)) => {
      return Err(invalid(
        name,
        "disk_size_bytes",
        "Set either disk_size_bytes or max_entries_on_disk, not both.",
      ))
    }
    (Some(bytes), None) => DiskBound::Bytes(bytes),
    (None, Some(entries)) => DiskBound::Entries(entries),
    (None, None) => defaults.disk_bound,
  };

  let eviction_policy = match raw.eviction_policy.as_deref() {
    None => EvictionPolicy::Lru,
    Some(policy) if policy.eq_ignore_ascii_case("lru") => EvictionPolicy::Lru,
    Some(other) => {
      return Err(invalid(
        name,
        "eviction_policy",
        format!("Unknown eviction_policy '{}'. Expected 'lru'.", other),
      ))
    }
  };

  let persistence = match raw.persistence.as_deref() {
    None | Some("none") => PersistenceStrategy::None,
    Some("swap_on_overflow") => PersistenceStrategy::SwapOnOverflow,
    Some(other) => {
      return Err(invalid(
        name,
        "persistence",
        format!(
          "Unknown persistence '{}'. Expected 'none' or 'swap_on_overflow'.",
          other
        ),
      ))
    }
  };

  Ok(CacheConfig {
    kind,
    memory_bound,
    disk_bound,
    time_to_idle: parse_timeout(name, "idle_timeout", raw.idle_timeout)?,
    time_to_live: parse_timeout(name, "live_timeout", raw.live_timeout)?,
    eviction_policy,
    persistence,
    disk_directory: raw.disk_directory.map(PathBuf::from),
    soft_capacity: raw.soft_capacity,
    shards: raw.shards,
  })
}

fn parse_timeout(name: &str, field: &str, value: Option<String>) -> Result<Option<Duration>> {
  value
    .map(|text| {
      humantime::parse_duration(&text).map_err(|e| {
        invalid(
          name,
          field,
          format!("Invalid duration '{}': {}", text, e),
        )
      })
    })
    .transpose()
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn parses_full_disk_overflow_config() {
    let yaml = r#"
default_disk_directory: /var/tmp/cachet
caches:
  arrays:
    kind: disk_overflow
    max_entries_in_memory: 3
    disk_size_bytes: 1048576
    idle_timeout: 5m
    live_timeout: 1h
    eviction_policy: LRU
    persistence: swap_on_overflow
"#;
    let config = RegistryConfig::from_yaml_str(yaml).unwrap();
    assert_eq!(
      config.default_disk_directory,
      Some(PathBuf::from("/var/tmp/cachet"))
    );

    let arrays = &config.caches["arrays"];
    assert_eq!(arrays.kind, CacheKind::DiskOverflow);
    assert_eq!(arrays.memory_bound, MemoryBound::Entries(3));
    assert_eq!(arrays.disk_bound, DiskBound::Bytes(1_048_576));
    assert_eq!(arrays.time_to_idle, Some(Duration::from_secs(300)));
    assert_eq!(arrays.time_to_live, Some(Duration::from_secs(3600)));
    assert_eq!(arrays.persistence, PersistenceStrategy::SwapOnOverflow);
  }

  #[test]
  fn empty_cache_entry_uses_defaults() {
    let config = RegistryConfig::from_yaml_str("caches:\n  plain: {}\n").unwrap();
    assert_eq!(config.caches["plain"], CacheConfig::default());
  }

  #[test]
  fn rejects_conflicting_memory_bounds() {
    let yaml = "caches:\n  c:\n    heap_size_bytes: 10\n    max_entries_in_memory: 10\n";
    match RegistryConfig::from_yaml_str(yaml) {
      Err(CacheError::InvalidConfigValue { field, .. }) => {
        assert_eq!(field, "caches.c.heap_size_bytes")
      }
      other => panic!("Expected InvalidConfigValue error, got {:?}", other),
    }
  }

  #[test]
  fn rejects_bad_duration() {
    let yaml = "caches:\n  c:\n    live_timeout: soon\n";
    match RegistryConfig::from_yaml_str(yaml) {
      Err(CacheError::InvalidConfigValue { field, message }) => {
        assert_eq!(field, "caches.c.live_timeout");
        assert!(message.contains("Invalid duration 'soon'"));
      }
      other => panic!("Expected InvalidConfigValue error, got {:?}", other),
    }
  }

  #[test]
  fn rejects_unknown_fields() {
    let yaml = "caches:\n  c:\n    max_entries: 3\n";
    assert!(matches!(
      RegistryConfig::from_yaml_str(yaml),
      Err(CacheError::ConfigParse(_))
    ));
  }
}
