// Raw, serde-facing shapes of the cache configuration file.
// Everything here is validated and converted by `process_raw_config`.

use serde::Deserialize;
use std::collections::HashMap;

// --- Top Level Config ---
#[derive(Debug, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct RegistryConfigRaw {
  #[serde(default)]
  pub default_disk_directory: Option<String>,
  #[serde(default)] // A registry may start with no pre-declared caches
  pub caches: HashMap<String, CacheConfigRaw>,
}

// --- Per-cache Config ---
#[derive(Debug, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct CacheConfigRaw {
  /// One of `disk_overflow`, `volatile`, `soft_reference`, `no_op`.
  #[serde(default)]
  pub kind: Option<String>,
  #[serde(default)]
  pub heap_size_bytes: Option<u64>,
  #[serde(default)]
  pub max_entries_in_memory: Option<u64>,
  #[serde(default)]
  pub disk_size_bytes: Option<u64>,
  #[serde(default)]
  pub max_entries_on_disk: Option<u64>,
  /// A humantime duration such as `30s` or `5m`.
  #[serde(default)]
  pub idle_timeout: Option<String>,
  #[serde(default)]
  pub live_timeout: Option<String>,
  #[serde(default)]
  pub eviction_policy: Option<String>,
  /// `none` or `swap_on_overflow`.
  #[serde(default)]
  pub persistence: Option<String>,
  #[serde(default)]
  pub disk_directory: Option<String>,
  #[serde(default)]
  pub soft_capacity: Option<usize>,
  #[serde(default)]
  pub shards: Option<usize>,
}
