use std::fmt;

use thiserror::Error;

/// The main error type for `cachet` operations.
#[derive(Debug, Error)]
pub enum CacheError {
  /// A structural mutator was invoked on a read-only list.
  #[error("operation '{operation}' is not supported by this collection")]
  Unsupported { operation: &'static str },

  #[error("index {index} is out of bounds for a list of length {len}")]
  IndexOutOfBounds { index: usize, len: usize },

  /// The element provider failed while populating a miss.
  #[error(transparent)]
  Provider(#[from] ProviderError),

  /// A serialization proxy could not convert a value.
  #[error("serialization failed: {0}")]
  Serialization(String),

  /// A cache with this name exists but was created with different key/value types.
  #[error("cache '{name}' is registered with different key/value types")]
  TypeMismatch { name: String },

  /// No configuration exists for the requested cache name.
  #[error("no configuration found for cache '{0}'")]
  UnknownCache(String),

  #[error("failed to build cache: {0}")]
  Build(#[from] BuildError),

  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),

  #[error("failed to parse configuration: {0}")]
  ConfigParse(String),

  #[error("invalid configuration value for '{field}': {message}")]
  InvalidConfigValue { field: String, message: String },
}

/// A specialized `Result` type for cache operations.
pub type Result<T, E = CacheError> = std::result::Result<T, E>;

/// Errors that can occur when building a cache.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
  /// A bounded tier was configured with a capacity of zero.
  #[error("bounded cache capacity cannot be zero")]
  ZeroCapacity,
  /// The cache was configured with zero shards, which is not allowed.
  #[error("shard count cannot be zero")]
  ZeroShards,
}

/// Classifies a provider failure so failure policies can react to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
  /// The backing source is temporarily unable to produce a value.
  Unavailable,
  /// The source has no value for the requested key.
  NotFound,
  /// Any other failure.
  Failed,
}

impl fmt::Display for ProviderErrorKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ProviderErrorKind::Unavailable => write!(f, "unavailable"),
      ProviderErrorKind::NotFound => write!(f, "not found"),
      ProviderErrorKind::Failed => write!(f, "failed"),
    }
  }
}

/// An error raised by an element provider.
#[derive(Debug, Error)]
#[error("provider {kind}: {message}")]
pub struct ProviderError {
  kind: ProviderErrorKind,
  message: String,
  #[source]
  source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ProviderError {
  pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
    Self {
      kind,
      message: message.into(),
      source: None,
    }
  }

  pub fn unavailable(message: impl Into<String>) -> Self {
    Self::new(ProviderErrorKind::Unavailable, message)
  }

  pub fn not_found(message: impl Into<String>) -> Self {
    Self::new(ProviderErrorKind::NotFound, message)
  }

  pub fn failed(message: impl Into<String>) -> Self {
    Self::new(ProviderErrorKind::Failed, message)
  }

  /// Attaches an underlying cause.
  pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
    self.source = Some(Box::new(source));
    self
  }

  pub fn kind(&self) -> ProviderErrorKind {
    self.kind
  }

  pub fn message(&self) -> &str {
    &self.message
  }
}
