use super::clock::ClockReplacer;
use super::lru::LruReplacer;
use super::replacer::Replacer;
use crate::storage::error::{StorageError, StorageResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_POOL_SIZE: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplacerKind {
    #[default]
    Lru,
    Clock,
}

impl ReplacerKind {
    pub fn build(self, pool_size: usize) -> Box<dyn Replacer> {
        match self {
            ReplacerKind::Lru => Box::new(LruReplacer::new(pool_size)),
            ReplacerKind::Clock => Box::new(ClockReplacer::new(pool_size)),
        }
    }
}

impl fmt::Display for ReplacerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplacerKind::Lru => write!(f, "lru"),
            ReplacerKind::Clock => write!(f, "clock"),
        }
    }
}

impl FromStr for ReplacerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lru" => Ok(ReplacerKind::Lru),
            "clock" => Ok(ReplacerKind::Clock),
            other => Err(format!("unknown replacer '{}', expected lru or clock", other)),
        }
    }
}

/// Sizing and policy of a buffer pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferPoolConfig {
    /// Number of frames
    pub pool_size: usize,
    pub replacer: ReplacerKind,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
            replacer: ReplacerKind::default(),
        }
    }
}

impl BufferPoolConfig {
    pub fn new(pool_size: usize) -> Self {
        Self {
            pool_size,
            ..Self::default()
        }
    }

    pub fn with_replacer(mut self, replacer: ReplacerKind) -> Self {
        self.replacer = replacer;
        self
    }

    pub fn validate(&self) -> StorageResult<()> {
        if self.pool_size == 0 {
            return Err(StorageError::InvariantViolation(
                "buffer pool needs at least one frame".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BufferPoolConfig::default();
        assert_eq!(config.pool_size, DEFAULT_POOL_SIZE);
        assert_eq!(config.replacer, ReplacerKind::Lru);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = BufferPoolConfig::new(8).with_replacer(ReplacerKind::Clock);
        assert_eq!(config.pool_size, 8);
        assert_eq!(config.replacer, ReplacerKind::Clock);

        assert!(BufferPoolConfig::new(0).validate().is_err());
    }

    #[test]
    fn test_replacer_kind_parsing() {
        assert_eq!("lru".parse::<ReplacerKind>(), Ok(ReplacerKind::Lru));
        assert_eq!("CLOCK".parse::<ReplacerKind>(), Ok(ReplacerKind::Clock));
        assert!("fifo".parse::<ReplacerKind>().is_err());
        assert_eq!(ReplacerKind::Clock.to_string(), "clock");
    }

    #[test]
    fn test_build_replacer() {
        let mut replacer = ReplacerKind::Clock.build(4);
        replacer.unpin(3);
        assert_eq!(replacer.size(), 1);
        assert_eq!(replacer.evict(), Some(3));
    }
}
