//! Centralized configuration for SilkDB.
//!
//! Goals:
//! - Single place to collect tunables instead of scattering env lookups.
//! - Builder-style setters; `from_env()` reads the same SKDB_* variables
//!   so embedders and benches can override without code changes.

use std::fmt;

use crate::consts::{
    INLINE_THRESHOLD, MAX_KEY_LEN, MAX_VALUE_LEN, MIN_COMPRESS_SIZE, WAL_SEGMENT_SIZE,
};
use crate::error::{bad_input, Result};

/// Top-level configuration for a single database handle.
#[derive(Clone)]
pub struct SilkConfig {
    /// Compress values by default (LZ4). Env: SKDB_COMPRESSION (default false).
    pub compression: bool,

    /// Optional AEAD key, length 16/24/32 bytes. Values are encrypted with
    /// AES-GCM; a fresh 12-byte nonce is stored with each ciphertext.
    pub encryption_key: Option<Vec<u8>>,

    /// WAL segment size; physical truncation happens at segment boundaries.
    /// Env: SKDB_WAL_SEGMENT_SIZE (default 4 MiB).
    pub wal_segment_size: u64,

    /// fsync данных (db.pages) на каждом синхронном коммите.
    /// Env: SKDB_DATA_FSYNC (default true; "0|false|off|no" => false).
    pub data_fsync: bool,

    /// Maximum key length accepted by the facade.
    pub max_key_len: usize,

    /// Maximum value length accepted by the facade.
    pub max_value_len: usize,

    /// Values up to this size are stored inline in the leaf.
    pub inline_threshold: usize,

    /// Minimum payload size to attempt compression.
    pub min_compress_size: usize,
}

impl Default for SilkConfig {
    fn default() -> Self {
        Self {
            compression: false,
            encryption_key: None,
            wal_segment_size: WAL_SEGMENT_SIZE,
            data_fsync: true,
            max_key_len: MAX_KEY_LEN,
            max_value_len: MAX_VALUE_LEN,
            inline_threshold: INLINE_THRESHOLD,
            min_compress_size: MIN_COMPRESS_SIZE,
        }
    }
}

impl SilkConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("SKDB_COMPRESSION") {
            let s = v.trim().to_ascii_lowercase();
            cfg.compression = s == "1" || s == "true" || s == "yes" || s == "on";
        }

        if let Ok(v) = std::env::var("SKDB_WAL_SEGMENT_SIZE") {
            if let Ok(n) = v.trim().parse::<u64>() {
                if n > 0 {
                    cfg.wal_segment_size = n;
                }
            }
        }

        if let Ok(v) = std::env::var("SKDB_DATA_FSYNC") {
            let s = v.trim().to_ascii_lowercase();
            cfg.data_fsync = !(s == "0" || s == "false" || s == "off" || s == "no");
        }

        cfg
    }

    /// Fluent setters (builder-style) to override specific fields.

    pub fn with_compression(mut self, on: bool) -> Self {
        self.compression = on;
        self
    }

    pub fn with_encryption_key<K: Into<Vec<u8>>>(mut self, key: Option<K>) -> Self {
        self.encryption_key = key.map(Into::into);
        self
    }

    pub fn with_wal_segment_size(mut self, bytes: u64) -> Self {
        self.wal_segment_size = bytes;
        self
    }

    pub fn with_data_fsync(mut self, on: bool) -> Self {
        self.data_fsync = on;
        self
    }

    /// Validate the parts that have documented constraints.
    pub fn validate(&self) -> Result<()> {
        if let Some(key) = &self.encryption_key {
            if !matches!(key.len(), 16 | 24 | 32) {
                return Err(bad_input(format!(
                    "encryption key must be 16, 24 or 32 bytes, got {}",
                    key.len()
                )));
            }
        }
        if self.wal_segment_size == 0 {
            return Err(bad_input("wal_segment_size must be > 0"));
        }
        Ok(())
    }
}

impl fmt::Debug for SilkConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Ключ шифрования в отладочный вывод не попадает.
        f.debug_struct("SilkConfig")
            .field("compression", &self.compression)
            .field("encryption", &self.encryption_key.is_some())
            .field("wal_segment_size", &self.wal_segment_size)
            .field("data_fsync", &self.data_fsync)
            .field("max_key_len", &self.max_key_len)
            .field("inline_threshold", &self.inline_threshold)
            .finish()
    }
}

/// Имя базы: 1..=128 символов из [A-Za-z0-9_-].
pub fn validate_db_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > crate::consts::MAX_NAME_LEN {
        return Err(bad_input(format!(
            "database name length must be 1..={}, got {}",
            crate::consts::MAX_NAME_LEN,
            name.len()
        )));
    }
    if !name
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
    {
        return Err(bad_input(format!(
            "database name must match [A-Za-z0-9_-]: {:?}",
            name
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_validation() {
        assert!(validate_db_name("t1").is_ok());
        assert!(validate_db_name("a-b_C9").is_ok());
        assert!(validate_db_name("").is_err());
        assert!(validate_db_name("has space").is_err());
        assert!(validate_db_name(&"x".repeat(129)).is_err());
    }

    #[test]
    fn encryption_key_lengths() {
        for n in [16usize, 24, 32] {
            let cfg = SilkConfig::default().with_encryption_key(Some(vec![0u8; n]));
            assert!(cfg.validate().is_ok(), "len {} must be accepted", n);
        }
        let cfg = SilkConfig::default().with_encryption_key(Some(vec![0u8; 20]));
        assert!(cfg.validate().is_err());
    }
}
