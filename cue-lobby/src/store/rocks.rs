//! RocksDB-backed store.
//!
//! Column families:
//! - `hashes`: `<key>\0<field>` → value
//! - `zset_index`: `<key>\0<score:8 bytes, order-preserving><member>` → empty
//! - `zset_scores`: `<key>\0<member>` → score (f64, big-endian bits)
//! - `scalars`: `<key>` → LZ4-compressed value
//!
//! The index CF keeps members physically ordered by score so rank queries
//! are a single prefix scan. Multi-CF updates go through one `WriteBatch`.
//! Read-modify-write operations (`zadd`, `incr`, …) are serialized by an
//! in-process lock; a RocksStore is not shared across processes.

use async_trait::async_trait;
use parking_lot::Mutex;
use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamily, ColumnFamilyDescriptor, DBCompressionType,
    DBWithThreadMode, Direction, IteratorMode, Options, SingleThreaded, WriteBatch, WriteOptions,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::{rank_bounds, select_ranks, RangeOptions, ScoredMember, Store};
use crate::error::StoreError;

const CF_HASHES: &str = "hashes";
const CF_ZSET_INDEX: &str = "zset_index";
const CF_ZSET_SCORES: &str = "zset_scores";
const CF_SCALARS: &str = "scalars";

const COLUMN_FAMILIES: &[&str] = &[CF_HASHES, CF_ZSET_INDEX, CF_ZSET_SCORES, CF_SCALARS];

/// Separates the user key from the field/member part of a compound key.
const KEY_SEPARATOR: u8 = 0;

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database directory path
    pub path: PathBuf,
    /// Block cache size in bytes (default: 64MB)
    pub block_cache_size: usize,
    /// Bloom filter bits per key (default: 10)
    pub bloom_filter_bits: i32,
    /// fsync on every write (default: false)
    pub sync_writes: bool,
    pub max_open_files: i32,
    /// Write buffer size per column family (default: 16MB)
    pub write_buffer_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("cue_lobby_data"),
            block_cache_size: 64 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 256,
            write_buffer_size: 16 * 1024 * 1024,
        }
    }
}

impl StoreConfig {
    /// Small caches for tests.
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 4 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 64,
            write_buffer_size: 1024 * 1024,
        }
    }
}

pub struct RocksStore {
    db: DBWithThreadMode<SingleThreaded>,
    config: StoreConfig,
    write_lock: Mutex<()>,
}

impl RocksStore {
    /// Open the store, creating the database and column families if needed.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Self::cf_options(name, &config)))
            .collect();

        let db = DBWithThreadMode::<SingleThreaded>::open_cf_descriptors(
            &db_opts,
            &config.path,
            cf_descriptors,
        )?;

        log::info!("Opened lobby store at {}", config.path.display());

        Ok(Self {
            db,
            config,
            write_lock: Mutex::new(()),
        })
    }

    fn cf_options(name: &str, config: &StoreConfig) -> Options {
        let mut opts = Options::default();

        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(config.bloom_filter_bits as f64, false);
        opts.set_block_based_table_factory(&block_opts);
        opts.set_write_buffer_size(config.write_buffer_size);

        match name {
            CF_HASHES | CF_ZSET_SCORES => {
                opts.optimize_for_point_lookup(config.block_cache_size as u64);
            }
            CF_ZSET_INDEX => {
                // Range scans only; keys are tiny.
                opts.set_compression_type(DBCompressionType::None);
            }
            CF_SCALARS => {
                // Values are already LZ4-compressed.
                opts.set_compression_type(DBCompressionType::None);
            }
            _ => {}
        }

        opts
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Flush memtables to disk.
    pub fn sync(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    // ─── Helpers ──────────────────────────────────────────────────────

    fn cf(&self, name: &str) -> Result<&ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("Column family '{name}' not found")))
    }

    fn write_options(&self) -> WriteOptions {
        let mut opts = WriteOptions::default();
        opts.set_sync(self.config.sync_writes);
        opts
    }

    /// All `(suffix, value)` pairs under `<key>\0` in a column family.
    fn scan_prefix(&self, cf: &ColumnFamily, key: &str) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let prefix = prefix_of(key);
        let mut out = Vec::new();
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&prefix, Direction::Forward));
        for item in iter {
            let (k, v) = item?;
            if !k.starts_with(&prefix) {
                break;
            }
            out.push((k[prefix.len()..].to_vec(), v.to_vec()));
        }
        Ok(out)
    }

    /// Members of a sorted set in ascending (score, member) order.
    fn zset_members(&self, key: &str) -> Result<Vec<(f64, String)>, StoreError> {
        let cf = self.cf(CF_ZSET_INDEX)?;
        self.scan_prefix(cf, key)?
            .into_iter()
            .map(|(suffix, _)| decode_index_suffix(&suffix))
            .collect()
    }

    fn current_score(&self, key: &str, member: &str) -> Result<Option<f64>, StoreError> {
        let cf = self.cf(CF_ZSET_SCORES)?;
        match self.db.get_cf(cf, compound(key, member.as_bytes()))? {
            Some(bytes) => Ok(Some(decode_score(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put_scalar(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let cf = self.cf(CF_SCALARS)?;
        let compressed = lz4_flex::compress_prepend_size(value.as_bytes());
        self.db
            .put_cf_opt(cf, key.as_bytes(), compressed, &self.write_options())?;
        Ok(())
    }

    fn get_scalar(&self, key: &str) -> Result<Option<String>, StoreError> {
        let cf = self.cf(CF_SCALARS)?;
        match self.db.get_cf(cf, key.as_bytes())? {
            Some(compressed) => {
                let raw = lz4_flex::decompress_size_prepended(&compressed)
                    .map_err(|e| StoreError::Compression(e.to_string()))?;
                utf8(raw).map(Some)
            }
            None => Ok(None),
        }
    }

    fn remove_members(&self, key: &str, members: &[(f64, String)]) -> Result<(), StoreError> {
        if members.is_empty() {
            return Ok(());
        }
        let cf_index = self.cf(CF_ZSET_INDEX)?;
        let cf_scores = self.cf(CF_ZSET_SCORES)?;
        let mut batch = WriteBatch::default();
        for (score, member) in members {
            batch.delete_cf(cf_index, index_key(key, *score, member));
            batch.delete_cf(cf_scores, compound(key, member.as_bytes()));
        }
        self.db.write_opt(batch, &self.write_options())?;
        Ok(())
    }
}

#[async_trait]
impl Store for RocksStore {
    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        let cf = self.cf(CF_HASHES)?;
        self.db
            .put_cf_opt(cf, compound(key, field.as_bytes()), value.as_bytes(), &self.write_options())?;
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        let cf = self.cf(CF_HASHES)?;
        self.db
            .get_cf(cf, compound(key, field.as_bytes()))?
            .map(utf8)
            .transpose()
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        let cf = self.cf(CF_HASHES)?;
        self.scan_prefix(cf, key)?
            .into_iter()
            .map(|(field, value)| Ok((utf8(field)?, utf8(value)?)))
            .collect()
    }

    async fn hdel(&self, key: &str, fields: &[String]) -> Result<usize, StoreError> {
        let _guard = self.write_lock.lock();
        let cf = self.cf(CF_HASHES)?;
        let mut batch = WriteBatch::default();
        let mut removed = 0;
        for field in fields {
            let k = compound(key, field.as_bytes());
            if self.db.get_cf(cf, &k)?.is_some() {
                batch.delete_cf(cf, &k);
                removed += 1;
            }
        }
        if removed > 0 {
            self.db.write_opt(batch, &self.write_options())?;
        }
        Ok(removed)
    }

    async fn zadd(&self, key: &str, score: f64, member: &str) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock();
        let cf_index = self.cf(CF_ZSET_INDEX)?;
        let cf_scores = self.cf(CF_ZSET_SCORES)?;

        let previous = self.current_score(key, member)?;
        let mut batch = WriteBatch::default();
        if let Some(old) = previous {
            batch.delete_cf(cf_index, index_key(key, old, member));
        }
        batch.put_cf(cf_index, index_key(key, score, member), b"");
        batch.put_cf(cf_scores, compound(key, member.as_bytes()), score.to_bits().to_be_bytes());
        self.db.write_opt(batch, &self.write_options())?;

        Ok(previous.is_none())
    }

    async fn zrange(
        &self,
        key: &str,
        start: i64,
        stop: i64,
        options: RangeOptions,
    ) -> Result<Vec<ScoredMember>, StoreError> {
        let members = self.zset_members(key)?;
        Ok(select_ranks(&members, start, stop, options))
    }

    async fn zremrangebyrank(&self, key: &str, start: i64, stop: i64) -> Result<usize, StoreError> {
        let _guard = self.write_lock.lock();
        let members = self.zset_members(key)?;
        let Some((from, to)) = rank_bounds(members.len(), start, stop) else {
            return Ok(0);
        };
        self.remove_members(key, &members[from..=to])?;
        Ok(to - from + 1)
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock();
        match self.current_score(key, member)? {
            Some(score) => {
                self.remove_members(key, &[(score, member.to_string())])?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>, StoreError> {
        self.current_score(key, member)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.put_scalar(key, value)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.get_scalar(key)
    }

    async fn del(&self, keys: &[String]) -> Result<usize, StoreError> {
        let _guard = self.write_lock.lock();
        let cf = self.cf(CF_SCALARS)?;
        let mut batch = WriteBatch::default();
        let mut removed = 0;
        for key in keys {
            if self.db.get_cf(cf, key.as_bytes())?.is_some() {
                batch.delete_cf(cf, key.as_bytes());
                removed += 1;
            }
        }
        if removed > 0 {
            self.db.write_opt(batch, &self.write_options())?;
        }
        Ok(removed)
    }

    async fn incr(&self, key: &str) -> Result<i64, StoreError> {
        let _guard = self.write_lock.lock();
        let current = match self.get_scalar(key)? {
            Some(raw) => raw
                .parse::<i64>()
                .map_err(|_| StoreError::NotAnInteger(key.to_string()))?,
            None => 0,
        };
        let next = current + 1;
        self.put_scalar(key, &next.to_string())?;
        Ok(next)
    }
}

// ─── Key encoding ─────────────────────────────────────────────────────

fn prefix_of(key: &str) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(key.len() + 1);
    prefix.extend_from_slice(key.as_bytes());
    prefix.push(KEY_SEPARATOR);
    prefix
}

fn compound(key: &str, suffix: &[u8]) -> Vec<u8> {
    let mut out = prefix_of(key);
    out.extend_from_slice(suffix);
    out
}

fn index_key(key: &str, score: f64, member: &str) -> Vec<u8> {
    let mut out = prefix_of(key);
    out.extend_from_slice(&sortable_score(score));
    out.extend_from_slice(member.as_bytes());
    out
}

/// Map an f64 onto bytes whose lexicographic order matches numeric order.
fn sortable_score(score: f64) -> [u8; 8] {
    let bits = score.to_bits();
    let ordered = if bits >> 63 == 1 { !bits } else { bits | (1 << 63) };
    ordered.to_be_bytes()
}

fn score_from_sortable(bytes: [u8; 8]) -> f64 {
    let ordered = u64::from_be_bytes(bytes);
    let bits = if ordered >> 63 == 1 { ordered & !(1 << 63) } else { !ordered };
    f64::from_bits(bits)
}

fn decode_index_suffix(suffix: &[u8]) -> Result<(f64, String), StoreError> {
    if suffix.len() < 8 {
        return Err(StoreError::Codec("truncated sorted-set index key".into()));
    }
    let mut score = [0u8; 8];
    score.copy_from_slice(&suffix[..8]);
    Ok((score_from_sortable(score), utf8(suffix[8..].to_vec())?))
}

fn decode_score(bytes: &[u8]) -> Result<f64, StoreError> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| StoreError::Codec("score must be 8 bytes".into()))?;
    Ok(f64::from_bits(u64::from_be_bytes(raw)))
}

fn utf8(bytes: Vec<u8>) -> Result<String, StoreError> {
    String::from_utf8(bytes).map_err(|e| StoreError::Codec(e.to_string()))
}
