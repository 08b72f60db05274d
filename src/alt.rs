//! alt - запасной бэкенд, сохраняющий наблюдаемый контракт, когда
//! страничный субстрат недоступен.
//!
//! Устройство: упорядоченная карта (BTreeMap) поверх журнала `db.alt`.
//! Журнал переиспользует фрейминг WAL-записи: один коммит - одна запись,
//! так что многооперационная атомарность получается бесплатно; рваный
//! хвост при открытии усекается. Ключи байт-в-байт, значения - в том
//! же фрейминге flags||expiry||payload, то есть TTL и сжатие
//! round-trip'ятся с основным движком.
//!
//! Допустимые послабления: put_no_sync деградирует до put,
//! verify_integrity возвращает пустой список.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use log::info;

use crate::codec::{Decoded, ValueCodec};
use crate::config::SilkConfig;
use crate::consts::ALT_JOURNAL_FILE;
use crate::crypto::Cipher;
use crate::engine::batch::decode_batch;
use crate::error::Result;
use crate::lock::{self, LockGuard};
use crate::txn::{dedup_ops, validate_key_value, WriteTxn};
use crate::util::{now_ms, prefix_upper_bound};
use crate::wal::record::{decode_record, encode_record};
use crate::wal::{TxRecord, WalOp};

pub struct AltStore {
    path: PathBuf,
    journal: File,
    map: BTreeMap<Vec<u8>, Vec<u8>>,
    codec: ValueCodec,
    next_lsn: u64,
    next_tx_id: u64,
    closed: bool,
    _lock: LockGuard,
}

impl AltStore {
    pub fn open(dir: &Path, cfg: &SilkConfig) -> Result<AltStore> {
        std::fs::create_dir_all(dir)?;
        let guard = lock::try_acquire_exclusive(dir)?.ok_or_else(|| {
            crate::error::io_msg(format!("database {} is locked", dir.display()))
        })?;
        Self::open_locked(dir, cfg, guard)
    }

    pub fn open_locked(dir: &Path, cfg: &SilkConfig, guard: LockGuard) -> Result<AltStore> {
        cfg.validate()?;
        let cipher = match &cfg.encryption_key {
            Some(key) => Some(Cipher::new(key)?),
            None => None,
        };
        let codec = ValueCodec::new(cfg.compression, cfg.min_compress_size, cipher);

        let path = dir.join(ALT_JOURNAL_FILE);
        let mut map = BTreeMap::new();
        let mut next_lsn = 0u64;
        if path.exists() {
            let data = std::fs::read(&path)?;
            let mut off = 0usize;
            while let Some((rec, n)) = decode_record(&data[off..])? {
                apply_to_map(&mut map, &codec, &rec.ops)?;
                next_lsn = next_lsn.max(rec.lsn);
                off += n;
            }
            if off < data.len() {
                // Рваный хвост усекается физически, иначе следующие
                // коммиты легли бы за мусором.
                info!(
                    "alt backend: truncating torn journal tail ({} of {} bytes)",
                    data.len() - off,
                    data.len()
                );
                let f = OpenOptions::new().write(true).open(&path)?;
                f.set_len(off as u64)?;
                f.sync_all()?;
            }
        }

        let journal = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(AltStore {
            path,
            journal,
            map,
            codec,
            next_lsn,
            next_tx_id: 0,
            closed: false,
            _lock: guard,
        })
    }

    fn check_open(&self) -> Result<()> {
        if self.closed {
            return Err(crate::error::SilkError::Closed);
        }
        Ok(())
    }

    /// Один host-транзакционный коммит: запись в журнал + применение.
    fn commit(&mut self, ops: Vec<WalOp>) -> Result<()> {
        self.check_open()?;
        let ops = dedup_ops(ops);
        if ops.is_empty() {
            return Ok(());
        }
        self.next_lsn += 1;
        self.next_tx_id += 1;
        let rec = TxRecord {
            lsn: self.next_lsn,
            tx_id: self.next_tx_id,
            ops,
        };
        self.journal.write_all(&encode_record(&rec))?;
        self.journal.sync_all()?;
        apply_to_map(&mut self.map, &self.codec, &rec.ops)?;
        Ok(())
    }

    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        validate_key_value(key, Some(value))?;
        self.commit(vec![WalOp::Put {
            key: key.to_vec(),
            value: value.to_vec(),
        }])
    }

    /// Ослабленного режима у журнала нет: деградирует до обычного put.
    pub fn put_no_sync(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.put(key, value)
    }

    pub fn put_with_ttl(&mut self, key: &[u8], value: &[u8], ttl_ms: u64) -> Result<()> {
        validate_key_value(key, Some(value))?;
        self.commit(vec![WalOp::PutTtl {
            key: key.to_vec(),
            expiry_ms: now_ms().saturating_add(ttl_ms),
            value: value.to_vec(),
        }])
    }

    pub fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.check_open()?;
        validate_key_value(key, None)?;
        let stored = match self.map.get(key) {
            Some(s) => s.clone(),
            None => return Ok(None),
        };
        match self.codec.decode(&stored, now_ms())? {
            Decoded::Live(v) => Ok(Some(v)),
            Decoded::Expired => Ok(None),
        }
    }

    pub fn delete(&mut self, key: &[u8]) -> Result<bool> {
        validate_key_value(key, None)?;
        let existed_live = match self.map.get(key) {
            Some(stored) => crate::codec::is_live(stored, now_ms())?,
            None => false,
        };
        self.commit(vec![WalOp::Delete { key: key.to_vec() }])?;
        Ok(existed_live)
    }

    pub fn put_batch(&mut self, data: &[u8]) -> Result<u32> {
        self.check_open()?;
        let pairs = decode_batch(data)?;
        let count = pairs.len() as u32;
        if count == 0 {
            return Ok(0);
        }
        let ops = pairs
            .into_iter()
            .map(|(key, value)| WalOp::Put { key, value })
            .collect();
        self.commit(ops)?;
        Ok(count)
    }

    pub fn begin_write(&self) -> WriteTxn {
        WriteTxn::new()
    }

    pub fn commit_transaction(&mut self, txn: &mut WriteTxn) -> Result<()> {
        if !txn.is_active() {
            return Err(crate::error::bad_input("transaction is not active"));
        }
        let ops = txn.take_deduped_ops();
        self.commit(ops)
    }

    pub fn scan_range(
        &mut self,
        lo: &[u8],
        hi: Option<&[u8]>,
        limit: usize,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.check_open()?;
        if limit == 0 {
            return Ok(Vec::new());
        }
        let now = now_ms();
        let mut out = Vec::new();
        let iter: Box<dyn Iterator<Item = (&Vec<u8>, &Vec<u8>)> + '_> = match hi {
            Some(hi) => {
                if hi <= lo {
                    return Ok(Vec::new());
                }
                Box::new(self.map.range(lo.to_vec()..hi.to_vec()))
            }
            None => Box::new(self.map.range(lo.to_vec()..)),
        };
        for (k, stored) in iter {
            if let Decoded::Live(v) = self.codec.decode(stored, now)? {
                out.push((k.clone(), v));
                if out.len() >= limit {
                    break;
                }
            }
        }
        Ok(out)
    }

    pub fn scan_prefix(&mut self, prefix: &[u8], limit: usize) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let hi = prefix_upper_bound(prefix);
        self.scan_range(prefix, hi.as_deref(), limit)
    }

    /// У запасного бэкенда нет страничной структуры для проверки.
    pub fn verify_integrity(&self) -> Result<Vec<u32>> {
        self.check_open()?;
        Ok(Vec::new())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.check_open()?;
        self.journal.sync_all()?;
        Ok(())
    }

    pub fn close(mut self) -> Result<()> {
        self.flush()?;
        self.closed = true;
        Ok(())
    }

    pub fn journal_path(&self) -> &Path {
        &self.path
    }
}

/// Применение операций к карте. Значения хранятся в том же фрейминге
/// flags||expiry||payload, что и у основного движка.
fn apply_to_map(
    map: &mut BTreeMap<Vec<u8>, Vec<u8>>,
    codec: &ValueCodec,
    ops: &[WalOp],
) -> Result<()> {
    for op in ops {
        match op {
            WalOp::Put { key, value } => {
                map.insert(key.clone(), codec.encode(value, None)?);
            }
            WalOp::PutTtl {
                key,
                expiry_ms,
                value,
            } => {
                map.insert(key.clone(), codec.encode(value, Some(*expiry_ms))?);
            }
            WalOp::Delete { key } => {
                map.remove(key);
            }
        }
    }
    Ok(())
}
