//! facade - публичный фасад Db.
//!
//! Вариант бэкенда выбирается один раз при конструировании (спичечный
//! enum, один match на операцию): основной страничный движок либо
//! запасной бэкенд, когда страничный субстрат недоступен (ошибка
//! ввода/вывода при открытии файла страниц). Повреждённая база (Corrupt,
//! VersionMismatch) запасным бэкендом не маскируется.

use std::path::{Path, PathBuf};

use log::warn;

use crate::alt::AltStore;
use crate::config::{validate_db_name, SilkConfig};
use crate::engine::{Engine, Stats};
use crate::error::{Result, SilkError};
use crate::lock::LockGuard;
use crate::txn::WriteTxn;

enum Backend {
    Primary(Engine),
    Alt(AltStore),
}

pub struct Db {
    inner: Backend,
    dir: PathBuf,
}

impl Db {
    /// Открыть базу `name` в каталоге `base_dir`.
    pub fn open(base_dir: &Path, name: &str, cfg: SilkConfig) -> Result<Db> {
        validate_db_name(name)?;
        let dir = base_dir.join(name);
        Self::open_dir(&dir, cfg)
    }

    /// Открыть базу по каталогу (лок захватывается внутри).
    pub fn open_dir(dir: &Path, cfg: SilkConfig) -> Result<Db> {
        let inner = match Engine::open(dir, cfg.clone()) {
            Ok(engine) => Backend::Primary(engine),
            Err(SilkError::Io(e)) => {
                warn!(
                    "primary page store unavailable at {} ({}); falling back to alt backend",
                    dir.display(),
                    e
                );
                Backend::Alt(AltStore::open(dir, &cfg)?)
            }
            Err(e) => return Err(e),
        };
        Ok(Db {
            inner,
            dir: dir.to_path_buf(),
        })
    }

    /// Открыть под уже захваченным локом (путь координатора).
    pub(crate) fn open_dir_locked(dir: &Path, cfg: SilkConfig, guard: LockGuard) -> Result<Db> {
        let inner = match Engine::open_locked(dir, cfg.clone(), guard) {
            Ok(engine) => Backend::Primary(engine),
            Err(SilkError::Io(e)) => {
                warn!(
                    "primary page store unavailable at {} ({}); falling back to alt backend",
                    dir.display(),
                    e
                );
                Backend::Alt(AltStore::open(dir, &cfg)?)
            }
            Err(e) => return Err(e),
        };
        Ok(Db {
            inner,
            dir: dir.to_path_buf(),
        })
    }

    /// Принудительно открыть на запасном бэкенде.
    pub fn open_dir_alt(dir: &Path, cfg: SilkConfig) -> Result<Db> {
        Ok(Db {
            inner: Backend::Alt(AltStore::open(dir, &cfg)?),
            dir: dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn is_alt(&self) -> bool {
        matches!(self.inner, Backend::Alt(_))
    }

    // ------------- операции фасада -------------

    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        match &mut self.inner {
            Backend::Primary(e) => e.put(key, value),
            Backend::Alt(a) => a.put(key, value),
        }
    }

    pub fn put_no_sync(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        match &mut self.inner {
            Backend::Primary(e) => e.put_no_sync(key, value),
            Backend::Alt(a) => a.put_no_sync(key, value),
        }
    }

    pub fn put_with_ttl(&mut self, key: &[u8], value: &[u8], ttl_ms: u64) -> Result<()> {
        match &mut self.inner {
            Backend::Primary(e) => e.put_with_ttl(key, value, ttl_ms),
            Backend::Alt(a) => a.put_with_ttl(key, value, ttl_ms),
        }
    }

    pub fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match &mut self.inner {
            Backend::Primary(e) => e.get(key),
            Backend::Alt(a) => a.get(key),
        }
    }

    pub fn delete(&mut self, key: &[u8]) -> Result<bool> {
        match &mut self.inner {
            Backend::Primary(e) => e.delete(key),
            Backend::Alt(a) => a.delete(key),
        }
    }

    pub fn put_batch(&mut self, data: &[u8]) -> Result<u32> {
        match &mut self.inner {
            Backend::Primary(e) => e.put_batch(data),
            Backend::Alt(a) => a.put_batch(data),
        }
    }

    pub fn begin_write(&self) -> WriteTxn {
        WriteTxn::new()
    }

    pub fn commit_transaction(&mut self, txn: &mut WriteTxn) -> Result<()> {
        match &mut self.inner {
            Backend::Primary(e) => e.commit_transaction(txn),
            Backend::Alt(a) => a.commit_transaction(txn),
        }
    }

    /// Чтение с учётом незакоммиченных операций транзакции.
    pub fn get_in_txn(&mut self, txn: &WriteTxn, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match &mut self.inner {
            Backend::Primary(e) => e.get_in_txn(txn, key),
            Backend::Alt(a) => match txn.staged_get(key, crate::util::now_ms()) {
                crate::txn::StagedRead::Value(v) => Ok(Some(v)),
                crate::txn::StagedRead::Deleted => Ok(None),
                crate::txn::StagedRead::Unstaged => a.get(key),
            },
        }
    }

    /// Скан [lo, hi) до limit живых записей, по возрастанию ключей.
    pub fn scan_range(
        &mut self,
        lo: &[u8],
        hi: Option<&[u8]>,
        limit: usize,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        match &mut self.inner {
            Backend::Primary(e) => e.scan_range(lo, hi, limit),
            Backend::Alt(a) => a.scan_range(lo, hi, limit),
        }
    }

    pub fn scan_prefix(&mut self, prefix: &[u8], limit: usize) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        match &mut self.inner {
            Backend::Primary(e) => e.scan_prefix(prefix, limit),
            Backend::Alt(a) => a.scan_prefix(prefix, limit),
        }
    }

    /// Список подозрительных page_id (пустой у запасного бэкенда).
    pub fn verify_integrity(&self) -> Result<Vec<u32>> {
        match &self.inner {
            Backend::Primary(e) => e.verify_integrity(),
            Backend::Alt(a) => a.verify_integrity(),
        }
    }

    pub fn flush(&mut self) -> Result<()> {
        match &mut self.inner {
            Backend::Primary(e) => e.flush(),
            Backend::Alt(a) => a.flush(),
        }
    }

    pub fn close(self) -> Result<()> {
        match self.inner {
            Backend::Primary(e) => e.close(),
            Backend::Alt(a) => a.close(),
        }
    }

    /// Бросить без flush (аварийное завершение в тестах восстановления).
    pub fn abandon(self) {
        match self.inner {
            Backend::Primary(e) => e.abandon(),
            Backend::Alt(_) => {}
        }
    }

    /// LSN последнего коммита - точка привязки для внешних change-стримов.
    pub fn last_lsn(&self) -> u64 {
        match &self.inner {
            Backend::Primary(e) => e.last_lsn(),
            Backend::Alt(_) => 0,
        }
    }

    pub fn stats(&self) -> Result<Option<Stats>> {
        match &self.inner {
            Backend::Primary(e) => e.stats().map(Some),
            Backend::Alt(_) => Ok(None),
        }
    }
}
