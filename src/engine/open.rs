//! engine/open - создание/открытие базы, восстановление, flush/close.
//!
//! Восстановление при открытии:
//! 1. Выбирается живая meta (валидная копия с большим last_lsn).
//! 2. Реплеем доигрываются WAL-записи с lsn > last_lsn до первой
//!    невалидной; рваный хвост физически усекается.
//! 3. Пишется альтернативная meta с новым durable-состоянием; покрытые
//!    сегменты журнала удаляются.

use std::fs;
use std::path::Path;

use log::{info, warn};

use crate::codec::ValueCodec;
use crate::config::SilkConfig;
use crate::consts::{META_FLAG_COMPRESSION, META_FLAG_ENCRYPTION, PAGES_FILE};
use crate::crypto::Cipher;
use crate::error::{bad_input, io_msg, Result};
use crate::lock::{self, LockGuard};
use crate::pager::Pager;
use crate::tree::{tree_init, TreeTxn};
use crate::wal::{replay, scan_segments, Wal};

use super::commit::apply_ops;
use super::core::Engine;

impl Engine {
    /// Открыть (или создать) базу в каталоге, захватив эксклюзивный лок.
    pub fn open(dir: &Path, cfg: SilkConfig) -> Result<Engine> {
        fs::create_dir_all(dir)?;
        let guard = lock::try_acquire_exclusive(dir)?
            .ok_or_else(|| io_msg(format!("database {} is locked", dir.display())))?;
        Self::open_locked(dir, cfg, guard)
    }

    /// Открыть базу под уже захваченным локом (путь координатора).
    pub fn open_locked(dir: &Path, cfg: SilkConfig, guard: LockGuard) -> Result<Engine> {
        cfg.validate()?;

        let cipher = match &cfg.encryption_key {
            Some(key) => Some(Cipher::new(key)?),
            None => None,
        };
        let codec = ValueCodec::new(cfg.compression, cfg.min_compress_size, cipher);

        let fresh = !dir.join(PAGES_FILE).exists();
        let mut pager = if fresh {
            let mut flags = 0u32;
            if cfg.compression {
                flags |= META_FLAG_COMPRESSION;
            }
            if cfg.encryption_key.is_some() {
                flags |= META_FLAG_ENCRYPTION;
            }
            let mut pager = Pager::create(dir, flags)?;
            // Пустое дерево: корневой лист.
            let mut txn = TreeTxn::begin(&mut pager, 0);
            tree_init(&mut txn)?;
            txn.flush()?;
            let root = txn.root;
            drop(txn);
            pager.meta.root = root;
            pager.sync()?;
            pager.write_meta()?;
            info!("created database at {}", dir.display());
            pager
        } else {
            let mut pager = Pager::open(dir)?;
            if pager.meta.flags & META_FLAG_ENCRYPTION != 0 && cfg.encryption_key.is_none() {
                return Err(bad_input(
                    "database was created with encryption; encryption key required",
                ));
            }
            // Включённое шифрование фиксируется во flags при ближайшем
            // checkpoint'е, чтобы последующие открытия требовали ключ.
            if cfg.encryption_key.is_some() {
                pager.meta.flags |= META_FLAG_ENCRYPTION;
            }
            if cfg.compression {
                pager.meta.flags |= META_FLAG_COMPRESSION;
            }
            pager
        };
        pager.set_data_fsync(cfg.data_fsync);

        let mut engine = Engine {
            dir: dir.to_path_buf(),
            pager,
            wal: Wal::open(dir, cfg.wal_segment_size)?,
            codec,
            cfg,
            next_tx_id: 0,
            durable_lsn: 0,
            pending_flush: false,
            degraded: false,
            closed: false,
            expired_queue: Vec::new(),
            deferred_free: Vec::new(),
            _lock: guard,
        };
        engine.recover()?;
        Ok(engine)
    }

    /// Доиграть журнал поверх выбранной meta.
    fn recover(&mut self) -> Result<()> {
        let durable = self.pager.meta.last_lsn;
        let mut all_freed: Vec<u32> = Vec::new();

        let pager = &mut self.pager;
        let codec = &self.codec;
        let mut applied = 0usize;
        replay(&self.dir, durable, |rec| {
            let (freed, _) = apply_ops(pager, codec, &rec.ops, rec.lsn)?;
            all_freed.extend(freed);
            applied += 1;
            Ok(())
        })?;

        // Физически усечь рваный хвост и убрать сегменты за ним,
        // иначе последующие append окажутся за мусором.
        let segs = scan_segments(&self.dir)?;
        if let Some(first_torn) = segs.iter().position(|s| s.valid_len < s.len) {
            let torn = &segs[first_torn];
            warn!(
                "wal: truncating torn tail of segment {} ({} -> {} bytes)",
                torn.seg_no, torn.len, torn.valid_len
            );
            let f = fs::OpenOptions::new().write(true).open(&torn.path)?;
            f.set_len(torn.valid_len)?;
            f.sync_all()?;
            for s in &segs[first_torn + 1..] {
                let _ = fs::remove_file(&s.path);
            }
            // Писатель журнала переоткрывается на усечённом хвосте.
            self.wal = Wal::open(&self.dir, self.cfg.wal_segment_size)?;
        }

        if applied > 0 {
            // Checkpoint доигранного состояния: альтернативная meta.
            self.pager.sync()?;
            self.pager.write_meta()?;
            info!(
                "recovery: applied {} wal record(s), last lsn {}",
                applied, self.pager.meta.last_lsn
            );
        }
        self.durable_lsn = self.pager.meta.last_lsn;

        for pid in all_freed {
            if let Err(e) = self.pager.free(pid) {
                warn!("free of page {} during recovery failed: {}", pid, e);
            }
        }
        self.wal.discard_covered(self.durable_lsn)?;
        Ok(())
    }

    /// Барьер долговечности для отложенных (no-sync) записей.
    pub fn flush(&mut self) -> Result<()> {
        self.check_writable()?;
        if !self.pending_flush {
            return Ok(());
        }
        if let Err(e) = self.wal.flush() {
            self.degraded = true;
            return Err(e);
        }
        if let Err(e) = self.pager.sync() {
            self.degraded = true;
            return Err(e.into());
        }
        if let Err(e) = self.pager.write_meta() {
            self.degraded = true;
            return Err(e);
        }
        self.durable_lsn = self.pager.meta.last_lsn;
        self.pending_flush = false;
        // Freed-наборы no-sync коммитов становятся безопасными для
        // повторного использования только теперь.
        for pid in self.deferred_free.drain(..).collect::<Vec<_>>() {
            if let Err(e) = self.pager.free(pid) {
                warn!("free of page {} after flush failed: {}", pid, e);
            }
        }
        if let Err(e) = self.wal.discard_covered(self.durable_lsn) {
            warn!("wal segment discard failed: {}", e);
        }
        Ok(())
    }

    /// Закрыть движок; подразумевает flush.
    pub fn close(mut self) -> Result<()> {
        if !self.degraded {
            self.flush()?;
        }
        self.closed = true;
        Ok(())
    }

    /// Бросить движок без flush (моделирование аварийного завершения
    /// в тестах восстановления). Лок освобождается.
    pub fn abandon(mut self) {
        self.closed = true;
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if self.closed || self.degraded {
            return;
        }
        // Остаточный flush; ошибки в Drop игнорируются.
        let _ = self.flush();
    }
}
