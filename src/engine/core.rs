//! engine/core - структура Engine и общие помощники.

use std::path::PathBuf;

use crate::codec::ValueCodec;
use crate::config::SilkConfig;
use crate::error::{io_msg, Result, SilkError};
use crate::lock::LockGuard;
use crate::pager::Pager;
use crate::wal::Wal;

/// Однопоточный движок одной базы. Все операции синхронные; владеет
/// файлом страниц, журналом и эксклюзивным локом каталога.
pub struct Engine {
    pub(crate) dir: PathBuf,
    pub(crate) pager: Pager,
    pub(crate) wal: Wal,
    pub(crate) codec: ValueCodec,
    pub(crate) cfg: SilkConfig,

    pub(crate) next_tx_id: u64,
    /// last_lsn, зафиксированный в durable-копии meta.
    pub(crate) durable_lsn: u64,
    /// Есть применённые, но не durable операции (put_no_sync).
    pub(crate) pending_flush: bool,
    /// IoError между WAL flush и meta sync: только чтение до переоткрытия.
    pub(crate) degraded: bool,
    pub(crate) closed: bool,

    /// Ключи с истёкшим TTL, замеченные чтениями; удаляются лениво
    /// ближайшей пишущей транзакцией.
    pub(crate) expired_queue: Vec<Vec<u8>>,

    /// Страницы, освобождённые no-sync коммитами. Во free-лист они
    /// попадают только после того, как их WAL-записи durable: иначе
    /// повторное использование затёрло бы страницы, на которые ещё
    /// ссылается durable-дерево.
    pub(crate) deferred_free: Vec<u32>,

    pub(crate) _lock: LockGuard,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stats {
    pub pages: u32,
    pub free_pages: u32,
    pub last_lsn: u64,
    pub durable_lsn: u64,
    pub wal_bytes: u64,
}

impl Engine {
    #[inline]
    pub(crate) fn check_open(&self) -> Result<()> {
        if self.closed {
            return Err(SilkError::Closed);
        }
        Ok(())
    }

    #[inline]
    pub(crate) fn check_writable(&self) -> Result<()> {
        self.check_open()?;
        if self.degraded {
            return Err(io_msg(
                "engine is in read-only degraded state; reopen the database",
            ));
        }
        Ok(())
    }

    /// LSN последнего коммита (в памяти; durable см. Stats::durable_lsn).
    /// Точка привязки для внешних change-стримов.
    pub fn last_lsn(&self) -> u64 {
        self.pager.meta.last_lsn
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn stats(&self) -> Result<Stats> {
        self.check_open()?;
        let wal_bytes = crate::wal::scan_segments(&self.dir)?
            .iter()
            .map(|s| s.len)
            .sum();
        Ok(Stats {
            pages: self.pager.meta.next_page_id,
            free_pages: self.pager.free_count()?,
            last_lsn: self.pager.meta.last_lsn,
            durable_lsn: self.durable_lsn,
            wal_bytes,
        })
    }
}
