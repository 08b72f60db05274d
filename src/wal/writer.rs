//! wal/writer - append-only запись журнала.
//!
//! - append() буферизует запись в текущий сегмент (ротация по порогу
//!   размера перед записью);
//! - flush() - fsync текущего сегмента: после возврата последний
//!   добавленный lsn durable;
//! - discard_covered() удаляет закрытые сегменты, полностью покрытые
//!   durable-отметкой (физическое усечение только по границам сегментов).
//!
//! ENV SKDB_WAL_DISABLE_FSYNC=1|true|yes|on - отключить физический fsync
//! (бенчи/разработка; долговечность не гарантируется).

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use log::debug;

use crate::error::Result;

use super::record::{encode_record, TxRecord};
use super::replay::scan_segments;
use super::seg_path;

pub struct Wal {
    dir: PathBuf,
    seg_no: u64,
    file: File,
    seg_len: u64,
    segment_size: u64,
    /// Закрытые сегменты: (номер, последний lsn в сегменте).
    closed: Vec<(u64, u64)>,
    /// Последний lsn, записанный в текущий сегмент.
    last_lsn_in_current: u64,
}

impl Wal {
    /// Открыть журнал: продолжить последний сегмент или создать первый.
    pub fn open(dir: &Path, segment_size: u64) -> Result<Self> {
        let segs = scan_segments(dir)?;
        let (seg_no, closed, last_in_current) = match segs.last() {
            Some(last) => {
                let closed = segs[..segs.len() - 1]
                    .iter()
                    .map(|s| (s.seg_no, s.last_lsn))
                    .collect();
                (last.seg_no, closed, last.last_lsn)
            }
            None => (1, Vec::new(), 0),
        };

        let path = seg_path(dir, seg_no);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let seg_len = file.metadata()?.len();
        Ok(Self {
            dir: dir.to_path_buf(),
            seg_no,
            file,
            seg_len,
            segment_size,
            closed,
            last_lsn_in_current: last_in_current,
        })
    }

    /// Добавить запись в журнал (без fsync).
    pub fn append(&mut self, rec: &TxRecord) -> Result<()> {
        if self.seg_len >= self.segment_size {
            self.rotate()?;
        }
        let bytes = encode_record(rec);
        self.file.write_all(&bytes)?;
        self.seg_len += bytes.len() as u64;
        self.last_lsn_in_current = rec.lsn;
        Ok(())
    }

    /// Барьер долговечности журнала.
    pub fn flush(&mut self) -> Result<()> {
        if !wal_fsync_disabled() {
            self.file.sync_all()?;
        }
        Ok(())
    }

    /// Начать новый сегмент. Текущий уходит в closed.
    fn rotate(&mut self) -> Result<()> {
        // Хвост старого сегмента должен быть на диске до переключения.
        self.flush()?;
        self.closed.push((self.seg_no, self.last_lsn_in_current));
        self.seg_no += 1;
        let path = seg_path(&self.dir, self.seg_no);
        self.file = OpenOptions::new().create_new(true).append(true).open(&path)?;
        self.seg_len = 0;
        self.last_lsn_in_current = 0;
        debug!("wal: rotated to segment {}", self.seg_no);
        Ok(())
    }

    /// Удалить закрытые сегменты, полностью покрытые durable_lsn.
    /// Если покрыт и текущий сегмент, он ротируется и тоже удаляется,
    /// чтобы журнал не рос бесконечно при непрерывных checkpoint'ах.
    pub fn discard_covered(&mut self, durable_lsn: u64) -> Result<()> {
        let mut kept = Vec::with_capacity(self.closed.len());
        for (no, last) in self.closed.drain(..) {
            if last <= durable_lsn {
                let path = seg_path(&self.dir, no);
                let _ = fs::remove_file(&path);
                debug!("wal: discarded segment {} (last lsn {})", no, last);
            } else {
                kept.push((no, last));
            }
        }
        self.closed = kept;

        if self.seg_len >= self.segment_size
            && self.last_lsn_in_current <= durable_lsn
            && self.closed.is_empty()
        {
            let old = self.seg_no;
            self.rotate()?;
            self.closed.clear();
            let _ = fs::remove_file(seg_path(&self.dir, old));
            debug!("wal: discarded full current segment {}", old);
        }
        Ok(())
    }
}

fn wal_fsync_disabled() -> bool {
    static DISABLED: OnceLock<bool> = OnceLock::new();
    *DISABLED.get_or_init(|| {
        std::env::var("SKDB_WAL_DISABLE_FSYNC")
            .ok()
            .map(|s| s.trim().to_ascii_lowercase())
            .map(|s| s == "1" || s == "true" || s == "yes" || s == "on")
            .unwrap_or(false)
    })
}
