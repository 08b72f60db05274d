//! WAL - сегментированный журнал упреждающей записи.
//!
//! Разделение:
//! - record.rs - кодек записи (TxRecord/WalOp), CRC32C на запись.
//! - writer.rs - append/flush, ротация и удаление покрытых сегментов.
//! - replay.rs - последовательный реплей с остановкой на рваном хвосте.
//!
//! Сегменты: файлы `wal-NNNNNNNNNN` (10 цифр) в каталоге БД; внутри сегмента
//! записи идут подряд без заголовка файла. Порядок задают номера сегментов.

pub mod record;
pub mod replay;
pub mod writer;

pub use record::{TxRecord, WalOp};
pub use replay::{replay, scan_segments, SegInfo};
pub use writer::Wal;

use std::path::{Path, PathBuf};

use crate::consts::WAL_SEG_PREFIX;

/// Путь к файлу сегмента по номеру.
pub(crate) fn seg_path(dir: &Path, seg_no: u64) -> PathBuf {
    dir.join(format!("{}{:010}", WAL_SEG_PREFIX, seg_no))
}

/// Разобрать имя файла сегмента -> номер.
pub(crate) fn parse_seg_name(name: &str) -> Option<u64> {
    let rest = name.strip_prefix(WAL_SEG_PREFIX)?;
    if rest.len() != 10 || !rest.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    rest.parse().ok()
}
