//! pager/core - ядро Pager: файл db.pages, выбор живой meta, запись meta.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use crate::consts::{META_PID_A, META_PID_B, PAGES_FILE, PAGE_SIZE};
use crate::error::Result;
use crate::meta::{choose_meta, decode_meta, encode_meta, MetaHeader};

/// Низкоуровневый менеджер страниц. Владеет файловым дескриптором;
/// meta отражает ТЕКУЩЕЕ состояние в памяти, durable-копия на диске
/// обновляется только через write_meta().
pub struct Pager {
    pub(crate) file: File,
    pub meta: MetaHeader,
    pub(crate) dir: PathBuf,
    pub(crate) data_fsync: bool,
}

impl Pager {
    /// Создать новый файл страниц: обе копии meta с last_lsn=0.
    /// Ошибка, если файл уже существует.
    pub fn create(dir: &Path, flags: u32) -> Result<Self> {
        let path = dir.join(PAGES_FILE);
        let file = OpenOptions::new()
            .create_new(true)
            .read(true)
            .write(true)
            .open(&path)?;

        let meta = MetaHeader {
            flags,
            ..MetaHeader::default()
        };
        let mut pager = Self {
            file,
            meta,
            dir: dir.to_path_buf(),
            data_fsync: true,
        };
        // Обе копии валидны с самого начала.
        let pg = encode_meta(&pager.meta);
        pager.write_page_at(META_PID_A, &pg)?;
        pager.write_page_at(META_PID_B, &pg)?;
        pager.sync()?;
        Ok(pager)
    }

    /// Открыть существующий файл страниц и выбрать живую meta.
    pub fn open(dir: &Path) -> Result<Self> {
        let path = dir.join(PAGES_FILE);
        let file = OpenOptions::new().read(true).write(true).open(&path)?;

        let mut pager = Self {
            file,
            meta: MetaHeader::default(),
            dir: dir.to_path_buf(),
            data_fsync: true,
        };
        let a = pager.read_page_raw(META_PID_A).and_then(|p| decode_meta(&p));
        let b = pager.read_page_raw(META_PID_B).and_then(|p| decode_meta(&p));
        pager.meta = choose_meta(a, b)?;
        Ok(pager)
    }

    pub fn set_data_fsync(&mut self, on: bool) {
        self.data_fsync = on;
    }

    /// Durable-запись текущей meta в чередующийся слот + fsync.
    /// Это и есть checkpoint: после возврата last_lsn на диске.
    pub fn write_meta(&mut self) -> Result<()> {
        let pg = encode_meta(&self.meta);
        let slot = self.meta.slot();
        self.write_page_at(slot, &pg)?;
        self.sync()?;
        Ok(())
    }

    /// Число страниц, покрытых длиной файла (для doctor/stats).
    pub fn file_page_count(&self) -> Result<u32> {
        let len = self.file.metadata()?.len();
        Ok((len / PAGE_SIZE as u64) as u32)
    }
}
