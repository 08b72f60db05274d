//! pager/io - операции ввода/вывода страниц:
//! - read_page: чтение + проверка CRC32C (Corrupt при несовпадении);
//! - write_page: запись выровненной страницы как есть (fsync отдельно);
//! - sync: барьер долговечности для всех ранее записанных страниц.

use std::io::{Read, Seek, SeekFrom, Write};

use crate::consts::PAGE_SIZE;
use crate::error::{corrupt, Result};
use crate::page::page_verify_checksum;

use super::core::Pager;

impl Pager {
    /// Прочитать страницу и проверить crc.
    pub fn read_page(&self, page_id: u32) -> Result<Vec<u8>> {
        if page_id >= self.meta.next_page_id {
            return Err(corrupt(format!(
                "page {} beyond allocation (next_page_id={})",
                page_id, self.meta.next_page_id
            )));
        }
        let buf = self.read_page_raw(page_id)?;
        if !page_verify_checksum(&buf) {
            return Err(corrupt(format!("page {} checksum mismatch", page_id)));
        }
        Ok(buf)
    }

    /// Чтение без проверки crc (meta-кандидаты, doctor).
    pub(crate) fn read_page_raw(&self, page_id: u32) -> Result<Vec<u8>> {
        let off = page_id as u64 * PAGE_SIZE as u64;
        let mut buf = vec![0u8; PAGE_SIZE];
        let mut f = &self.file;
        f.seek(SeekFrom::Start(off))?;
        f.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Записать страницу (полную, с уже проставленным crc). Без fsync:
    /// вызывающий код коалесцирует sync() на границе коммита.
    pub fn write_page(&mut self, page_id: u32, buf: &[u8]) -> Result<()> {
        if page_id >= self.meta.next_page_id {
            return Err(corrupt(format!(
                "write to unallocated page {} (next_page_id={})",
                page_id, self.meta.next_page_id
            )));
        }
        self.write_page_at(page_id, buf)
    }

    /// Низкоуровневая запись по page_id без проверки аллокации
    /// (используется для meta-слотов при create).
    pub(crate) fn write_page_at(&mut self, page_id: u32, buf: &[u8]) -> Result<()> {
        debug_assert_eq!(buf.len(), PAGE_SIZE);
        let off = page_id as u64 * PAGE_SIZE as u64;
        let mut f = &self.file;
        f.seek(SeekFrom::Start(off))?;
        f.write_all(buf)?;
        Ok(())
    }

    /// Барьер долговечности: после возврата все ранее записанные
    /// страницы на стабильном носителе.
    pub fn sync(&mut self) -> Result<()> {
        if self.data_fsync {
            self.file.sync_all()?;
        }
        Ok(())
    }
}
