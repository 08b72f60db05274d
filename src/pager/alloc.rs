//! pager/alloc - аллокация и освобождение страниц.
//!
//! Free-лист живёт на самих страницах: страница типа Free хранит в payload
//! page_id следующей свободной (NO_PAGE = конец списка). Голова списка - в
//! meta.free_head. allocate() снимает голову или дорастает файл на одну
//! страницу; free() перезаписывает тело страницы ссылкой на прежнюю голову.
//!
//! meta.free_head / meta.next_page_id изменяются только в памяти; durable
//! они становятся при ближайшем write_meta() (конец коммита). Освобождённые
//! транзакцией страницы попадают сюда только после того, как её WAL-запись
//! durable (см. engine/commit).

use byteorder::{ByteOrder, LittleEndian};

use crate::consts::{NO_PAGE, PAGE_HDR_SIZE, PAGE_SIZE, PAGE_TYPE_FREE};
use crate::error::{corrupt, Result};
use crate::page::{self, page_update_checksum, PageHeader};

use super::core::Pager;

impl Pager {
    /// Выделить страницу: голова free-листа, иначе расширение файла.
    pub fn allocate(&mut self) -> Result<u32> {
        let head = self.meta.free_head;
        if head != NO_PAGE {
            let pg = self.read_page(head)?;
            let h = page::header_read(&pg)?;
            if h.page_type != PAGE_TYPE_FREE {
                return Err(corrupt(format!(
                    "free-list head {} has page type {}",
                    head, h.page_type
                )));
            }
            let next = LittleEndian::read_u32(&pg[PAGE_HDR_SIZE..PAGE_HDR_SIZE + 4]);
            self.meta.free_head = next;
            return Ok(head);
        }

        let pid = self.meta.next_page_id;
        self.meta.next_page_id += 1;
        let need = self.meta.next_page_id as u64 * PAGE_SIZE as u64;
        if self.file.metadata()?.len() < need {
            self.file.set_len(need)?;
        }
        Ok(pid)
    }

    /// Вернуть страницу во free-лист, перезаписав её тело.
    pub fn free(&mut self, page_id: u32) -> Result<()> {
        if page_id >= self.meta.next_page_id {
            return Err(corrupt(format!(
                "free of unallocated page {} (next_page_id={})",
                page_id, self.meta.next_page_id
            )));
        }
        let mut pg = page::page_init(PAGE_TYPE_FREE, self.meta.last_lsn);
        page::header_write(
            &mut pg,
            &PageHeader {
                page_type: PAGE_TYPE_FREE,
                payload_len: 4,
                lsn: self.meta.last_lsn,
            },
        );
        LittleEndian::write_u32(&mut pg[PAGE_HDR_SIZE..PAGE_HDR_SIZE + 4], self.meta.free_head);
        page_update_checksum(&mut pg);
        self.write_page(page_id, &pg)?;
        self.meta.free_head = page_id;
        Ok(())
    }

    /// Длина free-листа (обход по ссылкам; для stats/doctor).
    pub fn free_count(&self) -> Result<u32> {
        let mut n = 0u32;
        let mut cur = self.meta.free_head;
        while cur != NO_PAGE {
            let pg = self.read_page(cur)?;
            let h = page::header_read(&pg)?;
            if h.page_type != PAGE_TYPE_FREE {
                return Err(corrupt(format!("free-list node {} has type {}", cur, h.page_type)));
            }
            n += 1;
            if n > self.meta.next_page_id {
                return Err(corrupt("free-list cycle"));
            }
            cur = LittleEndian::read_u32(&pg[PAGE_HDR_SIZE..PAGE_HDR_SIZE + 4]);
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::FIRST_DATA_PID;
    use std::fs;
    use std::path::PathBuf;

    fn unique_dir(tag: &str) -> PathBuf {
        let pid = std::process::id();
        let t = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let p = std::env::temp_dir().join(format!("skdb-{}-{}-{}", tag, pid, t));
        fs::create_dir_all(&p).unwrap();
        p
    }

    #[test]
    fn alloc_free_reuse() {
        let dir = unique_dir("alloc");
        let mut pager = Pager::create(&dir, 0).unwrap();

        let a = pager.allocate().unwrap();
        let b = pager.allocate().unwrap();
        assert_eq!(a, FIRST_DATA_PID);
        assert_eq!(b, FIRST_DATA_PID + 1);
        assert_eq!(pager.free_count().unwrap(), 0);

        pager.free(a).unwrap();
        assert_eq!(pager.meta.free_head, a);
        assert_eq!(pager.free_count().unwrap(), 1);

        // Следующая аллокация снимает голову списка.
        let c = pager.allocate().unwrap();
        assert_eq!(c, a);
        assert_eq!(pager.free_count().unwrap(), 0);
    }

    #[test]
    fn file_length_is_page_multiple() {
        let dir = unique_dir("len");
        let mut pager = Pager::create(&dir, 0).unwrap();
        for _ in 0..5 {
            pager.allocate().unwrap();
        }
        let len = fs::metadata(dir.join(crate::consts::PAGES_FILE)).unwrap().len();
        assert_eq!(len % PAGE_SIZE as u64, 0);
        assert_eq!(len, 7 * PAGE_SIZE as u64); // 2 meta + 5 data
    }
}
