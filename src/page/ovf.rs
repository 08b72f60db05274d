//! page/ovf - overflow-цепочки для значений и длинных ключей.
//!
//! Payload страницы Overflow (LE):
//! [next u32]       - page_id следующего звена (NO_PAGE = конец)
//! [chunk_len u16]  - байт данных в этом звене
//! [data ...]
//!
//! Цепочка принадлежит ровно одной ячейке листа (или ячейке-разделителю
//! внутреннего узла для вынесенного ключа); время жизни - время жизни
//! этой ячейки.

use byteorder::{ByteOrder, LittleEndian};

use crate::consts::{NO_PAGE, PAGE_DATA_SIZE, PAGE_HDR_SIZE, PAGE_TYPE_OVERFLOW};
use crate::error::{corrupt, Result};
use crate::page::{self, page_update_checksum, PageHeader};

const OVF_HDR: usize = 6;
pub const OVF_DATA_MAX: usize = PAGE_DATA_SIZE - OVF_HDR;

/// Сколько страниц нужно под data_len байт.
pub fn chain_page_count(data_len: usize) -> usize {
    if data_len == 0 {
        1
    } else {
        (data_len + OVF_DATA_MAX - 1) / OVF_DATA_MAX
    }
}

/// Построить страницы цепочки. alloc выдаёт свежие page_id; возвращается
/// (head, [(pid, page)]) - страницы уже с заголовком и crc.
pub fn build_chain<A>(data: &[u8], lsn: u64, mut alloc: A) -> Result<(u32, Vec<(u32, Vec<u8>)>)>
where
    A: FnMut() -> Result<u32>,
{
    let n = chain_page_count(data.len());
    let mut pids = Vec::with_capacity(n);
    for _ in 0..n {
        pids.push(alloc()?);
    }

    let mut pages = Vec::with_capacity(n);
    let mut off = 0usize;
    for (i, &pid) in pids.iter().enumerate() {
        let chunk = (data.len() - off).min(OVF_DATA_MAX);
        let next = if i + 1 < n { pids[i + 1] } else { NO_PAGE };

        let mut pg = page::page_init(PAGE_TYPE_OVERFLOW, lsn);
        page::header_write(
            &mut pg,
            &PageHeader {
                page_type: PAGE_TYPE_OVERFLOW,
                payload_len: (OVF_HDR + chunk) as u16,
                lsn,
            },
        );
        let p = &mut pg[PAGE_HDR_SIZE..];
        LittleEndian::write_u32(&mut p[0..4], next);
        LittleEndian::write_u16(&mut p[4..6], chunk as u16);
        p[OVF_HDR..OVF_HDR + chunk].copy_from_slice(&data[off..off + chunk]);
        page_update_checksum(&mut pg);

        pages.push((pid, pg));
        off += chunk;
    }
    Ok((pids[0], pages))
}

/// Прочитать до want_len байт цепочки, начиная с head.
/// read_page обязан валидировать crc.
pub fn read_chain<R>(head: u32, want_len: usize, mut read_page: R) -> Result<Vec<u8>>
where
    R: FnMut(u32) -> Result<Vec<u8>>,
{
    let mut out = Vec::with_capacity(want_len);
    let mut cur = head;
    while cur != NO_PAGE && out.len() < want_len {
        let pg = read_page(cur)?;
        let h = page::header_read(&pg)?;
        if h.page_type != PAGE_TYPE_OVERFLOW {
            return Err(corrupt(format!(
                "overflow chain page {} has type {}",
                cur, h.page_type
            )));
        }
        let p = &pg[PAGE_HDR_SIZE..];
        let next = LittleEndian::read_u32(&p[0..4]);
        let chunk = LittleEndian::read_u16(&p[4..6]) as usize;
        if chunk > OVF_DATA_MAX {
            return Err(corrupt(format!("overflow chunk {} too large", chunk)));
        }
        out.extend_from_slice(&p[OVF_HDR..OVF_HDR + chunk]);
        cur = next;
    }
    if out.len() < want_len {
        return Err(corrupt(format!(
            "overflow chain ended early: want {}, got {}",
            want_len,
            out.len()
        )));
    }
    out.truncate(want_len);
    Ok(out)
}

/// Собрать page_id всех звеньев цепочки (для free-листа).
pub fn chain_pids<R>(head: u32, total_len: usize, mut read_page: R) -> Result<Vec<u32>>
where
    R: FnMut(u32) -> Result<Vec<u8>>,
{
    let expect = chain_page_count(total_len);
    let mut pids = Vec::with_capacity(expect);
    let mut cur = head;
    while cur != NO_PAGE && pids.len() < expect {
        pids.push(cur);
        let pg = read_page(cur)?;
        let p = &pg[PAGE_HDR_SIZE..];
        cur = LittleEndian::read_u32(&p[0..4]);
    }
    Ok(pids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn build_in_memory(data: &[u8]) -> (u32, HashMap<u32, Vec<u8>>) {
        let mut next_pid = 10u32;
        let (head, pages) = build_chain(data, 1, || {
            let p = next_pid;
            next_pid += 1;
            Ok(p)
        })
        .unwrap();
        (head, pages.into_iter().collect())
    }

    #[test]
    fn single_page_chain() {
        let data = vec![0x5A; 100];
        let (head, store) = build_in_memory(&data);
        assert_eq!(store.len(), 1);
        let back = read_chain(head, data.len(), |pid| Ok(store[&pid].clone())).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn multi_page_chain() {
        let data: Vec<u8> = (0..OVF_DATA_MAX * 2 + 37).map(|i| (i % 251) as u8).collect();
        let (head, store) = build_in_memory(&data);
        assert_eq!(store.len(), 3);
        let back = read_chain(head, data.len(), |pid| Ok(store[&pid].clone())).unwrap();
        assert_eq!(back, data);

        let pids = chain_pids(head, data.len(), |pid| Ok(store[&pid].clone())).unwrap();
        assert_eq!(pids.len(), 3);
        assert_eq!(pids[0], head);
    }

    #[test]
    fn prefix_read() {
        // Чтение первых байтов не требует прохода всей цепочки.
        let data = vec![7u8; OVF_DATA_MAX * 3];
        let (head, store) = build_in_memory(&data);
        let mut reads = 0;
        let back = read_chain(head, 9, |pid| {
            reads += 1;
            Ok(store[&pid].clone())
        })
        .unwrap();
        assert_eq!(back.len(), 9);
        assert_eq!(reads, 1);
    }

    #[test]
    fn truncated_chain_is_corrupt() {
        let data = vec![1u8; OVF_DATA_MAX + 5];
        let (head, mut store) = build_in_memory(&data);
        // Уберём второе звено.
        let second = *store.keys().find(|&&p| p != head).unwrap();
        store.remove(&second);
        let res = read_chain(head, data.len(), |pid| {
            store
                .get(&pid)
                .cloned()
                .ok_or_else(|| crate::error::corrupt("missing page"))
        });
        assert!(res.is_err());
    }
}
