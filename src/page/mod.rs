//! page - общий заголовок страницы и контроль целостности.
//!
//! Каждая страница (4 KiB) начинается с 16-байтового заголовка (LE):
//! [type u8][pad u8][payload_len u16][page_lsn u64][crc32c u32]
//! CRC32C считается по всей странице с занулённым полем crc.

pub mod checksum;
pub mod node;
pub mod ovf;

use byteorder::{ByteOrder, LittleEndian};

use crate::consts::{
    PAGE_DATA_SIZE, PAGE_HDR_SIZE, PAGE_OFF_LSN, PAGE_OFF_PLEN, PAGE_OFF_TYPE, PAGE_SIZE,
    PAGE_TYPE_FREE, PAGE_TYPE_INTERNAL, PAGE_TYPE_LEAF, PAGE_TYPE_META, PAGE_TYPE_OVERFLOW,
};
use crate::error::{corrupt, Result};

pub use checksum::{page_update_checksum, page_verify_checksum};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageHeader {
    pub page_type: u8,
    pub payload_len: u16,
    pub lsn: u64,
}

/// Прочитать заголовок. CRC здесь не проверяется (см. page_verify_checksum).
pub fn header_read(page: &[u8]) -> Result<PageHeader> {
    debug_assert_eq!(page.len(), PAGE_SIZE);
    let page_type = page[PAGE_OFF_TYPE];
    if !known_page_type(page_type) {
        return Err(corrupt(format!("unknown page type {}", page_type)));
    }
    let payload_len = LittleEndian::read_u16(&page[PAGE_OFF_PLEN..PAGE_OFF_PLEN + 2]);
    if payload_len as usize > PAGE_DATA_SIZE {
        return Err(corrupt(format!(
            "payload_len {} exceeds page data area",
            payload_len
        )));
    }
    let lsn = LittleEndian::read_u64(&page[PAGE_OFF_LSN..PAGE_OFF_LSN + 8]);
    Ok(PageHeader {
        page_type,
        payload_len,
        lsn,
    })
}

/// Записать заголовок (кроме crc; crc проставляет page_update_checksum).
pub fn header_write(page: &mut [u8], h: &PageHeader) {
    debug_assert_eq!(page.len(), PAGE_SIZE);
    page[PAGE_OFF_TYPE] = h.page_type;
    page[PAGE_OFF_TYPE + 1] = 0; // pad
    LittleEndian::write_u16(&mut page[PAGE_OFF_PLEN..PAGE_OFF_PLEN + 2], h.payload_len);
    LittleEndian::write_u64(&mut page[PAGE_OFF_LSN..PAGE_OFF_LSN + 8], h.lsn);
}

/// Свежая нулевая страница с заголовком данного типа.
pub fn page_init(page_type: u8, lsn: u64) -> Vec<u8> {
    let mut page = vec![0u8; PAGE_SIZE];
    header_write(
        &mut page,
        &PageHeader {
            page_type,
            payload_len: 0,
            lsn,
        },
    );
    page
}

#[inline]
pub fn payload(page: &[u8]) -> &[u8] {
    &page[PAGE_HDR_SIZE..]
}

#[inline]
pub fn payload_mut(page: &mut [u8]) -> &mut [u8] {
    &mut page[PAGE_HDR_SIZE..]
}

#[inline]
fn known_page_type(t: u8) -> bool {
    matches!(
        t,
        PAGE_TYPE_META | PAGE_TYPE_FREE | PAGE_TYPE_INTERNAL | PAGE_TYPE_LEAF | PAGE_TYPE_OVERFLOW
    )
}
