//! meta - две чередующиеся копии meta-страницы (page_id 0 и 1).
//!
//! Payload meta-страницы (LE, после общего 16-байтового заголовка):
//! MAGIC4 = "SKDB"
//! u16 version        = 1
//! u16 reserved       = 0
//! u32 root_page_id
//! u32 free_head      (голова free-листа; NO_PAGE = пусто)
//! u32 next_page_id
//! u64 last_lsn       (last-durable-LSN; дублируется в page_lsn заголовка)
//! u32 flags          (bit0 compression-default, bit1 encryption-enabled)
//!
//! Политика:
//! - Meta валидна, если совпали magic и crc страницы.
//! - При открытии из валидных копий выбирается та, у которой last_lsn выше.
//! - Писатель чередует слоты: slot = last_lsn % 2, так что предыдущая
//!   durable-копия остаётся нетронутой до fsync новой.

use byteorder::{ByteOrder, LittleEndian};

use crate::consts::{
    FIRST_DATA_PID, FORMAT_VERSION, META_MAGIC, META_PID_A, META_PID_B, NO_PAGE, PAGE_HDR_SIZE,
    PAGE_SIZE, PAGE_TYPE_META,
};
use crate::error::{corrupt, Result, SilkError};
use crate::page::{self, page_update_checksum, page_verify_checksum, PageHeader};

const META_PAYLOAD_LEN: usize = 4 + 2 + 2 + 4 + 4 + 4 + 8 + 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaHeader {
    pub version: u16,
    pub root: u32,
    pub free_head: u32,
    pub next_page_id: u32,
    pub last_lsn: u64,
    pub flags: u32,
}

impl Default for MetaHeader {
    fn default() -> Self {
        Self {
            version: FORMAT_VERSION,
            root: NO_PAGE,
            free_head: NO_PAGE,
            next_page_id: FIRST_DATA_PID,
            last_lsn: 0,
            flags: 0,
        }
    }
}

impl MetaHeader {
    /// Слот (page_id), в который должна лечь эта копия.
    #[inline]
    pub fn slot(&self) -> u32 {
        if self.last_lsn % 2 == 0 {
            META_PID_A
        } else {
            META_PID_B
        }
    }
}

/// Закодировать meta в полную страницу (crc проставлен).
pub fn encode_meta(m: &MetaHeader) -> Vec<u8> {
    let mut pg = page::page_init(PAGE_TYPE_META, m.last_lsn);
    page::header_write(
        &mut pg,
        &PageHeader {
            page_type: PAGE_TYPE_META,
            payload_len: META_PAYLOAD_LEN as u16,
            lsn: m.last_lsn,
        },
    );
    let p = &mut pg[PAGE_HDR_SIZE..];
    p[0..4].copy_from_slice(META_MAGIC);
    LittleEndian::write_u16(&mut p[4..6], m.version);
    LittleEndian::write_u16(&mut p[6..8], 0);
    LittleEndian::write_u32(&mut p[8..12], m.root);
    LittleEndian::write_u32(&mut p[12..16], m.free_head);
    LittleEndian::write_u32(&mut p[16..20], m.next_page_id);
    LittleEndian::write_u64(&mut p[20..28], m.last_lsn);
    LittleEndian::write_u32(&mut p[28..32], m.flags);
    page_update_checksum(&mut pg);
    pg
}

/// Раскодировать meta-страницу. Err(Corrupt) для битой копии,
/// Err(VersionMismatch), если формат новее поддерживаемого.
pub fn decode_meta(pg: &[u8]) -> Result<MetaHeader> {
    if pg.len() != PAGE_SIZE {
        return Err(corrupt(format!("meta page size {}", pg.len())));
    }
    if !page_verify_checksum(pg) {
        return Err(corrupt("meta page crc mismatch"));
    }
    let h = page::header_read(pg)?;
    if h.page_type != PAGE_TYPE_META {
        return Err(corrupt(format!("meta page has type {}", h.page_type)));
    }
    let p = &pg[PAGE_HDR_SIZE..];
    if &p[0..4] != META_MAGIC {
        return Err(corrupt("bad meta magic"));
    }
    let version = LittleEndian::read_u16(&p[4..6]);
    if version > FORMAT_VERSION {
        return Err(SilkError::VersionMismatch {
            found: version,
            supported: FORMAT_VERSION,
        });
    }
    let root = LittleEndian::read_u32(&p[8..12]);
    let free_head = LittleEndian::read_u32(&p[12..16]);
    let next_page_id = LittleEndian::read_u32(&p[16..20]);
    let last_lsn = LittleEndian::read_u64(&p[20..28]);
    let flags = LittleEndian::read_u32(&p[28..32]);
    if next_page_id < FIRST_DATA_PID {
        return Err(corrupt(format!("meta next_page_id {}", next_page_id)));
    }
    Ok(MetaHeader {
        version,
        root,
        free_head,
        next_page_id,
        last_lsn,
        flags,
    })
}

/// Выбрать лучшую копию из двух. VersionMismatch любой копии фатален;
/// из валидных побеждает большая last_lsn; если обе биты - Corrupt.
pub fn choose_meta(a: Result<MetaHeader>, b: Result<MetaHeader>) -> Result<MetaHeader> {
    // Слишком новый формат не маскируется под "битую копию".
    if let Err(SilkError::VersionMismatch { found, supported }) = &a {
        return Err(SilkError::VersionMismatch {
            found: *found,
            supported: *supported,
        });
    }
    if let Err(SilkError::VersionMismatch { found, supported }) = &b {
        return Err(SilkError::VersionMismatch {
            found: *found,
            supported: *supported,
        });
    }
    match (a, b) {
        (Ok(ma), Ok(mb)) => Ok(if mb.last_lsn > ma.last_lsn { mb } else { ma }),
        (Ok(m), Err(_)) | (Err(_), Ok(m)) => Ok(m),
        (Err(_), Err(_)) => Err(corrupt("both meta copies are invalid")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meta_roundtrip() {
        let m0 = MetaHeader {
            version: FORMAT_VERSION,
            root: 17,
            free_head: 5,
            next_page_id: 42,
            last_lsn: 1234,
            flags: 0x3,
        };
        let pg = encode_meta(&m0);
        let m1 = decode_meta(&pg).unwrap();
        assert_eq!(m0, m1);
        assert_eq!(m0.slot(), META_PID_A);

        let mut odd = m0.clone();
        odd.last_lsn = 1235;
        assert_eq!(odd.slot(), META_PID_B);
    }

    #[test]
    fn newer_version_refused() {
        let m = MetaHeader {
            version: FORMAT_VERSION,
            ..Default::default()
        };
        let mut pg = encode_meta(&m);
        // Поднимем версию и пересчитаем crc.
        LittleEndian::write_u16(&mut pg[PAGE_HDR_SIZE + 4..PAGE_HDR_SIZE + 6], 9);
        page_update_checksum(&mut pg);
        match decode_meta(&pg) {
            Err(SilkError::VersionMismatch { found, .. }) => assert_eq!(found, 9),
            other => panic!("expected VersionMismatch, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn choose_prefers_higher_lsn() {
        let mut a = MetaHeader::default();
        a.last_lsn = 10;
        let mut b = MetaHeader::default();
        b.last_lsn = 11;
        let best = choose_meta(Ok(a), Ok(b.clone())).unwrap();
        assert_eq!(best.last_lsn, 11);

        let only = choose_meta(Err(corrupt("x")), Ok(b.clone())).unwrap();
        assert_eq!(only.last_lsn, 11);

        assert!(choose_meta(Err(corrupt("x")), Err(corrupt("y"))).is_err());
    }
}
