//! page/checksum - CRC32C (Castagnoli) страницы.
//!
//! - crc хранится в заголовке (offset 12..16, LE);
//! - считается по всей странице с занулённым полем crc;
//! - нулевой сохранённый crc валидным не считается: каждая аллоцированная
//!   страница записывается целиком вместе с контрольной суммой.

use byteorder::{ByteOrder, LittleEndian};

use crate::consts::{PAGE_OFF_CRC, PAGE_SIZE};

#[inline]
fn compute(page: &[u8]) -> u32 {
    // Инкрементально по частям вокруг поля crc, без копии страницы.
    let c = crc32c::crc32c(&page[..PAGE_OFF_CRC]);
    let c = crc32c::crc32c_append(c, &[0u8; 4]);
    crc32c::crc32c_append(c, &page[PAGE_OFF_CRC + 4..])
}

/// Проставить crc в заголовке страницы.
pub fn page_update_checksum(page: &mut [u8]) {
    debug_assert_eq!(page.len(), PAGE_SIZE);
    let digest = compute(page);
    LittleEndian::write_u32(&mut page[PAGE_OFF_CRC..PAGE_OFF_CRC + 4], digest);
}

/// Проверить crc. true = ок.
pub fn page_verify_checksum(page: &[u8]) -> bool {
    debug_assert_eq!(page.len(), PAGE_SIZE);
    let stored = LittleEndian::read_u32(&page[PAGE_OFF_CRC..PAGE_OFF_CRC + 4]);
    stored == compute(page)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::PAGE_TYPE_LEAF;
    use crate::page::page_init;

    #[test]
    fn checksum_detects_flip() {
        let mut page = page_init(PAGE_TYPE_LEAF, 1);
        page[100] = 0xAB;
        page_update_checksum(&mut page);
        assert!(page_verify_checksum(&page));

        page[100] ^= 0x01;
        assert!(!page_verify_checksum(&page));
        page[100] ^= 0x01;
        assert!(page_verify_checksum(&page));
    }
}
