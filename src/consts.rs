//! Общие константы форматов (pages, meta, WAL, value framing).

// -------- Pages --------
pub const PAGE_SIZE: usize = 4096;
pub const PAGE_HDR_SIZE: usize = 16; // [type u8][pad u8][payload_len u16][page_lsn u64][crc32c u32]
pub const PAGE_DATA_SIZE: usize = PAGE_SIZE - PAGE_HDR_SIZE;

pub const PAGE_TYPE_META: u8 = 1;
pub const PAGE_TYPE_FREE: u8 = 2;
pub const PAGE_TYPE_INTERNAL: u8 = 3;
pub const PAGE_TYPE_LEAF: u8 = 4;
pub const PAGE_TYPE_OVERFLOW: u8 = 5;

// Offsets внутри заголовка страницы
pub const PAGE_OFF_TYPE: usize = 0;
pub const PAGE_OFF_PLEN: usize = 2;
pub const PAGE_OFF_LSN: usize = 4;
pub const PAGE_OFF_CRC: usize = 12;

// page_id 0/1 зарезервированы под две копии meta; данные начинаются с 2.
pub const META_PID_A: u32 = 0;
pub const META_PID_B: u32 = 1;
pub const FIRST_DATA_PID: u32 = 2;

/// "Нет страницы" для ссылок (root, free-head, next_leaf, overflow next).
/// Страницы 0/1 заняты meta и никогда не участвуют в линках.
pub const NO_PAGE: u32 = 0;

// -------- Meta --------
pub const META_MAGIC: &[u8; 4] = b"SKDB";
pub const FORMAT_VERSION: u16 = 1;

pub const META_FLAG_COMPRESSION: u32 = 0x1;
pub const META_FLAG_ENCRYPTION: u32 = 0x2;

// -------- Files --------
pub const PAGES_FILE: &str = "db.pages";
pub const LOCK_FILE: &str = "db.lock";
pub const ALT_JOURNAL_FILE: &str = "db.alt";
pub const WAL_SEG_PREFIX: &str = "wal-";

// -------- WAL --------
// Запись WAL (LE):
// [len u32]        - длина всего, что идёт после поля len (включая crc)
// [lsn u64]
// [tx_id u64]
// [op_count u32]
// [op]*            - см. ниже
// [crc32c u32]     - CRC32C по байтам между len и crc
//
// Op: [op_type u8][key_len u32][key][val_len u32 | 0xFFFF_FFFF][val?]
// Для PutTTL val начинается с 8-байтового absolute expiry (ms).
pub const WAL_REC_FIXED: usize = 4 + 8 + 8 + 4 + 4; // len + lsn + tx_id + op_count + crc

pub const WAL_OP_PUT: u8 = 1;
pub const WAL_OP_DELETE: u8 = 2;
pub const WAL_OP_PUT_TTL: u8 = 3;

/// val_len для операций без значения (Delete).
pub const WAL_VAL_NONE: u32 = 0xFFFF_FFFF;

/// Размер сегмента WAL по умолчанию (ротация по границе сегмента).
pub const WAL_SEGMENT_SIZE: u64 = 4 * 1024 * 1024;

// -------- Stored value framing --------
// flags_byte || [expiry_u64_le]? || payload
pub const VAL_FLAG_TTL: u8 = 0x1;
pub const VAL_FLAG_LZ4: u8 = 0x2;
pub const VAL_FLAG_ENC: u8 = 0x4;
pub const VAL_FLAGS_KNOWN: u8 = VAL_FLAG_TTL | VAL_FLAG_LZ4 | VAL_FLAG_ENC;

pub const EXPIRY_LEN: usize = 8;
pub const NONCE_LEN: usize = 12;

/// Минимальный размер payload, при котором имеет смысл пробовать LZ4.
pub const MIN_COMPRESS_SIZE: usize = 64;

// -------- Limits --------
pub const MAX_KEY_LEN: usize = 4096;
pub const MAX_VALUE_LEN: usize = u32::MAX as usize;
pub const MAX_NAME_LEN: usize = 128;

/// Значения длиннее этого порога уходят в overflow-цепочку.
pub const INLINE_THRESHOLD: usize = 256;

/// Ключи длиннее этого порога хранятся в overflow-цепочке (в ячейке остаётся ссылка).
/// Порог подобран так, чтобы узел всегда вмещал несколько ячеек.
pub const KEY_SPILL_THRESHOLD: usize = 512;
