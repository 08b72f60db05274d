//! codec - фрейминг хранимого значения.
//!
//! Stored value: flags_byte || [expiry_u64_le]? || payload
//! - bit0 (TTL): за флагами идёт 8-байтовый absolute expiry (ms);
//! - bit1 (LZ4): payload сжат (lz4_flex, block с префиксом размера);
//! - bit2 (ENC): payload - шифртекст с 12-байтовым nonce-префиксом.
//!
//! Порядок кодирования: compress -> encrypt. Сжатие пробуется только при
//! payload >= min_compress_size и сбрасывается, если результат не стал
//! строго меньше.

use byteorder::{ByteOrder, LittleEndian};

use crate::consts::{
    EXPIRY_LEN, VAL_FLAGS_KNOWN, VAL_FLAG_ENC, VAL_FLAG_LZ4, VAL_FLAG_TTL,
};
use crate::crypto::Cipher;
use crate::error::{corrupt, Result};

pub struct ValueCodec {
    compression: bool,
    min_compress_size: usize,
    cipher: Option<Cipher>,
}

/// Результат декодирования с точки зрения читателя.
#[derive(Debug, PartialEq, Eq)]
pub enum Decoded {
    Live(Vec<u8>),
    Expired,
}

impl ValueCodec {
    pub fn new(compression: bool, min_compress_size: usize, cipher: Option<Cipher>) -> Self {
        Self {
            compression,
            min_compress_size,
            cipher,
        }
    }

    pub fn plain() -> Self {
        Self::new(false, usize::MAX, None)
    }

    /// Собрать stored value из пользовательских байтов.
    pub fn encode(&self, value: &[u8], expiry_ms: Option<u64>) -> Result<Vec<u8>> {
        let mut flags = 0u8;
        let mut payload: Vec<u8>;

        if self.compression && value.len() >= self.min_compress_size {
            let compressed = lz4_flex::compress_prepend_size(value);
            if compressed.len() < value.len() {
                flags |= VAL_FLAG_LZ4;
                payload = compressed;
            } else {
                payload = value.to_vec();
            }
        } else {
            payload = value.to_vec();
        }

        if let Some(cipher) = &self.cipher {
            payload = cipher.seal(&payload)?;
            flags |= VAL_FLAG_ENC;
        }

        let mut out = Vec::with_capacity(1 + EXPIRY_LEN + payload.len());
        if let Some(exp) = expiry_ms {
            flags |= VAL_FLAG_TTL;
            out.push(flags);
            let mut tmp = [0u8; EXPIRY_LEN];
            LittleEndian::write_u64(&mut tmp, exp);
            out.extend_from_slice(&tmp);
        } else {
            out.push(flags);
        }
        out.extend_from_slice(&payload);
        Ok(out)
    }

    /// Разобрать stored value. Истёкшие значения не расшифровываются.
    pub fn decode(&self, stored: &[u8], now_ms: u64) -> Result<Decoded> {
        let (flags, payload) = split_header(stored)?;
        if let Some(exp) = expiry_of(stored)? {
            if now_ms > exp {
                return Ok(Decoded::Expired);
            }
        }

        let mut data: Vec<u8>;
        if flags & VAL_FLAG_ENC != 0 {
            let cipher = self
                .cipher
                .as_ref()
                .ok_or_else(|| corrupt("encrypted value but no encryption key configured"))?;
            data = cipher.open(payload)?;
        } else {
            data = payload.to_vec();
        }

        if flags & VAL_FLAG_LZ4 != 0 {
            data = lz4_flex::decompress_size_prepended(&data)
                .map_err(|e| corrupt(format!("lz4 decompress failed: {}", e)))?;
        }
        Ok(Decoded::Live(data))
    }
}

/// flags + payload без интерпретации содержимого.
fn split_header(stored: &[u8]) -> Result<(u8, &[u8])> {
    if stored.is_empty() {
        return Err(corrupt("empty stored value"));
    }
    let flags = stored[0];
    if flags & !VAL_FLAGS_KNOWN != 0 {
        return Err(corrupt(format!("unknown value flags {:#04x}", flags)));
    }
    let off = if flags & VAL_FLAG_TTL != 0 {
        1 + EXPIRY_LEN
    } else {
        1
    };
    if stored.len() < off {
        return Err(corrupt("stored value shorter than its header"));
    }
    Ok((flags, &stored[off..]))
}

/// Absolute expiry (ms), если у значения есть TTL. Не трогает payload,
/// поэтому годится для проверки "жив ли" без расшифровки.
pub fn expiry_of(stored: &[u8]) -> Result<Option<u64>> {
    if stored.is_empty() {
        return Err(corrupt("empty stored value"));
    }
    if stored[0] & VAL_FLAG_TTL == 0 {
        return Ok(None);
    }
    if stored.len() < 1 + EXPIRY_LEN {
        return Err(corrupt("ttl value shorter than expiry header"));
    }
    Ok(Some(LittleEndian::read_u64(&stored[1..1 + EXPIRY_LEN])))
}

/// true, если значение живо на момент now_ms (нет TTL или срок не вышел).
pub fn is_live(stored: &[u8], now_ms: u64) -> Result<bool> {
    Ok(match expiry_of(stored)? {
        Some(exp) => now_ms <= exp,
        None => true,
    })
}
