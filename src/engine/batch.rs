//! engine/batch - атомарный пакетный put.
//!
//! Фрейминг входа: back-to-back пары
//! { key_len u32 le, key, val_len u32 le, val }
//! Буфер обязан разобраться ровно до последнего байта; любое усечение
//! или хвостовой мусор - BadInput без изменения состояния.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{bad_input, Result};
use crate::txn::validate_key_value;
use crate::wal::WalOp;

use super::core::Engine;

/// Разобрать буфер батча в пары (key, value).
pub(crate) fn decode_batch(data: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
    let mut pairs = Vec::new();
    let mut off = 0usize;
    let len = data.len();
    while off < len {
        if off + 4 > len {
            return Err(bad_input("batch: truncated key length"));
        }
        let klen = LittleEndian::read_u32(&data[off..off + 4]) as usize;
        off += 4;
        if off + klen > len {
            return Err(bad_input("batch: truncated key"));
        }
        let key = data[off..off + klen].to_vec();
        off += klen;
        if off + 4 > len {
            return Err(bad_input("batch: truncated value length"));
        }
        let vlen = LittleEndian::read_u32(&data[off..off + 4]) as usize;
        off += 4;
        if off + vlen > len {
            return Err(bad_input("batch: truncated value"));
        }
        let value = data[off..off + vlen].to_vec();
        off += vlen;
        validate_key_value(&key, Some(&value))?;
        pairs.push((key, value));
    }
    debug_assert_eq!(off, len);
    Ok(pairs)
}

impl Engine {
    /// Атомарный пакетный put: один коммит на весь буфер.
    /// Возвращает число записанных пар.
    pub fn put_batch(&mut self, data: &[u8]) -> Result<u32> {
        self.check_writable()?;
        let pairs = decode_batch(data)?;
        let count = pairs.len() as u32;
        if count == 0 {
            return Ok(0);
        }
        let ops = pairs
            .into_iter()
            .map(|(key, value)| WalOp::Put { key, value })
            .collect();
        self.commit_ops(ops, true)?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(pairs: &[(&[u8], &[u8])]) -> Vec<u8> {
        let mut out = Vec::new();
        let mut tmp = [0u8; 4];
        for (k, v) in pairs {
            LittleEndian::write_u32(&mut tmp, k.len() as u32);
            out.extend_from_slice(&tmp);
            out.extend_from_slice(k);
            LittleEndian::write_u32(&mut tmp, v.len() as u32);
            out.extend_from_slice(&tmp);
            out.extend_from_slice(v);
        }
        out
    }

    #[test]
    fn decode_wellformed() {
        let buf = frame(&[(b"a", b"1"), (b"bb", b"22")]);
        let pairs = decode_batch(&buf).unwrap();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[1], (b"bb".to_vec(), b"22".to_vec()));
    }

    #[test]
    fn decode_rejects_trailing_garbage() {
        let mut buf = frame(&[(b"a", b"1")]);
        buf.push(0xEE);
        assert!(decode_batch(&buf).is_err());
    }

    #[test]
    fn decode_rejects_truncation() {
        let buf = frame(&[(b"key", b"value")]);
        for cut in 1..buf.len() {
            assert!(decode_batch(&buf[..cut]).is_err(), "cut at {}", cut);
        }
    }

    #[test]
    fn decode_rejects_empty_key() {
        let buf = frame(&[(b"", b"v")]);
        assert!(decode_batch(&buf).is_err());
    }

    #[test]
    fn empty_buffer_is_empty_batch() {
        assert!(decode_batch(&[]).unwrap().is_empty());
    }
}
