//! wal/record - кодек записи WAL.
//!
//! Layout записи (LE):
//! [len u32]      - байты после поля len, включая crc
//! [lsn u64]
//! [tx_id u64]
//! [op_count u32]
//! [op]*          - [op_type u8][key_len u32][key][val_len u32|0xFFFFFFFF][val?]
//! [crc32c u32]   - по байтам между len и crc
//!
//! PutTTL несёт значение с 8-байтовым префиксом absolute expiry (ms).
//! decode_record возвращает Ok(None) на неполной/битой записи: реплей
//! трактует это как рваный хвост и останавливается.

use byteorder::{ByteOrder, LittleEndian};

use crate::consts::{
    EXPIRY_LEN, WAL_OP_DELETE, WAL_OP_PUT, WAL_OP_PUT_TTL, WAL_REC_FIXED, WAL_VAL_NONE,
};
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    PutTtl { key: Vec<u8>, expiry_ms: u64, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

impl WalOp {
    pub fn key(&self) -> &[u8] {
        match self {
            WalOp::Put { key, .. } | WalOp::PutTtl { key, .. } | WalOp::Delete { key } => key,
        }
    }

    fn encoded_len(&self) -> usize {
        let (klen, vlen) = match self {
            WalOp::Put { key, value } => (key.len(), value.len()),
            WalOp::PutTtl { key, value, .. } => (key.len(), EXPIRY_LEN + value.len()),
            WalOp::Delete { key } => (key.len(), 0),
        };
        1 + 4 + klen + 4 + vlen
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxRecord {
    pub lsn: u64,
    pub tx_id: u64,
    pub ops: Vec<WalOp>,
}

pub fn encode_record(rec: &TxRecord) -> Vec<u8> {
    let body_len: usize = rec.ops.iter().map(WalOp::encoded_len).sum();
    let total = WAL_REC_FIXED + body_len;
    let mut buf = Vec::with_capacity(total);

    let mut tmp4 = [0u8; 4];
    let mut tmp8 = [0u8; 8];
    LittleEndian::write_u32(&mut tmp4, (total - 4) as u32);
    buf.extend_from_slice(&tmp4); // len
    LittleEndian::write_u64(&mut tmp8, rec.lsn);
    buf.extend_from_slice(&tmp8);
    LittleEndian::write_u64(&mut tmp8, rec.tx_id);
    buf.extend_from_slice(&tmp8);
    LittleEndian::write_u32(&mut tmp4, rec.ops.len() as u32);
    buf.extend_from_slice(&tmp4);

    for op in &rec.ops {
        match op {
            WalOp::Put { key, value } => {
                buf.push(WAL_OP_PUT);
                LittleEndian::write_u32(&mut tmp4, key.len() as u32);
                buf.extend_from_slice(&tmp4);
                buf.extend_from_slice(key);
                LittleEndian::write_u32(&mut tmp4, value.len() as u32);
                buf.extend_from_slice(&tmp4);
                buf.extend_from_slice(value);
            }
            WalOp::PutTtl { key, expiry_ms, value } => {
                buf.push(WAL_OP_PUT_TTL);
                LittleEndian::write_u32(&mut tmp4, key.len() as u32);
                buf.extend_from_slice(&tmp4);
                buf.extend_from_slice(key);
                LittleEndian::write_u32(&mut tmp4, (EXPIRY_LEN + value.len()) as u32);
                buf.extend_from_slice(&tmp4);
                LittleEndian::write_u64(&mut tmp8, *expiry_ms);
                buf.extend_from_slice(&tmp8);
                buf.extend_from_slice(value);
            }
            WalOp::Delete { key } => {
                buf.push(WAL_OP_DELETE);
                LittleEndian::write_u32(&mut tmp4, key.len() as u32);
                buf.extend_from_slice(&tmp4);
                buf.extend_from_slice(key);
                LittleEndian::write_u32(&mut tmp4, WAL_VAL_NONE);
                buf.extend_from_slice(&tmp4);
            }
        }
    }

    // CRC по всему, что между len и crc.
    let crc = crc32c::crc32c(&buf[4..]);
    LittleEndian::write_u32(&mut tmp4, crc);
    buf.extend_from_slice(&tmp4);
    debug_assert_eq!(buf.len(), total);
    buf
}

/// Раскодировать одну запись с начала buf.
/// Ok(Some((record, consumed))) - запись валидна;
/// Ok(None) - неполный или битый хвост (реплей останавливается).
pub fn decode_record(buf: &[u8]) -> Result<Option<(TxRecord, usize)>> {
    if buf.len() < WAL_REC_FIXED {
        return Ok(None);
    }
    let len = LittleEndian::read_u32(&buf[0..4]) as usize;
    if len < WAL_REC_FIXED - 4 || buf.len() < 4 + len {
        return Ok(None);
    }
    let rec_bytes = &buf[4..4 + len];
    let crc_stored = LittleEndian::read_u32(&rec_bytes[len - 4..]);
    let crc_actual = crc32c::crc32c(&rec_bytes[..len - 4]);
    if crc_stored != crc_actual {
        return Ok(None);
    }

    let lsn = LittleEndian::read_u64(&rec_bytes[0..8]);
    let tx_id = LittleEndian::read_u64(&rec_bytes[8..16]);
    let op_count = LittleEndian::read_u32(&rec_bytes[16..20]) as usize;

    let mut ops = Vec::with_capacity(op_count);
    let body = &rec_bytes[20..len - 4];
    let mut off = 0usize;
    for _ in 0..op_count {
        if off + 5 > body.len() {
            return Ok(None);
        }
        let op_type = body[off];
        off += 1;
        let key_len = LittleEndian::read_u32(&body[off..off + 4]) as usize;
        off += 4;
        if off + key_len + 4 > body.len() {
            return Ok(None);
        }
        let key = body[off..off + key_len].to_vec();
        off += key_len;
        let val_len_raw = LittleEndian::read_u32(&body[off..off + 4]);
        off += 4;

        match op_type {
            WAL_OP_DELETE => {
                if val_len_raw != WAL_VAL_NONE {
                    return Ok(None);
                }
                ops.push(WalOp::Delete { key });
            }
            WAL_OP_PUT => {
                let vlen = val_len_raw as usize;
                if val_len_raw == WAL_VAL_NONE || off + vlen > body.len() {
                    return Ok(None);
                }
                let value = body[off..off + vlen].to_vec();
                off += vlen;
                ops.push(WalOp::Put { key, value });
            }
            WAL_OP_PUT_TTL => {
                let vlen = val_len_raw as usize;
                if val_len_raw == WAL_VAL_NONE || vlen < EXPIRY_LEN || off + vlen > body.len() {
                    return Ok(None);
                }
                let expiry_ms = LittleEndian::read_u64(&body[off..off + EXPIRY_LEN]);
                let value = body[off + EXPIRY_LEN..off + vlen].to_vec();
                off += vlen;
                ops.push(WalOp::PutTtl { key, expiry_ms, value });
            }
            _ => return Ok(None),
        }
    }
    if off != body.len() {
        return Ok(None);
    }
    Ok(Some((TxRecord { lsn, tx_id, ops }, 4 + len)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TxRecord {
        TxRecord {
            lsn: 42,
            tx_id: 7,
            ops: vec![
                WalOp::Put {
                    key: b"alpha".to_vec(),
                    value: b"1".to_vec(),
                },
                WalOp::PutTtl {
                    key: b"ttl".to_vec(),
                    expiry_ms: 1_700_000_000_000,
                    value: b"v".to_vec(),
                },
                WalOp::Delete { key: b"gone".to_vec() },
            ],
        }
    }

    #[test]
    fn record_roundtrip() {
        let rec = sample();
        let bytes = encode_record(&rec);
        let (back, consumed) = decode_record(&bytes).unwrap().expect("valid record");
        assert_eq!(consumed, bytes.len());
        assert_eq!(back, rec);
    }

    #[test]
    fn torn_tail_is_none() {
        let bytes = encode_record(&sample());
        for cut in [1usize, 5, 10, bytes.len() - 1] {
            assert!(decode_record(&bytes[..cut]).unwrap().is_none(), "cut {}", cut);
        }
    }

    #[test]
    fn crc_flip_is_none() {
        let mut bytes = encode_record(&sample());
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0x40;
        assert!(decode_record(&bytes).unwrap().is_none());
    }

    #[test]
    fn two_records_in_sequence() {
        let r1 = sample();
        let mut r2 = sample();
        r2.lsn = 43;
        let mut buf = encode_record(&r1);
        buf.extend_from_slice(&encode_record(&r2));

        let (a, n1) = decode_record(&buf).unwrap().unwrap();
        assert_eq!(a.lsn, 42);
        let (b, n2) = decode_record(&buf[n1..]).unwrap().unwrap();
        assert_eq!(b.lsn, 43);
        assert_eq!(n1 + n2, buf.len());
    }
}
