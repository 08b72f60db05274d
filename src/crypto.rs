//! crypto - AEAD-обёртка для payload значений.
//!
//! AES-GCM, длина ключа выбирает шифр: 16 -> AES-128, 24 -> AES-192,
//! 32 -> AES-256. Nonce 12 байт, случайный на каждую запись, хранится
//! префиксом перед шифртекстом. Ключевой материал зануляется (zeroize)
//! после инициализации шифра.

use aes_gcm::aead::consts::U12;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::aes::{Aes128, Aes192, Aes256};
use aes_gcm::{AesGcm, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroizing;

use crate::consts::NONCE_LEN;
use crate::error::{bad_input, corrupt, Result};

type Aes128Gcm = AesGcm<Aes128, U12>;
type Aes192Gcm = AesGcm<Aes192, U12>;
type Aes256Gcm = AesGcm<Aes256, U12>;

pub struct Cipher {
    inner: CipherKind,
}

enum CipherKind {
    Aes128(Box<Aes128Gcm>),
    Aes192(Box<Aes192Gcm>),
    Aes256(Box<Aes256Gcm>),
}

impl Cipher {
    /// Построить шифр из ключа 16/24/32 байта.
    pub fn new(key: &[u8]) -> Result<Self> {
        let key = Zeroizing::new(key.to_vec());
        let inner = match key.len() {
            16 => CipherKind::Aes128(Box::new(
                Aes128Gcm::new_from_slice(&key).expect("key length checked"),
            )),
            24 => CipherKind::Aes192(Box::new(
                Aes192Gcm::new_from_slice(&key).expect("key length checked"),
            )),
            32 => CipherKind::Aes256(Box::new(
                Aes256Gcm::new_from_slice(&key).expect("key length checked"),
            )),
            n => {
                return Err(bad_input(format!(
                    "encryption key must be 16, 24 or 32 bytes, got {}",
                    n
                )))
            }
        };
        Ok(Self { inner })
    }

    /// Зашифровать: возвращает nonce || ciphertext(+tag).
    pub fn seal(&self, plain: &[u8]) -> Result<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ct = match &self.inner {
            CipherKind::Aes128(c) => c.encrypt(nonce, plain),
            CipherKind::Aes192(c) => c.encrypt(nonce, plain),
            CipherKind::Aes256(c) => c.encrypt(nonce, plain),
        }
        .map_err(|_| corrupt("aead seal failed"))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ct.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ct);
        Ok(out)
    }

    /// Расшифровать nonce-префиксованный буфер. Несовпадение тега - Corrupt.
    pub fn open(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.len() < NONCE_LEN {
            return Err(corrupt("ciphertext shorter than nonce"));
        }
        let (nonce_bytes, ct) = data.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        match &self.inner {
            CipherKind::Aes128(c) => c.decrypt(nonce, ct),
            CipherKind::Aes192(c) => c.decrypt(nonce, ct),
            CipherKind::Aes256(c) => c.decrypt(nonce, ct),
        }
        .map_err(|_| corrupt("aead tag verification failed"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_open_all_key_sizes() {
        for n in [16usize, 24, 32] {
            let key = vec![0x42u8; n];
            let c = Cipher::new(&key).unwrap();
            let sealed = c.seal(b"payload").unwrap();
            assert_ne!(&sealed[NONCE_LEN..], b"payload".as_slice());
            assert_eq!(c.open(&sealed).unwrap(), b"payload");
        }
    }

    #[test]
    fn distinct_nonces_per_write() {
        let c = Cipher::new(&[7u8; 32]).unwrap();
        let a = c.seal(b"x").unwrap();
        let b = c.seal(b"x").unwrap();
        assert_ne!(a[..NONCE_LEN], b[..NONCE_LEN]);
    }

    #[test]
    fn tamper_detected() {
        let c = Cipher::new(&[7u8; 16]).unwrap();
        let mut sealed = c.seal(b"secret").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 1;
        assert!(c.open(&sealed).is_err());
    }

    #[test]
    fn bad_key_length() {
        assert!(Cipher::new(&[0u8; 20]).is_err());
    }
}
