//! txn - буфер записи (write set) одной транзакции.
//!
//! Состояния: Open -> Staged -> Committed | Aborted. Операции копятся в
//! порядке добавления; поздние операции по тому же ключу затеняют ранние.
//! Чтения внутри транзакции обязаны видеть её незакоммиченные операции
//! (read-your-writes) - см. staged_get.

use std::collections::HashSet;

use crate::consts::{MAX_KEY_LEN, MAX_VALUE_LEN};
use crate::error::{bad_input, Result, SilkError};
use crate::util::now_ms;
use crate::wal::WalOp;

/// Проверка ограничений на ключ/значение.
pub fn validate_key_value(key: &[u8], value: Option<&[u8]>) -> Result<()> {
    if key.is_empty() {
        return Err(bad_input("empty key"));
    }
    if key.len() > MAX_KEY_LEN {
        return Err(bad_input(format!(
            "key too large: {} bytes (max {})",
            key.len(),
            MAX_KEY_LEN
        )));
    }
    if let Some(v) = value {
        if v.len() > MAX_VALUE_LEN {
            return Err(bad_input(format!(
                "value too large: {} bytes (max {})",
                v.len(),
                MAX_VALUE_LEN
            )));
        }
    }
    Ok(())
}

/// Результат чтения сквозь незакоммиченный write set.
pub enum StagedRead {
    /// Ключ не тронут транзакцией - читать родительский движок.
    Unstaged,
    /// Транзакция удалила ключ.
    Deleted,
    /// Транзакция записала значение (уже с учётом TTL на момент чтения).
    Value(Vec<u8>),
}

pub struct WriteTxn {
    ops: Vec<WalOp>,
    committed: bool,
    aborted: bool,
}

impl WriteTxn {
    pub fn new() -> Self {
        Self {
            ops: Vec::new(),
            committed: false,
            aborted: false,
        }
    }

    pub fn is_active(&self) -> bool {
        !self.committed && !self.aborted
    }

    pub fn ops_count(&self) -> usize {
        self.ops.len()
    }

    fn ensure_active(&self) -> Result<()> {
        if !self.is_active() {
            return Err(SilkError::Closed);
        }
        Ok(())
    }

    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.ensure_active()?;
        validate_key_value(key, Some(value))?;
        self.ops.push(WalOp::Put {
            key: key.to_vec(),
            value: value.to_vec(),
        });
        Ok(())
    }

    /// Absolute expiry вычисляется при добавлении операции, чтобы реплей
    /// WAL дал тот же момент истечения.
    pub fn put_with_ttl(&mut self, key: &[u8], value: &[u8], ttl_ms: u64) -> Result<()> {
        self.put_with_expiry(key, value, now_ms().saturating_add(ttl_ms))
    }

    /// Вариант с готовым absolute expiry (прокси координатора).
    pub fn put_with_expiry(&mut self, key: &[u8], value: &[u8], expiry_ms: u64) -> Result<()> {
        self.ensure_active()?;
        validate_key_value(key, Some(value))?;
        self.ops.push(WalOp::PutTtl {
            key: key.to_vec(),
            expiry_ms,
            value: value.to_vec(),
        });
        Ok(())
    }

    pub fn delete(&mut self, key: &[u8]) -> Result<()> {
        self.ensure_active()?;
        validate_key_value(key, None)?;
        self.ops.push(WalOp::Delete { key: key.to_vec() });
        Ok(())
    }

    pub fn abort(&mut self) {
        self.ops.clear();
        self.aborted = true;
    }

    /// Чтение сквозь write set: последняя операция по ключу побеждает.
    pub fn staged_get(&self, key: &[u8], now_ms: u64) -> StagedRead {
        for op in self.ops.iter().rev() {
            match op {
                WalOp::Put { key: k, value } if k.as_slice() == key => {
                    return StagedRead::Value(value.clone());
                }
                WalOp::PutTtl {
                    key: k,
                    expiry_ms,
                    value,
                } if k.as_slice() == key => {
                    return if now_ms > *expiry_ms {
                        StagedRead::Deleted
                    } else {
                        StagedRead::Value(value.clone())
                    };
                }
                WalOp::Delete { key: k } if k.as_slice() == key => {
                    return StagedRead::Deleted;
                }
                _ => {}
            }
        }
        StagedRead::Unstaged
    }

    /// Упорядоченный дедуплицированный список операций для WAL-записи:
    /// для каждого ключа остаётся только последняя операция, на позиции
    /// её последнего вхождения.
    pub(crate) fn take_deduped_ops(&mut self) -> Vec<WalOp> {
        self.committed = true;
        let ops = std::mem::take(&mut self.ops);
        dedup_ops(ops)
    }
}

impl Default for WriteTxn {
    fn default() -> Self {
        Self::new()
    }
}

/// Последняя операция по каждому ключу, в порядке последних вхождений.
pub(crate) fn dedup_ops(ops: Vec<WalOp>) -> Vec<WalOp> {
    let mut seen: HashSet<Vec<u8>> = HashSet::new();
    let mut kept: Vec<WalOp> = Vec::with_capacity(ops.len());
    for op in ops.into_iter().rev() {
        if seen.insert(op.key().to_vec()) {
            kept.push(op);
        }
    }
    kept.reverse();
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shadowing_and_dedup() {
        let mut tx = WriteTxn::new();
        tx.put(b"a", b"1").unwrap();
        tx.put(b"b", b"2").unwrap();
        tx.put(b"a", b"3").unwrap();
        tx.delete(b"b").unwrap();

        match tx.staged_get(b"a", 0) {
            StagedRead::Value(v) => assert_eq!(v, b"3"),
            _ => panic!("expected value for a"),
        }
        assert!(matches!(tx.staged_get(b"b", 0), StagedRead::Deleted));
        assert!(matches!(tx.staged_get(b"c", 0), StagedRead::Unstaged));

        let ops = tx.take_deduped_ops();
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].key(), b"a");
        assert!(matches!(ops[0], WalOp::Put { .. }));
        assert_eq!(ops[1].key(), b"b");
        assert!(matches!(ops[1], WalOp::Delete { .. }));
    }

    #[test]
    fn staged_ttl_respects_expiry() {
        let mut tx = WriteTxn::new();
        tx.put_with_ttl(b"k", b"v", 10_000).unwrap();
        match tx.staged_get(b"k", now_ms()) {
            StagedRead::Value(v) => assert_eq!(v, b"v"),
            _ => panic!("ttl value must be visible before expiry"),
        }
        assert!(matches!(tx.staged_get(b"k", u64::MAX), StagedRead::Deleted));
    }

    #[test]
    fn inactive_txn_rejects_ops() {
        let mut tx = WriteTxn::new();
        tx.abort();
        assert!(tx.put(b"a", b"1").is_err());
    }

    #[test]
    fn input_limits() {
        let mut tx = WriteTxn::new();
        assert!(tx.put(b"", b"v").is_err());
        assert!(tx.put(&vec![0u8; MAX_KEY_LEN + 1], b"v").is_err());
        assert!(tx.put(&vec![0u8; MAX_KEY_LEN], b"v").is_ok());
    }
}
