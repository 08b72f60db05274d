//! engine/kv - одиночные операции put/get/del.

use crate::codec::Decoded;
use crate::error::Result;
use crate::tree::TreeReader;
use crate::txn::validate_key_value;
use crate::util::now_ms;
use crate::wal::WalOp;

use super::core::Engine;

impl Engine {
    /// Синхронный одиночный put.
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        validate_key_value(key, Some(value))?;
        self.commit_ops(
            vec![WalOp::Put {
                key: key.to_vec(),
                value: value.to_vec(),
            }],
            true,
        )?;
        Ok(())
    }

    /// Ослабленный put: WAL append без flush; долговечность - на
    /// ближайшем flush()/синхронном коммите/close.
    pub fn put_no_sync(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        validate_key_value(key, Some(value))?;
        self.commit_ops(
            vec![WalOp::Put {
                key: key.to_vec(),
                value: value.to_vec(),
            }],
            false,
        )?;
        Ok(())
    }

    /// put c TTL: absolute expiry = now + ttl_ms.
    pub fn put_with_ttl(&mut self, key: &[u8], value: &[u8], ttl_ms: u64) -> Result<()> {
        validate_key_value(key, Some(value))?;
        self.commit_ops(
            vec![WalOp::PutTtl {
                key: key.to_vec(),
                expiry_ms: now_ms().saturating_add(ttl_ms),
                value: value.to_vec(),
            }],
            true,
        )?;
        Ok(())
    }

    /// Получить значение; истёкший TTL неотличим от отсутствия ключа.
    /// Замеченная истёкшая запись ставится в очередь ленивого удаления.
    pub fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.check_open()?;
        validate_key_value(key, None)?;

        let reader = TreeReader::new(&self.pager);
        let desc = match reader.lookup(self.pager.meta.root, key)? {
            Some(d) => d,
            None => return Ok(None),
        };
        let stored = reader.read_stored(&desc)?;
        match self.codec.decode(&stored, now_ms())? {
            Decoded::Live(v) => Ok(Some(v)),
            Decoded::Expired => {
                self.expired_queue.push(key.to_vec());
                Ok(None)
            }
        }
    }

    /// Удалить ключ. true, только если снята живая (не истёкшая) запись.
    pub fn delete(&mut self, key: &[u8]) -> Result<bool> {
        validate_key_value(key, None)?;
        let info = self.commit_ops(vec![WalOp::Delete { key: key.to_vec() }], true)?;
        Ok(info.removed_live)
    }
}
