//! engine/commit - конвейер фиксации транзакции.
//!
//! Порядок шагов:
//! 1. Собрать WAL-запись (дедуплицированные операции), lsn = prev + 1.
//! 2. WAL append (+ flush для синхронного коммита) - точка долговечности.
//! 3. Применить операции к дереву copy-on-write.
//! 4. Записать грязные страницы (page_lsn = commit lsn) + fsync данных.
//! 5. Записать чередующуюся meta с новым корнем и last_lsn + fsync.
//! 6. Переложить освобождённые транзакцией страницы во free-лист.
//!
//! Отказ до (2) - чистый abort без следов. Отказ после (2) до (5) -
//! движок уходит в read-only degraded; при переоткрытии состояние
//! доигрывается реплеем WAL.

use std::collections::HashSet;

use log::warn;

use crate::codec::{is_live, ValueCodec};
use crate::error::Result;
use crate::page::node::Descriptor;
use crate::pager::Pager;
use crate::tree::{tree_insert, tree_remove, TreeTxn};
use crate::txn::dedup_ops;
use crate::util::now_ms;
use crate::wal::{TxRecord, WalOp};

use super::core::Engine;

#[derive(Debug, Default)]
pub(crate) struct CommitInfo {
    /// Хотя бы одна Delete-операция сняла живую (не истёкшую) запись.
    pub removed_live: bool,
}

/// Применить операции записи к дереву. Возвращает (freed, removed_live);
/// pager.meta.root / last_lsn обновлены в памяти.
pub(crate) fn apply_ops(
    pager: &mut Pager,
    codec: &ValueCodec,
    ops: &[WalOp],
    lsn: u64,
) -> Result<(Vec<u32>, bool)> {
    let now = now_ms();
    let mut removed_live = false;

    let mut txn = TreeTxn::begin(pager, lsn);
    for op in ops {
        match op {
            WalOp::Put { key, value } => {
                let stored = codec.encode(value, None)?;
                let desc = txn.write_value(&stored)?;
                tree_insert(&mut txn, key, desc)?;
            }
            WalOp::PutTtl {
                key,
                expiry_ms,
                value,
            } => {
                let stored = codec.encode(value, Some(*expiry_ms))?;
                let desc = txn.write_value(&stored)?;
                tree_insert(&mut txn, key, desc)?;
            }
            WalOp::Delete { key } => {
                if let Some(old) = tree_remove(&mut txn, key)? {
                    // Liveness по префиксу stored value: цепочки ещё целы,
                    // физическое освобождение происходит после durable meta.
                    let prefix = match &old {
                        Descriptor::Inline(b) => b[..b.len().min(9)].to_vec(),
                        Descriptor::Overflow { head, total_len } => {
                            txn.read_chain(*head, (*total_len as usize).min(9))?
                        }
                    };
                    if is_live(&prefix, now)? {
                        removed_live = true;
                    }
                }
            }
        }
    }
    txn.flush()?;

    let freed = std::mem::take(&mut txn.freed);
    let new_root = txn.root;
    drop(txn);
    pager.meta.root = new_root;
    pager.meta.last_lsn = lsn;
    Ok((freed, removed_live))
}

impl Engine {
    /// Зафиксировать набор операций одной WAL-записью.
    /// sync=false - ослабленный контракт put_no_sync: долговечность
    /// наступит на ближайшем flush()/синхронном коммите/close.
    pub(crate) fn commit_ops(&mut self, ops: Vec<WalOp>, sync: bool) -> Result<CommitInfo> {
        self.check_writable()?;

        let ops = self.with_lazy_expirations(ops);
        if ops.is_empty() {
            return Ok(CommitInfo::default());
        }
        let ops = dedup_ops(ops);

        let commit_lsn = self.pager.meta.last_lsn + 1;
        self.next_tx_id += 1;
        let rec = TxRecord {
            lsn: commit_lsn,
            tx_id: self.next_tx_id,
            ops,
        };

        // (1)-(2): журнал. Частично записанная запись - рваный хвост;
        // дальнейшие append уехали бы за мусор, поэтому деградируем.
        if let Err(e) = self.wal.append(&rec) {
            self.degraded = true;
            return Err(e);
        }
        if sync {
            if let Err(e) = self.wal.flush() {
                self.degraded = true;
                return Err(e);
            }
        } else {
            self.pending_flush = true;
        }

        // (3)-(4): применение и страницы.
        let (freed, removed_live) =
            match apply_ops(&mut self.pager, &self.codec, &rec.ops, commit_lsn) {
                Ok(x) => x,
                Err(e) => {
                    self.degraded = true;
                    return Err(e);
                }
            };
        if sync {
            if let Err(e) = self.pager.sync() {
                self.degraded = true;
                return Err(e.into());
            }
            // (5): checkpoint.
            if let Err(e) = self.pager.write_meta() {
                self.degraded = true;
                return Err(e);
            }
            self.durable_lsn = commit_lsn;
            self.pending_flush = false;
        }

        // (6): освобождённые страницы уходят во free-лист только после
        // того, как WAL-запись транзакции durable. Для no-sync коммита это
        // ещё не так: его freed-набор откладывается до ближайшего барьера.
        // Ошибка здесь не откатывает коммит: страница в худшем случае
        // остаётся осиротевшей до doctor.
        if sync {
            for pid in self.deferred_free.drain(..).chain(freed) {
                if let Err(e) = self.pager.free(pid) {
                    warn!("free of page {} after commit failed: {}", pid, e);
                }
            }
            if let Err(e) = self.wal.discard_covered(self.durable_lsn) {
                warn!("wal segment discard failed: {}", e);
            }
        } else {
            self.deferred_free.extend(freed);
        }
        Ok(CommitInfo { removed_live })
    }

    /// Начать транзакцию записи.
    pub fn begin_write(&self) -> crate::txn::WriteTxn {
        crate::txn::WriteTxn::new()
    }

    /// Зафиксировать транзакцию одним атомарным коммитом.
    pub fn commit_transaction(&mut self, txn: &mut crate::txn::WriteTxn) -> Result<()> {
        if !txn.is_active() {
            return Err(crate::error::bad_input("transaction is not active"));
        }
        let ops = txn.take_deduped_ops();
        self.commit_ops(ops, true)?;
        Ok(())
    }

    /// Чтение с учётом незакоммиченного write set транзакции.
    pub fn get_in_txn(
        &mut self,
        txn: &crate::txn::WriteTxn,
        key: &[u8],
    ) -> Result<Option<Vec<u8>>> {
        match txn.staged_get(key, now_ms()) {
            crate::txn::StagedRead::Value(v) => Ok(Some(v)),
            crate::txn::StagedRead::Deleted => Ok(None),
            crate::txn::StagedRead::Unstaged => self.get(key),
        }
    }

    /// Вплести ленивые удаления истёкших ключей, замеченных чтениями.
    fn with_lazy_expirations(&mut self, ops: Vec<WalOp>) -> Vec<WalOp> {
        if self.expired_queue.is_empty() {
            return ops;
        }
        let addressed: HashSet<&[u8]> = ops.iter().map(|op| op.key()).collect();
        let mut out: Vec<WalOp> = Vec::with_capacity(ops.len() + self.expired_queue.len());
        let mut seen: HashSet<Vec<u8>> = HashSet::new();
        for key in self.expired_queue.drain(..) {
            if !addressed.contains(key.as_slice()) && seen.insert(key.clone()) {
                out.push(WalOp::Delete { key });
            }
        }
        out.extend(ops);
        out
    }
}
