//! coord/server - поток-владелец движка.
//!
//! Ядро движка однопоточное: Db живёт в одном потоке и разбирает inbox
//! конвертов; каждый запрос - одно сообщение внутрь, одно наружу.
//! Блокироваться могут только файловые операции внутри Db.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use log::debug;

use crate::error::Result;
use crate::facade::Db;
use crate::txn::WriteTxn;

use super::proto::{Command, Reply, Request, Response, WireError};

pub struct EngineHandle {
    tx: Sender<Request>,
    kill: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl EngineHandle {
    /// Запустить поток-владелец движка с пустым inbox'ом.
    pub fn spawn(db: Db) -> EngineHandle {
        let (tx, rx) = mpsc::channel::<Request>();
        let kill = Arc::new(AtomicBool::new(false));
        let kill_flag = kill.clone();
        let join = std::thread::Builder::new()
            .name("silkdb-engine".into())
            .spawn(move || serve(db, rx, kill_flag))
            .expect("spawn engine thread");
        EngineHandle {
            tx,
            kill,
            join: Some(join),
        }
    }

    pub fn sender(&self) -> Sender<Request> {
        self.tx.clone()
    }

    /// Аварийная остановка: движок бросается без flush (лок отпускается).
    pub fn kill(mut self) {
        self.kill.store(true, Ordering::SeqCst);
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }

    /// Штатная остановка: Close проходит через inbox (flush + close).
    pub fn shutdown(mut self) {
        let (rtx, rrx) = mpsc::channel();
        let _ = self.tx.send(Request {
            req_id: 0,
            client_id: 0,
            cmd: Command::Close,
            resp: rtx,
        });
        let _ = rrx.recv_timeout(Duration::from_secs(30));
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        // Оставшийся поток завершится сам, когда пропадут отправители.
        self.kill.store(true, Ordering::SeqCst);
    }
}

fn serve(mut db: Db, rx: Receiver<Request>, kill: Arc<AtomicBool>) {
    loop {
        let req = match rx.recv_timeout(Duration::from_millis(100)) {
            Ok(r) => r,
            Err(RecvTimeoutError::Timeout) => {
                if kill.load(Ordering::SeqCst) {
                    debug!("engine thread: killed, abandoning db without flush");
                    db.abandon();
                    return;
                }
                continue;
            }
            Err(RecvTimeoutError::Disconnected) => {
                // Все клиенты ушли: штатное закрытие.
                let _ = db.close();
                return;
            }
        };
        if kill.load(Ordering::SeqCst) {
            db.abandon();
            return;
        }

        let is_close = matches!(req.cmd, Command::Close);
        let result = execute(&mut db, req.cmd).map_err(|e| WireError::from(&e));
        let _ = req.resp.send(Response {
            req_id: req.req_id,
            client_id: req.client_id,
            result,
        });
        if is_close {
            let _ = db.close();
            return;
        }
    }
}

fn execute(db: &mut Db, cmd: Command) -> Result<Reply> {
    match cmd {
        Command::Put { key, value } => {
            db.put(&key, &value)?;
            Ok(Reply::Unit)
        }
        Command::PutNoSync { key, value } => {
            db.put_no_sync(&key, &value)?;
            Ok(Reply::Unit)
        }
        Command::PutWithTtl { key, value, ttl_ms } => {
            db.put_with_ttl(&key, &value, ttl_ms)?;
            Ok(Reply::Unit)
        }
        Command::Get { key } => Ok(Reply::Value(db.get(&key)?)),
        Command::Delete { key } => Ok(Reply::Existed(db.delete(&key)?)),
        Command::PutBatch { data } => Ok(Reply::Count(db.put_batch(&data)?)),
        Command::ScanRange { lo, hi, limit } => {
            Ok(Reply::Entries(db.scan_range(&lo, hi.as_deref(), limit)?))
        }
        Command::CommitTransaction { ops } => {
            let mut txn = WriteTxn::new();
            for op in ops {
                match op {
                    crate::wal::WalOp::Put { key, value } => txn.put(&key, &value)?,
                    crate::wal::WalOp::PutTtl {
                        key,
                        expiry_ms,
                        value,
                    } => {
                        // Absolute expiry уже вычислен на стороне клиента.
                        txn.put_with_expiry(&key, &value, expiry_ms)?
                    }
                    crate::wal::WalOp::Delete { key } => txn.delete(&key)?,
                }
            }
            db.commit_transaction(&mut txn)?;
            Ok(Reply::Unit)
        }
        Command::Flush => {
            db.flush()?;
            Ok(Reply::Unit)
        }
        Command::VerifyIntegrity => Ok(Reply::BadPages(db.verify_integrity()?)),
        Command::Close => {
            db.flush()?;
            Ok(Reply::Unit)
        }
    }
}
