//! coord/proto - конверты запросов и ответов движка.
//!
//! Запрос: { req_id, client_id, method, args } + канал ответа.
//! Ответ:  { req_id, client_id, ok | err }, где err несёт (kind, message).

use std::sync::mpsc::Sender;

use crate::error::{corrupt, io_msg, ErrorKind, Result, SilkError};
use crate::wal::WalOp;

#[derive(Debug, Clone)]
pub enum Command {
    Put { key: Vec<u8>, value: Vec<u8> },
    PutNoSync { key: Vec<u8>, value: Vec<u8> },
    PutWithTtl { key: Vec<u8>, value: Vec<u8>, ttl_ms: u64 },
    Get { key: Vec<u8> },
    Delete { key: Vec<u8> },
    PutBatch { data: Vec<u8> },
    ScanRange { lo: Vec<u8>, hi: Option<Vec<u8>>, limit: usize },
    CommitTransaction { ops: Vec<WalOp> },
    Flush,
    VerifyIntegrity,
    Close,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Unit,
    Value(Option<Vec<u8>>),
    Existed(bool),
    Count(u32),
    Entries(Vec<(Vec<u8>, Vec<u8>)>),
    BadPages(Vec<u32>),
}

/// Ошибка в конверте: kind из фиксированного набора + сообщение.
#[derive(Debug, Clone)]
pub struct WireError {
    pub kind: String,
    pub message: String,
}

impl From<&SilkError> for WireError {
    fn from(e: &SilkError) -> Self {
        WireError {
            kind: e.kind().as_str().to_string(),
            message: e.to_string(),
        }
    }
}

impl WireError {
    /// Восстановить типизированную ошибку на стороне клиента.
    pub fn into_error(self) -> SilkError {
        match self.kind.as_str() {
            k if k == ErrorKind::BadInput.as_str() => SilkError::BadInput(self.message),
            k if k == ErrorKind::NotFound.as_str() => SilkError::NotFound,
            k if k == ErrorKind::Corrupt.as_str() => corrupt(self.message),
            k if k == ErrorKind::VersionMismatch.as_str() => SilkError::VersionMismatch {
                found: 0,
                supported: crate::consts::FORMAT_VERSION,
            },
            k if k == ErrorKind::Timeout.as_str() => SilkError::Timeout(self.message),
            k if k == ErrorKind::NotLeader.as_str() => SilkError::NotLeader,
            k if k == ErrorKind::Closed.as_str() => SilkError::Closed,
            _ => io_msg(self.message),
        }
    }
}

pub struct Request {
    pub req_id: u64,
    pub client_id: u64,
    pub cmd: Command,
    pub resp: Sender<Response>,
}

pub struct Response {
    pub req_id: u64,
    pub client_id: u64,
    pub result: std::result::Result<Reply, WireError>,
}

/// Достать конкретный вариант ответа (защита от рассинхрона протокола).
pub fn expect_unit(r: Reply) -> Result<()> {
    match r {
        Reply::Unit => Ok(()),
        other => Err(corrupt(format!("unexpected reply {:?}", other))),
    }
}

pub fn expect_value(r: Reply) -> Result<Option<Vec<u8>>> {
    match r {
        Reply::Value(v) => Ok(v),
        other => Err(corrupt(format!("unexpected reply {:?}", other))),
    }
}

pub fn expect_existed(r: Reply) -> Result<bool> {
    match r {
        Reply::Existed(b) => Ok(b),
        other => Err(corrupt(format!("unexpected reply {:?}", other))),
    }
}

pub fn expect_count(r: Reply) -> Result<u32> {
    match r {
        Reply::Count(n) => Ok(n),
        other => Err(corrupt(format!("unexpected reply {:?}", other))),
    }
}

pub fn expect_entries(r: Reply) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
    match r {
        Reply::Entries(e) => Ok(e),
        other => Err(corrupt(format!("unexpected reply {:?}", other))),
    }
}

pub fn expect_bad_pages(r: Reply) -> Result<Vec<u32>> {
    match r {
        Reply::BadPages(p) => Ok(p),
        other => Err(corrupt(format!("unexpected reply {:?}", other))),
    }
}
