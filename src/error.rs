//! Типизированные ошибки движка.
//!
//! Фасад возвращает ошибки с фиксированным набором kind'ов; kind сериализуется
//! в envelope координатора как строка (см. coord::proto).

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SilkError>;

#[derive(Debug, Error)]
pub enum SilkError {
    /// Аргумент нарушает документированное ограничение. Состояние не меняется.
    #[error("bad input: {0}")]
    BadInput(String),

    /// Ключ отсутствует или истёк. На уровне Rust API обычно Option/bool;
    /// kind используется протоколом координатора.
    #[error("not found")]
    NotFound,

    /// CRC mismatch, рваный хвост за пределами головы WAL, нарушение
    /// структурного инварианта при открытии.
    #[error("corrupt: {0}")]
    Corrupt(String),

    /// Ошибка файловой операции. После WAL flush, но до meta sync переводит
    /// движок в read-only degraded.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Формат на диске новее поддерживаемого.
    #[error("version mismatch: on-disk format {found}, supported {supported}")]
    VersionMismatch { found: u16, supported: u16 },

    /// Прокси координатора не дождался ответа.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Операция на follower-фасаде без маршрута к лидеру.
    #[error("not leader")]
    NotLeader,

    /// Движок закрыт.
    #[error("engine is closed")]
    Closed,
}

/// Kind для envelope-ответов; стабильные строковые имена.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    BadInput,
    NotFound,
    Corrupt,
    Io,
    VersionMismatch,
    Timeout,
    NotLeader,
    Closed,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::BadInput => "BadInput",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::Corrupt => "Corrupt",
            ErrorKind::Io => "IoError",
            ErrorKind::VersionMismatch => "VersionMismatch",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::NotLeader => "NotLeader",
            ErrorKind::Closed => "Closed",
        }
    }
}

impl SilkError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SilkError::BadInput(_) => ErrorKind::BadInput,
            SilkError::NotFound => ErrorKind::NotFound,
            SilkError::Corrupt(_) => ErrorKind::Corrupt,
            SilkError::Io(_) => ErrorKind::Io,
            SilkError::VersionMismatch { .. } => ErrorKind::VersionMismatch,
            SilkError::Timeout(_) => ErrorKind::Timeout,
            SilkError::NotLeader => ErrorKind::NotLeader,
            SilkError::Closed => ErrorKind::Closed,
        }
    }
}

/// Короткие конструкторы для горячих путей.
pub fn bad_input<S: Into<String>>(msg: S) -> SilkError {
    SilkError::BadInput(msg.into())
}

pub fn corrupt<S: Into<String>>(msg: S) -> SilkError {
    SilkError::Corrupt(msg.into())
}

pub fn io_msg<S: Into<String>>(msg: S) -> SilkError {
    SilkError::Io(std::io::Error::new(std::io::ErrorKind::Other, msg.into()))
}
