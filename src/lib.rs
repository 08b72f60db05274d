#![allow(non_snake_case)]

// Базовые модули
pub mod config;
pub mod consts;
pub mod error;
pub mod util;

// Форматы и хранение
pub mod meta;
pub mod page; // src/page/{mod,checksum,node,ovf}.rs
pub mod pager; // src/pager/{mod,core,io,alloc}.rs
pub mod wal; // src/wal/{mod,record,writer,replay}.rs

// Кодек значений и криптография
pub mod codec;
pub mod crypto;

// Индекс и транзакции
pub mod tree; // src/tree/{mod,txn,cursor}.rs
pub mod txn;

// Движок и фасад
pub mod engine; // src/engine/{mod,core,open,commit,kv,batch,scan,doctor}.rs
pub mod facade;

// Запасной бэкенд
pub mod alt;

// Координатор единственного писателя
pub mod coord; // src/coord/{mod,proto,server,client}.rs

// Локи
pub mod lock;

// Удобные реэкспорты
pub use config::SilkConfig;
pub use coord::{Client, Coordinator};
pub use engine::{Engine, Stats};
pub use error::{ErrorKind, Result, SilkError};
pub use facade::Db;
pub use txn::WriteTxn;
