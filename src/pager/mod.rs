//! pager - низкоуровневый page store над одним файлом `db.pages`.
//!
//! Разделение:
//! - core.rs  - структура Pager, create()/open(), запись meta.
//! - io.rs    - чтение/запись страниц, sync.
//! - alloc.rs - аллокация из free-листа и освобождение страниц.

pub mod alloc;
pub mod core;
pub mod io;

pub use self::core::Pager;
