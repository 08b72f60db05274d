//! engine - однопоточное ядро движка поверх page store + WAL + дерева.
//!
//! Разбиение по файлам (операции - impl-блоки на Engine):
//! - core.rs   - структура Engine, проверки состояния, stats.
//! - open.rs   - create/open, восстановление по WAL, flush/close, Drop.
//! - commit.rs - конвейер коммита (WAL -> COW-применение -> meta -> free).
//! - kv.rs     - put/put_no_sync/put_with_ttl/get/delete.
//! - batch.rs  - put_batch (length-prefixed фрейминг).
//! - scan.rs   - scan_range/scan_prefix.
//! - doctor.rs - verify_integrity.

pub mod batch;
pub mod commit;
pub mod core;
pub mod doctor;
pub mod kv;
pub mod open;
pub mod scan;

pub use self::core::{Engine, Stats};
