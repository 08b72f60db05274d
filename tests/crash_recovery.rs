use anyhow::Result;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use SilkDB::wal::{TxRecord, Wal, WalOp};
use SilkDB::{Db, SilkConfig};

// Синхронный коммит durable сразу: бросаем хэндл без close/flush
// (аварийное завершение), переоткрываем и видим все коммиты.
#[test]
fn synced_commits_survive_crash() -> Result<()> {
    let base = unique_base("crash-sync");
    {
        let mut db = Db::open(&base, "t1", SilkConfig::default())?;
        db.put(b"a", b"1")?;
        db.put(b"b", b"2")?;
        db.abandon(); // без flush и без clean close
    }
    {
        let mut db = Db::open(&base, "t1", SilkConfig::default())?;
        assert_eq!(db.get(b"a")?.as_deref(), Some(b"1".as_slice()));
        assert_eq!(db.get(b"b")?.as_deref(), Some(b"2".as_slice()));
        assert!(db.verify_integrity()?.is_empty());
        db.close()?;
    }
    Ok(())
}

// Моделирование сбоя "после WAL flush, до meta sync": durable запись в
// журнале есть, meta её не покрывает. Переоткрытие доигрывает её.
#[test]
fn wal_record_beyond_meta_is_replayed() -> Result<()> {
    let base = unique_base("crash-replay");
    let dir = base.join("t1");
    let durable = {
        let mut db = Db::open(&base, "t1", SilkConfig::default())?;
        db.put(b"committed", b"1")?;
        let s = db.stats()?.unwrap();
        db.close()?;
        s.durable_lsn
    };

    // Запись, которую "успел" записать упавший процесс.
    {
        let mut wal = Wal::open(&dir, 4 * 1024 * 1024)?;
        wal.append(&TxRecord {
            lsn: durable + 1,
            tx_id: 99,
            ops: vec![
                WalOp::Put {
                    key: b"x".to_vec(),
                    value: b"1".to_vec(),
                },
                WalOp::Put {
                    key: b"y".to_vec(),
                    value: b"2".to_vec(),
                },
                WalOp::Delete {
                    key: b"committed".to_vec(),
                },
            ],
        })?;
        wal.flush()?;
    }

    {
        let mut db = Db::open(&base, "t1", SilkConfig::default())?;
        assert_eq!(db.get(b"x")?.as_deref(), Some(b"1".as_slice()));
        assert_eq!(db.get(b"y")?.as_deref(), Some(b"2".as_slice()));
        assert_eq!(db.get(b"committed")?, None, "replayed delete applies");
        assert!(db.verify_integrity()?.is_empty());
        let s = db.stats()?.unwrap();
        assert!(s.durable_lsn >= durable + 1, "recovery checkpoints replayed state");
        db.close()?;
    }
    Ok(())
}

// Рваный хвост: запись обрезана посередине. Реплей останавливается на
// последней валидной, хвост физически усечён, повторное открытие чисто.
#[test]
fn torn_tail_is_ignored_and_truncated() -> Result<()> {
    let base = unique_base("crash-torn");
    let dir = base.join("t1");
    let durable = {
        let mut db = Db::open(&base, "t1", SilkConfig::default())?;
        db.put(b"base", b"1")?;
        let s = db.stats()?.unwrap();
        db.close()?;
        s.durable_lsn
    };

    {
        let mut wal = Wal::open(&dir, 4 * 1024 * 1024)?;
        wal.append(&TxRecord {
            lsn: durable + 1,
            tx_id: 1,
            ops: vec![WalOp::Put {
                key: b"valid".to_vec(),
                value: b"yes".to_vec(),
            }],
        })?;
        wal.flush()?;
    }
    // Половина следующей записи + мусор.
    let seg = last_segment(&dir)?;
    {
        let rec = SilkDB::wal::record::encode_record(&TxRecord {
            lsn: durable + 2,
            tx_id: 2,
            ops: vec![WalOp::Put {
                key: b"lost".to_vec(),
                value: b"never".to_vec(),
            }],
        });
        let mut f = fs::OpenOptions::new().append(true).open(&seg)?;
        f.write_all(&rec[..rec.len() / 2])?;
        f.sync_all()?;
    }

    {
        let mut db = Db::open(&base, "t1", SilkConfig::default())?;
        assert_eq!(db.get(b"valid")?.as_deref(), Some(b"yes".as_slice()));
        assert_eq!(db.get(b"lost")?, None, "torn record never happened");
        // Хвост усечён: дальнейшие записи идут в чистый журнал.
        db.put(b"after", b"ok")?;
        db.close()?;
    }
    {
        let mut db = Db::open(&base, "t1", SilkConfig::default())?;
        assert_eq!(db.get(b"after")?.as_deref(), Some(b"ok".as_slice()));
        assert_eq!(db.get(b"lost")?, None);
        db.close()?;
    }
    Ok(())
}

// Атомарность (S6): многооперационная запись либо видна целиком, либо
// не видна вовсе - для обеих судеб одной и той же записи.
#[test]
fn multi_op_record_is_all_or_nothing() -> Result<()> {
    let base = unique_base("crash-atomic");
    let dir = base.join("t1");
    let durable = {
        let mut db = Db::open(&base, "t1", SilkConfig::default())?;
        db.put(b"pre", b"1")?;
        let s = db.stats()?.unwrap();
        db.close()?;
        s.durable_lsn
    };

    let pairs: Vec<(Vec<u8>, Vec<u8>)> = (0..500u32)
        .map(|i| (format!("bk-{:04}", i).into_bytes(), b"v".to_vec()))
        .collect();
    let rec = TxRecord {
        lsn: durable + 1,
        tx_id: 7,
        ops: pairs
            .iter()
            .map(|(k, v)| WalOp::Put {
                key: k.clone(),
                value: v.clone(),
            })
            .collect(),
    };

    // Судьба 1: запись долетела целиком -> видна целиком.
    {
        let mut wal = Wal::open(&dir, 4 * 1024 * 1024)?;
        wal.append(&rec)?;
        wal.flush()?;
    }
    {
        let mut db = Db::open(&base, "t1", SilkConfig::default())?;
        assert_eq!(db.scan_prefix(b"bk-", usize::MAX)?.len(), 500);
        db.close()?;
    }

    // Судьба 2: свежая база, та же запись обрезана -> не видна вовсе.
    let base2 = unique_base("crash-atomic2");
    let dir2 = base2.join("t1");
    let durable2 = {
        let mut db = Db::open(&base2, "t1", SilkConfig::default())?;
        db.put(b"pre", b"1")?;
        let s = db.stats()?.unwrap();
        db.close()?;
        s.durable_lsn
    };
    {
        let mut rec2 = rec.clone();
        rec2.lsn = durable2 + 1;
        let bytes = SilkDB::wal::record::encode_record(&rec2);
        let seg = last_segment(&dir2)?;
        let mut f = fs::OpenOptions::new().append(true).open(&seg)?;
        f.write_all(&bytes[..bytes.len() - 3])?; // без хвоста с CRC
        f.sync_all()?;
    }
    {
        let mut db = Db::open(&base2, "t1", SilkConfig::default())?;
        assert!(db.scan_prefix(b"bk-", usize::MAX)?.is_empty(), "partial record invisible");
        assert_eq!(db.get(b"pre")?.as_deref(), Some(b"1".as_slice()));
        db.close()?;
    }
    Ok(())
}

// Свойство 6: открытие/закрытие без записей не меняет файл страниц.
#[test]
fn idempotent_open_keeps_pages_byte_identical() -> Result<()> {
    let base = unique_base("crash-idem");
    {
        let mut db = Db::open(&base, "t1", SilkConfig::default())?;
        db.put(b"k", b"v")?;
        db.close()?;
    }
    let pages = base.join("t1").join("db.pages");
    let before = fs::read(&pages)?;
    {
        let db = Db::open(&base, "t1", SilkConfig::default())?;
        db.close()?;
    }
    let after = fs::read(&pages)?;
    assert_eq!(before, after);
    Ok(())
}

fn last_segment(dir: &Path) -> Result<PathBuf> {
    let mut segs: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .map(|n| n.to_string_lossy().starts_with("wal-"))
                .unwrap_or(false)
        })
        .collect();
    segs.sort();
    Ok(segs.pop().expect("wal segment present"))
}

fn unique_base(prefix: &str) -> PathBuf {
    let pid = std::process::id();
    let t = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let p = std::env::temp_dir().join(format!("skdb-{}-{}-{}", prefix, pid, t));
    fs::create_dir_all(&p).unwrap();
    p
}
