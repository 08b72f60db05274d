use anyhow::Result;
use std::fs;
use std::path::PathBuf;

use SilkDB::{Db, SilkConfig};

// put_no_sync виден сразу, durable становится после flush().
#[test]
fn no_sync_visible_then_durable_after_flush() -> Result<()> {
    let base = unique_base("nosync-flush");
    {
        let mut db = Db::open(&base, "n1", SilkConfig::default())?;
        db.put(b"anchor", b"1")?;

        db.put_no_sync(b"soft", b"2")?;
        assert_eq!(db.get(b"soft")?.as_deref(), Some(b"2".as_slice()));

        let s = db.stats()?.unwrap();
        assert!(s.last_lsn > s.durable_lsn, "no-sync write is not durable yet");

        db.flush()?;
        let s = db.stats()?.unwrap();
        assert_eq!(s.last_lsn, s.durable_lsn, "flush is the durability barrier");
        db.abandon(); // сбой после flush ничего не теряет
    }
    {
        let mut db = Db::open(&base, "n1", SilkConfig::default())?;
        assert_eq!(db.get(b"anchor")?.as_deref(), Some(b"1".as_slice()));
        assert_eq!(db.get(b"soft")?.as_deref(), Some(b"2".as_slice()));
        db.close()?;
    }
    Ok(())
}

// Синхронный коммит после серии no-sync записей делает durable всё.
#[test]
fn synced_commit_covers_earlier_no_sync_writes() -> Result<()> {
    let base = unique_base("nosync-cover");
    {
        let mut db = Db::open(&base, "n1", SilkConfig::default())?;
        for i in 0..50u32 {
            db.put_no_sync(format!("s{:02}", i).as_bytes(), b"v")?;
        }
        db.put(b"hard", b"1")?; // синхронный коммит
        let s = db.stats()?.unwrap();
        assert_eq!(s.last_lsn, s.durable_lsn);
        db.abandon();
    }
    {
        let mut db = Db::open(&base, "n1", SilkConfig::default())?;
        assert_eq!(db.get(b"hard")?.as_deref(), Some(b"1".as_slice()));
        assert_eq!(db.scan_prefix(b"s", usize::MAX)?.len(), 50);
        db.close()?;
    }
    Ok(())
}

// close() подразумевает flush: после него всё durable.
#[test]
fn close_implies_flush() -> Result<()> {
    let base = unique_base("nosync-close");
    {
        let mut db = Db::open(&base, "n1", SilkConfig::default())?;
        db.put_no_sync(b"k", b"v")?;
        db.close()?;
    }
    {
        let mut db = Db::open(&base, "n1", SilkConfig::default())?;
        assert_eq!(db.get(b"k")?.as_deref(), Some(b"v".as_slice()));
        db.close()?;
    }
    Ok(())
}

// Аварийное завершение до flush: более ранние durable-коммиты целы;
// сама no-sync запись переживать сбой не обязана.
#[test]
fn crash_before_flush_preserves_earlier_state() -> Result<()> {
    let base = unique_base("nosync-crash");
    {
        let mut db = Db::open(&base, "n1", SilkConfig::default())?;
        db.put(b"durable", b"1")?;
        db.put_no_sync(b"maybe", b"2")?;
        db.abandon();
    }
    {
        let mut db = Db::open(&base, "n1", SilkConfig::default())?;
        assert_eq!(db.get(b"durable")?.as_deref(), Some(b"1".as_slice()));
        assert!(db.verify_integrity()?.is_empty());
        db.close()?;
    }
    Ok(())
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
