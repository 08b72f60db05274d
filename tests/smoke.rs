use anyhow::Result;
use std::fs;
use std::path::PathBuf;

use SilkDB::{Db, SilkConfig};

#[test]
fn smoke_put_get_delete() -> Result<()> {
    let base = unique_base("smoke");
    let mut db = Db::open(&base, "t1", SilkConfig::default())?;

    db.put(b"a", b"1")?;
    assert_eq!(db.get(b"a")?.as_deref(), Some(b"1".as_slice()));

    assert!(db.delete(b"a")?, "delete of live key returns true");
    assert_eq!(db.get(b"a")?, None);
    assert!(!db.delete(b"a")?, "delete of absent key returns false");

    db.close()?;
    Ok(())
}

#[test]
fn values_survive_reopen() -> Result<()> {
    let base = unique_base("reopen");
    {
        let mut db = Db::open(&base, "t1", SilkConfig::default())?;
        db.put(b"alpha", b"1")?;
        db.put(b"beta", b"2")?;
        // Большое значение уходит в overflow-цепочку.
        let big = pattern(64 * 1024, 0xAB);
        db.put(b"big", &big)?;
        db.close()?;
    }
    {
        let mut db = Db::open(&base, "t1", SilkConfig::default())?;
        assert_eq!(db.get(b"alpha")?.as_deref(), Some(b"1".as_slice()));
        assert_eq!(db.get(b"beta")?.as_deref(), Some(b"2".as_slice()));
        let big = db.get(b"big")?.expect("big value present");
        assert_eq!(big.len(), 64 * 1024);
        assert_eq!(big[0], 0xAB);
        assert_eq!(big[big.len() - 1], 0xAB);
        db.close()?;
    }
    Ok(())
}

#[test]
fn empty_value_roundtrip() -> Result<()> {
    let base = unique_base("empty-val");
    let mut db = Db::open(&base, "t1", SilkConfig::default())?;
    db.put(b"k", b"")?;
    assert_eq!(db.get(b"k")?.as_deref(), Some(b"".as_slice()));
    db.close()?;
    Ok(())
}

#[test]
fn bad_inputs_are_rejected() -> Result<()> {
    let base = unique_base("badinput");
    let mut db = Db::open(&base, "t1", SilkConfig::default())?;

    assert!(db.put(b"", b"v").is_err(), "empty key");
    assert!(db.get(b"").is_err());
    let huge_key = vec![0u8; 4097];
    assert!(db.put(&huge_key, b"v").is_err(), "oversized key");

    // Имя базы с запрещёнными символами.
    assert!(Db::open(&base, "no spaces", SilkConfig::default()).is_err());
    assert!(Db::open(&base, "", SilkConfig::default()).is_err());

    db.close()?;
    Ok(())
}

#[test]
fn max_length_key_works() -> Result<()> {
    let base = unique_base("maxkey");
    let mut db = Db::open(&base, "t1", SilkConfig::default())?;
    let key = vec![0x42u8; 4096];
    db.put(&key, b"v")?;
    assert_eq!(db.get(&key)?.as_deref(), Some(b"v".as_slice()));
    assert!(db.delete(&key)?);
    db.close()?;
    Ok(())
}

#[test]
fn second_writer_is_rejected() -> Result<()> {
    let base = unique_base("lock");
    let db = Db::open(&base, "t1", SilkConfig::default())?;
    assert!(
        Db::open(&base, "t1", SilkConfig::default()).is_err(),
        "second exclusive open must fail while lock is held"
    );
    db.close()?;
    // После закрытия лок свободен.
    let db2 = Db::open(&base, "t1", SilkConfig::default())?;
    db2.close()?;
    Ok(())
}

#[test]
fn stats_reflect_writes() -> Result<()> {
    let base = unique_base("stats");
    let mut db = Db::open(&base, "t1", SilkConfig::default())?;
    let s0 = db.stats()?.expect("primary backend has stats");
    db.put(b"k", b"v")?;
    let s1 = db.stats()?.expect("primary backend has stats");
    assert!(s1.last_lsn > s0.last_lsn);
    assert_eq!(s1.last_lsn, s1.durable_lsn);
    assert!(s1.pages >= s0.pages);
    db.close()?;
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

fn pattern(len: usize, byte: u8) -> Vec<u8> {
    let mut v = vec![byte; len];
    if len >= 8 {
        v[len / 2] = byte ^ 0x11;
    }
    v
}
