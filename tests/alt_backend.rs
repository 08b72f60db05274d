use anyhow::Result;
use byteorder::{ByteOrder, LittleEndian};
use std::fs;
use std::path::PathBuf;
use std::thread::sleep;
use std::time::Duration;

use SilkDB::{Db, SilkConfig};

// Запасной бэкенд сохраняет наблюдаемый контракт: ключи, TTL,
// атомарность транзакций, упорядоченные сканы.
#[test]
fn alt_basic_contract() -> Result<()> {
    let base = unique_base("alt-basic");
    let mut db = Db::open_dir_alt(&base.join("a1"), SilkConfig::default())?;
    assert!(db.is_alt());

    db.put(b"a", b"1")?;
    assert_eq!(db.get(b"a")?.as_deref(), Some(b"1".as_slice()));
    assert!(db.delete(b"a")?);
    assert_eq!(db.get(b"a")?, None);
    assert!(!db.delete(b"a")?);

    // verify_integrity у запасного бэкенда пуст по контракту.
    assert!(db.verify_integrity()?.is_empty());
    db.close()?;
    Ok(())
}

#[test]
fn alt_persists_across_reopen() -> Result<()> {
    let base = unique_base("alt-reopen");
    let dir = base.join("a1");
    {
        let mut db = Db::open_dir_alt(&dir, SilkConfig::default())?;
        db.put(b"k1", b"v1")?;
        db.put_no_sync(b"k2", b"v2")?; // деградирует до put
        db.close()?;
    }
    {
        let mut db = Db::open_dir_alt(&dir, SilkConfig::default())?;
        assert_eq!(db.get(b"k1")?.as_deref(), Some(b"v1".as_slice()));
        assert_eq!(db.get(b"k2")?.as_deref(), Some(b"v2".as_slice()));
        db.close()?;
    }
    Ok(())
}

#[test]
fn alt_ordered_scan_and_ttl() -> Result<()> {
    let base = unique_base("alt-scan");
    let mut db = Db::open_dir_alt(&base.join("a1"), SilkConfig::default())?;

    db.put(b"b", b"2")?;
    db.put(b"a", b"1")?;
    db.put(b"c", b"3")?;
    db.put_with_ttl(b"bb", b"ttl", 100)?;

    let keys: Vec<Vec<u8>> = db
        .scan_range(b"a", Some(b"d"), 10)?
        .into_iter()
        .map(|(k, _)| k)
        .collect();
    assert_eq!(
        keys,
        vec![b"a".to_vec(), b"b".to_vec(), b"bb".to_vec(), b"c".to_vec()]
    );

    sleep(Duration::from_millis(250));
    let keys: Vec<Vec<u8>> = db
        .scan_range(b"a", Some(b"d"), 10)?
        .into_iter()
        .map(|(k, _)| k)
        .collect();
    assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    assert_eq!(db.get(b"bb")?, None);
    db.close()?;
    Ok(())
}

#[test]
fn alt_transaction_and_batch_atomicity() -> Result<()> {
    let base = unique_base("alt-txn");
    let dir = base.join("a1");
    {
        let mut db = Db::open_dir_alt(&dir, SilkConfig::default())?;

        let mut txn = db.begin_write();
        txn.put(b"x", b"1")?;
        txn.put(b"y", b"2")?;
        txn.delete(b"z")?;
        db.commit_transaction(&mut txn)?;

        let mut buf = Vec::new();
        let mut tmp = [0u8; 4];
        for (k, v) in [(b"p".as_slice(), b"10".as_slice()), (b"q", b"20")] {
            LittleEndian::write_u32(&mut tmp, k.len() as u32);
            buf.extend_from_slice(&tmp);
            buf.extend_from_slice(k);
            LittleEndian::write_u32(&mut tmp, v.len() as u32);
            buf.extend_from_slice(&tmp);
            buf.extend_from_slice(v);
        }
        assert_eq!(db.put_batch(&buf)?, 2);

        // Недекодируемый батч отвергается без изменений.
        buf.push(0xEE);
        assert!(db.put_batch(&buf).is_err());
        db.close()?;
    }
    {
        let mut db = Db::open_dir_alt(&dir, SilkConfig::default())?;
        assert_eq!(db.get(b"x")?.as_deref(), Some(b"1".as_slice()));
        assert_eq!(db.get(b"y")?.as_deref(), Some(b"2".as_slice()));
        assert_eq!(db.get(b"p")?.as_deref(), Some(b"10".as_slice()));
        assert_eq!(db.get(b"q")?.as_deref(), Some(b"20".as_slice()));
        db.close()?;
    }
    Ok(())
}

// Рваный хвост журнала не мешает открытию: теряется только хвост.
#[test]
fn alt_torn_journal_tail_is_tolerated() -> Result<()> {
    let base = unique_base("alt-torn");
    let dir = base.join("a1");
    {
        let mut db = Db::open_dir_alt(&dir, SilkConfig::default())?;
        db.put(b"k", b"v")?;
        db.close()?;
    }
    // Дописываем мусор в журнал.
    {
        use std::io::Write;
        let mut f = fs::OpenOptions::new()
            .append(true)
            .open(dir.join("db.alt"))?;
        f.write_all(&[0xAA, 0xBB, 0xCC])?;
        f.sync_all()?;
    }
    {
        let mut db = Db::open_dir_alt(&dir, SilkConfig::default())?;
        assert_eq!(db.get(b"k")?.as_deref(), Some(b"v".as_slice()));
        // Хвост усечён: новые коммиты ложатся в чистый журнал.
        db.put(b"k2", b"v2")?;
        db.close()?;
    }
    {
        let mut db = Db::open_dir_alt(&dir, SilkConfig::default())?;
        assert_eq!(db.get(b"k")?.as_deref(), Some(b"v".as_slice()));
        assert_eq!(db.get(b"k2")?.as_deref(), Some(b"v2".as_slice()));
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
