use anyhow::Result;
use std::fs;
use std::path::PathBuf;

use SilkDB::{Db, SilkConfig};

// Сжатие: прозрачный roundtrip, включая overflow-значения.
#[test]
fn compression_roundtrip() -> Result<()> {
    let base = unique_base("lz4");
    let cfg = SilkConfig::default().with_compression(true);
    {
        let mut db = Db::open(&base, "c1", cfg.clone())?;
        let compressible = vec![b'x'; 100_000];
        db.put(b"big", &compressible)?;
        db.put(b"tiny", b"abc")?; // ниже порога сжатия
        let random_ish: Vec<u8> = (0..5000u32)
            .map(|i| (i.wrapping_mul(2654435761) >> 13) as u8)
            .collect();
        db.put(b"noise", &random_ish)?;
        db.close()?;
    }
    {
        let mut db = Db::open(&base, "c1", cfg)?;
        assert_eq!(db.get(b"big")?.unwrap(), vec![b'x'; 100_000]);
        assert_eq!(db.get(b"tiny")?.as_deref(), Some(b"abc".as_slice()));
        assert_eq!(db.get(b"noise")?.unwrap().len(), 5000);
        assert!(db.verify_integrity()?.is_empty());
        db.close()?;
    }
    Ok(())
}

#[test]
fn encryption_roundtrip_and_key_required() -> Result<()> {
    let base = unique_base("aead");
    let key = vec![0x7Eu8; 32];
    let cfg = SilkConfig::default().with_encryption_key(Some(key.clone()));

    let secret = b"top secret payload, definitely not for the page file".repeat(20);
    {
        let mut db = Db::open(&base, "c2", cfg.clone())?;
        db.put(b"s", &secret)?;
        db.close()?;
    }

    // Открытие без ключа отклоняется сразу.
    assert!(Db::open(&base, "c2", SilkConfig::default()).is_err());

    // Плейнтекст не лежит в файле страниц.
    let pages = fs::read(base.join("c2").join("db.pages"))?;
    assert!(
        !pages.windows(32).any(|w| w == &secret[..32]),
        "plaintext must not appear in the page file"
    );

    {
        let mut db = Db::open(&base, "c2", cfg)?;
        assert_eq!(db.get(b"s")?.unwrap(), secret);
        db.close()?;
    }
    Ok(())
}

#[test]
fn all_key_lengths_accepted() -> Result<()> {
    for len in [16usize, 24, 32] {
        let base = unique_base(&format!("aead{}", len));
        let cfg = SilkConfig::default().with_encryption_key(Some(vec![9u8; len]));
        let mut db = Db::open(&base, "c3", cfg)?;
        db.put(b"k", b"v")?;
        assert_eq!(db.get(b"k")?.as_deref(), Some(b"v".as_slice()));
        db.close()?;
    }
    let base = unique_base("aead-bad");
    let cfg = SilkConfig::default().with_encryption_key(Some(vec![9u8; 20]));
    assert!(Db::open(&base, "c3", cfg).is_err(), "key length 20 rejected");
    Ok(())
}

#[test]
fn compression_and_encryption_compose_with_ttl() -> Result<()> {
    let base = unique_base("combo");
    let cfg = SilkConfig::default()
        .with_compression(true)
        .with_encryption_key(Some(vec![5u8; 16]));
    let mut db = Db::open(&base, "c4", cfg)?;

    let value = vec![b'z'; 10_000];
    db.put_with_ttl(b"k", &value, 60_000)?;
    assert_eq!(db.get(b"k")?.unwrap(), value);

    let pairs = db.scan_range(b"", None, 10)?;
    assert_eq!(pairs.len(), 1);
    assert_eq!(pairs[0].1, value);
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
