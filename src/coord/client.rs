//! coord/client - клиентский хэндл координатора.
//!
//! Каждый клиент либо лидер (владеет потоком движка и шлёт heartbeat),
//! либо follower (проксирует операции лидеру через шину). Фоновый поток
//! клиента совмещает обе роли: у лидера отбивает heartbeat раз в
//! секунду, у follower'а следит за тишиной и после 3 с пытается забрать
//! лок и промоутнуться; свежий хэндл движка при открытии доигрывает WAL
//! умершего лидера.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use log::{info, warn};

use crate::config::{validate_db_name, SilkConfig};
use crate::error::{Result, SilkError};
use crate::facade::Db;
use crate::lock;
use crate::txn::WriteTxn;
use crate::util::now_ms;
use crate::wal::WalOp;

use super::proto::{
    expect_bad_pages, expect_count, expect_entries, expect_existed, expect_unit, expect_value,
    Command, Reply, Request,
};
use super::server::EngineHandle;
use super::{Bus, HEARTBEAT_INTERVAL_MS, HEARTBEAT_TIMEOUT_MS, PROXY_TIMEOUT_MS};

/// Координатор: владеет шиной и базовым каталогом с базами.
pub struct Coordinator {
    bus: Arc<Bus>,
    base_dir: PathBuf,
}

impl Coordinator {
    pub fn new<P: Into<PathBuf>>(base_dir: P) -> Coordinator {
        Coordinator {
            bus: Bus::new(),
            base_dir: base_dir.into(),
        }
    }

    pub fn bus(&self) -> Arc<Bus> {
        self.bus.clone()
    }

    /// Подключить клиента к базе по имени. Первый успевший забрать лок
    /// становится лидером; остальные - followers.
    pub fn connect(&self, name: &str, cfg: SilkConfig) -> Result<Client> {
        validate_db_name(name)?;
        Client::start(
            self.bus.clone(),
            self.base_dir.join(name),
            name.to_string(),
            cfg,
        )
    }
}

enum Role {
    Leader(EngineHandle),
    Follower,
}

struct Shared {
    role: Mutex<Role>,
    stop: AtomicBool,
    name: String,
    client_id: u64,
    dir: PathBuf,
    cfg: SilkConfig,
    bus: Arc<Bus>,
}

pub struct Client {
    shared: Arc<Shared>,
    next_req_id: AtomicU64,
    monitor: Option<JoinHandle<()>>,
}

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

impl Client {
    fn start(bus: Arc<Bus>, dir: PathBuf, name: String, cfg: SilkConfig) -> Result<Client> {
        std::fs::create_dir_all(&dir)?;
        let client_id = NEXT_CLIENT_ID.fetch_add(1, Ordering::SeqCst);

        let role = match lock::try_acquire_exclusive(&dir)? {
            Some(guard) => {
                let db = Db::open_dir_locked(&dir, cfg.clone(), guard)?;
                let handle = EngineHandle::spawn(db);
                bus.register_leader(&name, client_id, handle.sender());
                info!("client {}: leader of '{}'", client_id, name);
                Role::Leader(handle)
            }
            None => {
                info!("client {}: follower of '{}'", client_id, name);
                Role::Follower
            }
        };

        let shared = Arc::new(Shared {
            role: Mutex::new(role),
            stop: AtomicBool::new(false),
            name,
            client_id,
            dir,
            cfg,
            bus,
        });

        let monitor = {
            let shared = shared.clone();
            std::thread::Builder::new()
                .name("silkdb-coord".into())
                .spawn(move || monitor_loop(shared))
                .expect("spawn coordinator thread")
        };

        Ok(Client {
            shared,
            next_req_id: AtomicU64::new(1),
            monitor: Some(monitor),
        })
    }

    pub fn client_id(&self) -> u64 {
        self.shared.client_id
    }

    pub fn is_leader(&self) -> bool {
        matches!(*self.shared.role.lock().unwrap(), Role::Leader(_))
    }

    /// Сериализовать операцию: лидер - в собственный inbox, follower -
    /// лидеру через шину. Timeout, если ответа нет 10 секунд или лидер
    /// сейчас отсутствует (вызывающий может повторить).
    fn request(&self, cmd: Command) -> Result<Reply> {
        let req_id = self.next_req_id.fetch_add(1, Ordering::Relaxed);
        let inbox = {
            let role = self.shared.role.lock().unwrap();
            match &*role {
                Role::Leader(handle) => handle.sender(),
                Role::Follower => self
                    .shared
                    .bus
                    .leader_inbox(&self.shared.name)
                    .ok_or_else(|| {
                        SilkError::Timeout("no leader available; retry".to_string())
                    })?,
            }
        };

        let (rtx, rrx) = mpsc::channel();
        inbox
            .send(Request {
                req_id,
                client_id: self.shared.client_id,
                cmd,
                resp: rtx,
            })
            .map_err(|_| SilkError::Timeout("leader is gone; retry".to_string()))?;

        let resp = rrx
            .recv_timeout(Duration::from_millis(PROXY_TIMEOUT_MS))
            .map_err(|_| {
                SilkError::Timeout(format!("no response within {} ms", PROXY_TIMEOUT_MS))
            })?;
        resp.result.map_err(|we| we.into_error())
    }

    // ------------- операции -------------

    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        expect_unit(self.request(Command::Put {
            key: key.to_vec(),
            value: value.to_vec(),
        })?)
    }

    pub fn put_no_sync(&self, key: &[u8], value: &[u8]) -> Result<()> {
        expect_unit(self.request(Command::PutNoSync {
            key: key.to_vec(),
            value: value.to_vec(),
        })?)
    }

    pub fn put_with_ttl(&self, key: &[u8], value: &[u8], ttl_ms: u64) -> Result<()> {
        expect_unit(self.request(Command::PutWithTtl {
            key: key.to_vec(),
            value: value.to_vec(),
            ttl_ms,
        })?)
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        expect_value(self.request(Command::Get { key: key.to_vec() })?)
    }

    pub fn delete(&self, key: &[u8]) -> Result<bool> {
        expect_existed(self.request(Command::Delete { key: key.to_vec() })?)
    }

    pub fn put_batch(&self, data: &[u8]) -> Result<u32> {
        expect_count(self.request(Command::PutBatch {
            data: data.to_vec(),
        })?)
    }

    pub fn scan_range(
        &self,
        lo: &[u8],
        hi: Option<&[u8]>,
        limit: usize,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        expect_entries(self.request(Command::ScanRange {
            lo: lo.to_vec(),
            hi: hi.map(|h| h.to_vec()),
            limit,
        })?)
    }

    /// Атомарная транзакция: операции уезжают лидеру одним конвертом.
    /// TTL переводится в absolute expiry на стороне клиента.
    pub fn commit_transaction(&self, txn: &mut WriteTxn) -> Result<()> {
        if !txn.is_active() {
            return Err(crate::error::bad_input("transaction is not active"));
        }
        let ops = txn.take_deduped_ops();
        if ops.is_empty() {
            return Ok(());
        }
        expect_unit(self.request(Command::CommitTransaction { ops })?)
    }

    /// Сырой список операций (фасадный commitTransaction из §конвертов).
    pub fn commit_ops(&self, ops: Vec<WalOp>) -> Result<()> {
        if ops.is_empty() {
            return Ok(());
        }
        expect_unit(self.request(Command::CommitTransaction { ops })?)
    }

    pub fn flush(&self) -> Result<()> {
        expect_unit(self.request(Command::Flush)?)
    }

    pub fn verify_integrity(&self) -> Result<Vec<u32>> {
        expect_bad_pages(self.request(Command::VerifyIntegrity)?)
    }

    /// Штатное отключение: лидер закрывает движок (flush) и снимается с
    /// шины; follower просто останавливает наблюдателя.
    pub fn shutdown(mut self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        if let Some(j) = self.monitor.take() {
            let _ = j.join();
        }
        let role = {
            let mut g = self.shared.role.lock().unwrap();
            std::mem::replace(&mut *g, Role::Follower)
        };
        if let Role::Leader(handle) = role {
            handle.shutdown();
            self.shared
                .bus
                .unregister_leader(&self.shared.name, self.shared.client_id);
        }
    }

    /// Аварийное умерщвление (моделирование упавшей вкладки): движок
    /// бросается без flush, heartbeat прекращается, запись на шине
    /// остаётся протухать - followers заметят тишину и переизберутся.
    pub fn kill(mut self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        if let Some(j) = self.monitor.take() {
            let _ = j.join();
        }
        let role = {
            let mut g = self.shared.role.lock().unwrap();
            std::mem::replace(&mut *g, Role::Follower)
        };
        if let Role::Leader(handle) = role {
            handle.kill();
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::SeqCst);
    }
}

/// Фоновый цикл клиента: heartbeat лидера / наблюдение follower'а.
fn monitor_loop(shared: Arc<Shared>) {
    let tick = Duration::from_millis(250);
    let mut last_hb = Instant::now() - Duration::from_millis(HEARTBEAT_INTERVAL_MS);

    while !shared.stop.load(Ordering::SeqCst) {
        let is_leader = matches!(*shared.role.lock().unwrap(), Role::Leader(_));

        if is_leader {
            if last_hb.elapsed().as_millis() as u64 >= HEARTBEAT_INTERVAL_MS {
                shared.bus.heartbeat(&shared.name, shared.client_id);
                last_hb = Instant::now();
            }
        } else {
            let silence = shared.bus.leader_silence_ms(&shared.name);
            let leader_dead = match silence {
                Some(ms) => ms >= HEARTBEAT_TIMEOUT_MS,
                None => true,
            };
            if leader_dead {
                try_promote(&shared);
            }
        }
        std::thread::park_timeout(tick);
    }
}

/// Попытка промоушена follower'а: лок каталога, свежий движок (реплей
/// WAL умершего лидера), регистрация на шине.
fn try_promote(shared: &Arc<Shared>) {
    let guard = match lock::try_acquire_exclusive(&shared.dir) {
        Ok(Some(g)) => g,
        Ok(None) => return, // лок ещё занят (лидер жив или сосед успел раньше)
        Err(e) => {
            warn!("client {}: lock probe failed: {}", shared.client_id, e);
            return;
        }
    };
    match Db::open_dir_locked(&shared.dir, shared.cfg.clone(), guard) {
        Ok(db) => {
            let handle = EngineHandle::spawn(db);
            shared
                .bus
                .register_leader(&shared.name, shared.client_id, handle.sender());
            let mut role = shared.role.lock().unwrap();
            *role = Role::Leader(handle);
            info!(
                "client {}: promoted to leader of '{}' at {}",
                shared.client_id,
                shared.name,
                now_ms()
            );
        }
        Err(e) => {
            warn!(
                "client {}: promotion failed for '{}': {}",
                shared.client_id, shared.name, e
            );
        }
    }
}
