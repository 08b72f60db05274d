//! coord - координатор единственного писателя.
//!
//! Несколько клиентов процесса могут открыть одну базу по имени; писатель
//! ровно один. Выбор лидера - эксклюзивный файловый лок (lock.rs) на
//! каталоге базы; шина сообщений несёт request/response конверты от
//! followers к лидеру и heartbeat лидера.
//!
//! - proto.rs  - конверты команд/ответов.
//! - server.rs - поток-владелец Db, разбирающий inbox (одно сообщение
//!               внутрь, одно наружу).
//! - client.rs - клиентский хэндл: лидер или follower с прокси.

pub mod client;
pub mod proto;
pub mod server;

pub use client::{Client, Coordinator};
pub use proto::{Command, Reply};

use std::collections::HashMap;
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use proto::Request;

/// Интервал heartbeat лидера.
pub const HEARTBEAT_INTERVAL_MS: u64 = 1_000;
/// Молчание, после которого follower считает лидера мёртвым.
pub const HEARTBEAT_TIMEOUT_MS: u64 = 3_000;
/// Таймаут прокси-запроса follower -> leader.
pub const PROXY_TIMEOUT_MS: u64 = 10_000;

struct LeaderEntry {
    client_id: u64,
    inbox: Sender<Request>,
    last_heartbeat: Instant,
}

/// Общая шина кооперирующихся клиентов. Явно сконструированный хэндл,
/// которым владеет координатор (не глобальное состояние).
pub struct Bus {
    leaders: Mutex<HashMap<String, LeaderEntry>>,
}

impl Bus {
    pub fn new() -> Arc<Bus> {
        Arc::new(Bus {
            leaders: Mutex::new(HashMap::new()),
        })
    }

    fn register_leader(&self, name: &str, client_id: u64, inbox: Sender<Request>) {
        let mut g = self.leaders.lock().unwrap();
        g.insert(
            name.to_string(),
            LeaderEntry {
                client_id,
                inbox,
                last_heartbeat: Instant::now(),
            },
        );
    }

    fn unregister_leader(&self, name: &str, client_id: u64) {
        let mut g = self.leaders.lock().unwrap();
        if g.get(name).map(|e| e.client_id) == Some(client_id) {
            g.remove(name);
        }
    }

    fn heartbeat(&self, name: &str, client_id: u64) {
        let mut g = self.leaders.lock().unwrap();
        if let Some(e) = g.get_mut(name) {
            if e.client_id == client_id {
                e.last_heartbeat = Instant::now();
            }
        }
    }

    fn leader_inbox(&self, name: &str) -> Option<Sender<Request>> {
        let g = self.leaders.lock().unwrap();
        g.get(name).map(|e| e.inbox.clone())
    }

    /// Миллисекунды с последнего heartbeat лидера (None - лидера нет).
    fn leader_silence_ms(&self, name: &str) -> Option<u64> {
        let g = self.leaders.lock().unwrap();
        g.get(name)
            .map(|e| e.last_heartbeat.elapsed().as_millis() as u64)
    }

    /// id текущего лидера по имени базы (для тестов/диагностики).
    pub fn leader_id(&self, name: &str) -> Option<u64> {
        let g = self.leaders.lock().unwrap();
        g.get(name).map(|e| e.client_id)
    }
}
