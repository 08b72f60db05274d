//! tree/txn - copy-on-write контекст одной транзакции над деревом.
//!
//! Всё, что транзакция испачкала, уходит на свежие page_id; прежние id
//! копятся в freed и попадают во free-лист только после того, как
//! WAL-запись транзакции и meta durable (см. engine/commit). Прежнее
//! дерево на диске остаётся нетронутым до записи новой meta.
//!
//! Исключение - правка right-sibling ссылки у левого соседа переписанного
//! листа: она выполняется in-place с сохранением старого page_lsn. Ссылка -
//! ускоритель сканов и не меняет логического содержимого старого дерева;
//! реплей WAL после сбоя переписывает её заново.

use std::collections::{HashMap, HashSet};

use crate::consts::{INLINE_THRESHOLD, NO_PAGE};
use crate::error::{corrupt, Result};
use crate::page::node::{Descriptor, KeyEntry, Node};
use crate::page::ovf;
use crate::pager::Pager;

pub struct TreeTxn<'a> {
    pub(crate) pager: &'a mut Pager,
    lsn: u64,
    pub root: u32,
    dirty_nodes: HashMap<u32, Node>,
    dirty_raw: HashMap<u32, Vec<u8>>,
    patched: HashMap<u32, Vec<u8>>,
    allocated: HashSet<u32>,
    pub freed: Vec<u32>,
    leaf_remap: HashMap<u32, u32>,
}

impl<'a> TreeTxn<'a> {
    pub fn begin(pager: &'a mut Pager, commit_lsn: u64) -> Self {
        let root = pager.meta.root;
        Self {
            pager,
            lsn: commit_lsn,
            root,
            dirty_nodes: HashMap::new(),
            dirty_raw: HashMap::new(),
            patched: HashMap::new(),
            allocated: HashSet::new(),
            freed: Vec::new(),
            leaf_remap: HashMap::new(),
        }
    }

    // ---------------- чтение ----------------

    /// Страница по id: сперва созданные в этой транзакции, затем диск.
    fn read_page_any(&self, pid: u32) -> Result<Vec<u8>> {
        if let Some(pg) = self.dirty_raw.get(&pid) {
            return Ok(pg.clone());
        }
        self.pager.read_page(pid)
    }

    pub fn read_chain(&self, head: u32, total_len: usize) -> Result<Vec<u8>> {
        ovf::read_chain(head, total_len, |pid| self.read_page_any(pid))
    }

    /// Узел по id (копия; сохранение - через save).
    pub fn load(&self, pid: u32) -> Result<Node> {
        if let Some(n) = self.dirty_nodes.get(&pid) {
            return Ok(n.clone());
        }
        let pg = self.read_page_any(pid)?;
        Node::decode(pid, &pg, |head, len| self.read_chain(head, len))
    }

    // ---------------- аллокация / освобождение ----------------

    pub fn alloc(&mut self) -> Result<u32> {
        let pid = self.pager.allocate()?;
        self.allocated.insert(pid);
        Ok(pid)
    }

    /// Записать дескриптор значения: inline или overflow-цепочка.
    pub fn write_value(&mut self, stored: &[u8]) -> Result<Descriptor> {
        if stored.len() <= INLINE_THRESHOLD {
            return Ok(Descriptor::Inline(stored.to_vec()));
        }
        let lsn = self.lsn;
        let (head, pages) = ovf::build_chain(stored, lsn, || self.alloc())?;
        for (pid, pg) in pages {
            self.dirty_raw.insert(pid, pg);
        }
        Ok(Descriptor::Overflow {
            head,
            total_len: stored.len() as u32,
        })
    }

    /// Пометить цепочку к освобождению (физически - после durable meta).
    pub fn free_chain(&mut self, head: u32, total_len: usize) -> Result<()> {
        let pids = ovf::chain_pids(head, total_len, |pid| self.read_page_any(pid))?;
        self.freed.extend(pids);
        Ok(())
    }

    pub fn free_key(&mut self, key: &KeyEntry) -> Result<()> {
        if let Some(head) = key.spill {
            self.free_chain(head, key.bytes.len())?;
        }
        Ok(())
    }

    pub fn free_descriptor(&mut self, desc: &Descriptor) -> Result<()> {
        if let Descriptor::Overflow { head, total_len } = desc {
            self.free_chain(*head, *total_len as usize)?;
        }
        Ok(())
    }

    // ---------------- сохранение узлов ----------------

    /// Выделить цепочки свежим длинным ключам узла.
    fn spill_keys(&mut self, node: &mut Node) -> Result<()> {
        let lsn = self.lsn;
        for key in node.keys.iter_mut() {
            if key.needs_spill() && key.spill.is_none() {
                let bytes = key.bytes.clone();
                let (head, pages) = ovf::build_chain(&bytes, lsn, || {
                    let pid = self.pager.allocate()?;
                    self.allocated.insert(pid);
                    Ok(pid)
                })?;
                for (pid, pg) in pages {
                    self.dirty_raw.insert(pid, pg);
                }
                key.spill = Some(head);
            }
        }
        Ok(())
    }

    /// Copy-on-write сохранение. Узел, уже аллоцированный в этой
    /// транзакции, перезаписывается на месте (в памяти); иначе получает
    /// свежий page_id, а старый уходит в freed.
    pub fn save(&mut self, mut node: Node) -> Result<u32> {
        self.spill_keys(&mut node)?;

        if node.pid != NO_PAGE && self.allocated.contains(&node.pid) {
            let pid = node.pid;
            self.dirty_nodes.insert(pid, node);
            return Ok(pid);
        }

        let new_pid = self.alloc()?;
        if node.pid != NO_PAGE {
            self.freed.push(node.pid);
            if node.is_leaf {
                self.leaf_remap.insert(node.pid, new_pid);
            }
        }
        node.pid = new_pid;
        self.dirty_nodes.insert(new_pid, node);
        Ok(new_pid)
    }

    /// Узел поглощён слиянием: страница освобождается, листовой id
    /// перенаправляется на поглотивший лист (для починки ссылок).
    pub fn discard_merged(&mut self, old_pid: u32, absorber: u32, is_leaf: bool) {
        self.dirty_nodes.remove(&old_pid);
        self.freed.push(old_pid);
        if is_leaf {
            self.leaf_remap.insert(old_pid, absorber);
        }
    }

    // ---------------- фиксация ----------------

    /// Записать все страницы транзакции (без fsync; его делает коммит).
    /// Перед записью чинятся right-sibling ссылки.
    pub fn flush(&mut self) -> Result<()> {
        self.fix_sibling_links()?;

        for (pid, node) in &self.dirty_nodes {
            let pg = node.encode(self.lsn)?;
            self.pager.write_page(*pid, &pg)?;
        }
        for (pid, pg) in &self.dirty_raw {
            self.pager.write_page(*pid, pg)?;
        }
        for (pid, pg) in &self.patched {
            self.pager.write_page(*pid, pg)?;
        }
        Ok(())
    }

    fn fix_sibling_links(&mut self) -> Result<()> {
        if self.leaf_remap.is_empty() {
            return Ok(());
        }

        // 1) next_leaf грязных листьев - через remap к финальным id.
        let remap = self.leaf_remap.clone();
        for node in self.dirty_nodes.values_mut() {
            if node.is_leaf && node.next_leaf != NO_PAGE {
                node.next_leaf = resolve_remap(&remap, node.next_leaf);
            }
        }

        // 2) Левый сосед каждого переписанного листа должен указывать на
        // его новый id. Сосед ищется спуском по новому дереву.
        let finals: HashSet<u32> = remap
            .keys()
            .map(|&old| resolve_remap(&remap, old))
            .filter(|pid| self.dirty_nodes.contains_key(pid))
            .collect();

        for target in finals {
            let first_key = match self.dirty_nodes.get(&target).and_then(|n| n.keys.first()) {
                Some(k) => k.bytes.clone(),
                None => continue, // пустой корневой лист
            };
            let left = match self.find_left_leaf(&first_key)? {
                Some(pid) if pid != target => pid,
                _ => continue,
            };
            if let Some(n) = self.dirty_nodes.get_mut(&left) {
                n.next_leaf = target;
                continue;
            }
            // Чистый сосед: точечный in-place патч с его прежним lsn.
            let mut n = self.load(left)?;
            if n.next_leaf != target {
                let own_lsn = n.page_lsn;
                n.next_leaf = target;
                let pg = n.encode(own_lsn)?;
                self.patched.insert(left, pg);
            }
        }
        Ok(())
    }

    /// Лист, непосредственно предшествующий листу с данным первым ключом.
    fn find_left_leaf(&self, first_key: &[u8]) -> Result<Option<u32>> {
        let mut pid = self.root;
        let mut left_subtree: Option<u32> = None;
        let mut depth = 0u32;
        loop {
            let node = self.load(pid)?;
            if node.is_leaf {
                break;
            }
            let idx = node.child_index(first_key);
            if idx > 0 {
                left_subtree = Some(node.children[idx - 1]);
            }
            pid = node.children[idx];
            depth += 1;
            if depth > 64 {
                return Err(corrupt("btree deeper than 64 levels"));
            }
        }
        match left_subtree {
            None => Ok(None),
            Some(p) => Ok(Some(self.rightmost_leaf(p)?)),
        }
    }

    fn rightmost_leaf(&self, mut pid: u32) -> Result<u32> {
        let mut depth = 0u32;
        loop {
            let node = self.load(pid)?;
            if node.is_leaf {
                return Ok(pid);
            }
            pid = *node
                .children
                .last()
                .ok_or_else(|| corrupt(format!("internal node {} without children", pid)))?;
            depth += 1;
            if depth > 64 {
                return Err(corrupt("btree deeper than 64 levels"));
            }
        }
    }
}

fn resolve_remap(remap: &HashMap<u32, u32>, mut pid: u32) -> u32 {
    let mut hops = 0;
    while let Some(&next) = remap.get(&pid) {
        pid = next;
        hops += 1;
        if hops > remap.len() {
            break;
        }
    }
    pid
}
