//! engine/doctor - полная проверка целостности.
//!
//! Два прохода:
//! 1. CRC-свип всех страниц [0 .. next_page_id).
//! 2. Структурный обход от корня: типы узлов, строгое возрастание ключей
//!    в пределах границ поддерева, согласованность детей, читаемость
//!    overflow-цепочек, отсутствие повторного использования страниц.
//!    Плюс обход free-листа и sibling-цепочки листьев.
//!
//! Возвращается отсортированный список подозрительных page_id; ремонт
//! не выполняется.

use std::collections::BTreeSet;
use std::collections::HashSet;

use byteorder::{ByteOrder, LittleEndian};

use crate::consts::{NO_PAGE, PAGE_HDR_SIZE, PAGE_TYPE_FREE};
use crate::error::Result;
use crate::page::node::Descriptor;
use crate::page::{self, page_verify_checksum};
use crate::tree::TreeReader;

use super::core::Engine;

impl Engine {
    pub fn verify_integrity(&self) -> Result<Vec<u32>> {
        self.check_open()?;
        let mut bad: BTreeSet<u32> = BTreeSet::new();

        // 1) CRC-свип.
        for pid in 0..self.pager.meta.next_page_id {
            match self.pager.read_page_raw(pid) {
                Ok(pg) => {
                    if !page_verify_checksum(&pg) || page::header_read(&pg).is_err() {
                        bad.insert(pid);
                    }
                }
                Err(_) => {
                    bad.insert(pid);
                }
            }
        }

        // 2) Структурный обход.
        let mut visited: HashSet<u32> = HashSet::new();
        let reader = TreeReader::new(&self.pager);
        self.walk_subtree(
            &reader,
            self.pager.meta.root,
            None,
            None,
            &mut visited,
            &mut bad,
            0,
        );

        // Free-лист: каждая страница типа Free, без пересечений с деревом.
        let mut cur = self.pager.meta.free_head;
        let mut steps = 0u32;
        while cur != NO_PAGE && steps <= self.pager.meta.next_page_id {
            if visited.contains(&cur) {
                bad.insert(cur);
                break;
            }
            match self.pager.read_page(cur) {
                Ok(pg) => match page::header_read(&pg) {
                    Ok(h) if h.page_type == PAGE_TYPE_FREE => {
                        cur = LittleEndian::read_u32(&pg[PAGE_HDR_SIZE..PAGE_HDR_SIZE + 4]);
                    }
                    _ => {
                        bad.insert(cur);
                        break;
                    }
                },
                Err(_) => {
                    bad.insert(cur);
                    break;
                }
            }
            steps += 1;
        }

        // Sibling-цепочка листьев: возрастание ключей между соседями.
        self.walk_leaf_chain(&reader, &mut bad);

        Ok(bad.into_iter().collect())
    }

    #[allow(clippy::too_many_arguments)]
    fn walk_subtree(
        &self,
        reader: &TreeReader<'_>,
        pid: u32,
        lower: Option<&[u8]>,
        upper: Option<&[u8]>,
        visited: &mut HashSet<u32>,
        bad: &mut BTreeSet<u32>,
        depth: u32,
    ) {
        if pid == NO_PAGE || depth > 64 {
            if depth > 64 {
                bad.insert(pid);
            }
            return;
        }
        if !visited.insert(pid) {
            // Страница достижима дважды.
            bad.insert(pid);
            return;
        }
        let node = match reader.load(pid) {
            Ok(n) => n,
            Err(_) => {
                bad.insert(pid);
                return;
            }
        };

        // Ключи строго возрастают и укладываются в границы поддерева.
        for w in node.keys.windows(2) {
            if w[0].bytes >= w[1].bytes {
                bad.insert(pid);
            }
        }
        if let (Some(lo), Some(first)) = (lower, node.keys.first()) {
            if first.bytes.as_slice() < lo {
                bad.insert(pid);
            }
        }
        if let (Some(hi), Some(last)) = (upper, node.keys.last()) {
            if last.bytes.as_slice() >= hi {
                bad.insert(pid);
            }
        }

        if node.is_leaf {
            // Overflow-цепочки значений должны читаться.
            for desc in &node.vals {
                if let Descriptor::Overflow { head, total_len } = desc {
                    if reader.read_chain(*head, *total_len as usize).is_err() {
                        bad.insert(pid);
                    }
                }
            }
            return;
        }

        if node.children.len() != node.keys.len() + 1 {
            bad.insert(pid);
            return;
        }
        for i in 0..node.children.len() {
            let child_lower = if i == 0 {
                lower
            } else {
                Some(node.keys[i - 1].bytes.as_slice())
            };
            let child_upper = if i < node.keys.len() {
                Some(node.keys[i].bytes.as_slice())
            } else {
                upper
            };
            self.walk_subtree(
                reader,
                node.children[i],
                child_lower,
                child_upper,
                visited,
                bad,
                depth + 1,
            );
        }
    }

    /// Пройти по ссылкам next_leaf от самого левого листа; ключи между
    /// соседями обязаны строго возрастать.
    fn walk_leaf_chain(&self, reader: &TreeReader<'_>, bad: &mut BTreeSet<u32>) {
        // Самый левый лист.
        let mut pid = self.pager.meta.root;
        let mut depth = 0u32;
        loop {
            let node = match reader.load(pid) {
                Ok(n) => n,
                Err(_) => return,
            };
            if node.is_leaf {
                break;
            }
            match node.children.first() {
                Some(&c) => pid = c,
                None => return,
            }
            depth += 1;
            if depth > 64 {
                return;
            }
        }

        let mut last_key: Option<Vec<u8>> = None;
        let mut hops = 0u32;
        while pid != NO_PAGE {
            let node = match reader.load(pid) {
                Ok(n) => n,
                Err(_) => {
                    bad.insert(pid);
                    return;
                }
            };
            if node.page_lsn > self.pager.meta.last_lsn || !node.is_leaf {
                bad.insert(pid);
                return;
            }
            if let Some(first) = node.keys.first() {
                if let Some(prev) = &last_key {
                    if first.bytes.as_slice() <= prev.as_slice() {
                        bad.insert(pid);
                    }
                }
            }
            if let Some(last) = node.keys.last() {
                last_key = Some(last.bytes.clone());
            }
            pid = node.next_leaf;
            hops += 1;
            if hops > self.pager.meta.next_page_id {
                bad.insert(pid);
                return;
            }
        }
    }
}
