//! tree/cursor - курсор восходящего обхода листьев.
//!
//! Позиция курсора - пара (leaf_pid, slot); с неё обход рестартуем.
//! Переход между листьями идёт по right-sibling ссылке; внутри одного
//! вызова движка дерево не мутирует, так что ссылки стабильны.

use crate::consts::NO_PAGE;
use crate::error::{corrupt, Result};
use crate::page::node::{Descriptor, Node};

use super::TreeReader;

#[derive(Debug, Clone, Copy)]
pub struct Cursor {
    pub leaf_pid: u32,
    pub slot: usize,
}

impl Cursor {
    /// Позиционировать на первый ключ >= start в дереве с данным корнем.
    /// None, если таких ключей нет.
    pub fn seek(reader: &TreeReader<'_>, root: u32, start: &[u8]) -> Result<Option<Cursor>> {
        if root == NO_PAGE {
            return Ok(None);
        }
        let mut pid = root;
        let mut depth = 0u32;
        let leaf = loop {
            let node = reader.load(pid)?;
            if node.is_leaf {
                break node;
            }
            let idx = node.child_index(start);
            if idx >= node.children.len() {
                return Err(corrupt(format!("internal node {} missing child", pid)));
            }
            pid = node.children[idx];
            depth += 1;
            if depth > 64 {
                return Err(corrupt("btree deeper than 64 levels"));
            }
        };

        let slot = leaf.find_key_position(start);
        let cur = Cursor {
            leaf_pid: pid,
            slot,
        };
        // Хвост листа: перейти к первому непустому правому соседу.
        cur.normalize(reader, leaf)
    }

    /// Съехать на следующий слот.
    pub fn advance(self, reader: &TreeReader<'_>) -> Result<Option<Cursor>> {
        let leaf = self.leaf(reader)?;
        let next = Cursor {
            leaf_pid: self.leaf_pid,
            slot: self.slot + 1,
        };
        next.normalize(reader, leaf)
    }

    /// Текущая запись (ключ, дескриптор).
    pub fn entry(&self, reader: &TreeReader<'_>) -> Result<(Vec<u8>, Descriptor)> {
        let leaf = self.leaf(reader)?;
        if self.slot >= leaf.keys.len() {
            return Err(corrupt(format!(
                "cursor slot {} out of range in leaf {}",
                self.slot, self.leaf_pid
            )));
        }
        Ok((
            leaf.keys[self.slot].bytes.clone(),
            leaf.vals[self.slot].clone(),
        ))
    }

    fn leaf(&self, reader: &TreeReader<'_>) -> Result<Node> {
        let node = reader.load(self.leaf_pid)?;
        if !node.is_leaf {
            return Err(corrupt(format!("cursor page {} is not a leaf", self.leaf_pid)));
        }
        Ok(node)
    }

    /// Если slot за пределами листа - идти по sibling-ссылкам до первого
    /// непустого листа; None, когда листья кончились.
    fn normalize(mut self, reader: &TreeReader<'_>, mut leaf: Node) -> Result<Option<Cursor>> {
        let mut hops = 0u32;
        while self.slot >= leaf.keys.len() {
            if leaf.next_leaf == NO_PAGE {
                return Ok(None);
            }
            self.leaf_pid = leaf.next_leaf;
            self.slot = 0;
            leaf = self.leaf(reader)?;
            hops += 1;
            if hops > 1 << 24 {
                return Err(corrupt("leaf sibling cycle"));
            }
        }
        Ok(Some(self))
    }
}
