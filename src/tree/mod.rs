//! tree - упорядоченный индекс: B+tree по беззнаковому лексикографическому
//! порядку ключей.
//!
//! - txn.rs    - copy-on-write контекст транзакции (грязные страницы,
//!               freed-набор, починка sibling-ссылок).
//! - cursor.rs - курсор диапазонного скана, рестартуемый с (leaf_pid, slot).
//!
//! Мутации рекурсивны: вставка с расколом по медиане и подъёмом
//! разделителя; удаление с перетеканием от большего соседа либо слиянием;
//! схлопывание корня, когда внутренний корень остаётся с одним ребёнком.

pub mod cursor;
pub mod txn;

use crate::consts::NO_PAGE;
use crate::error::{corrupt, Result};
use crate::page::node::{Descriptor, KeyEntry, Node, SPLIT_THRESHOLD};
use crate::page::ovf;
use crate::pager::Pager;

pub use cursor::Cursor;
pub use txn::TreeTxn;

// ---------------------------------------------------------------------------
// Инициализация
// ---------------------------------------------------------------------------

/// Создать пустое дерево: один пустой корневой лист.
pub fn tree_init(txn: &mut TreeTxn<'_>) -> Result<()> {
    let root = Node::new_leaf(NO_PAGE);
    txn.root = txn.save(root)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Вставка
// ---------------------------------------------------------------------------

/// Вставить или заменить запись. Возвращает прежний дескриптор;
/// его overflow-страницы уже помечены к освобождению.
pub fn tree_insert(
    txn: &mut TreeTxn<'_>,
    key: &[u8],
    desc: Descriptor,
) -> Result<Option<Descriptor>> {
    let root = txn.root;
    let (new_root, split, old) = insert_rec(txn, root, key, desc)?;
    txn.root = new_root;

    if let Some((sep, right_pid)) = split {
        let mut new_root_node = Node::new_internal(NO_PAGE);
        new_root_node.keys.push(sep);
        new_root_node.children.push(txn.root);
        new_root_node.children.push(right_pid);
        txn.root = txn.save(new_root_node)?;
    }
    Ok(old)
}

fn insert_rec(
    txn: &mut TreeTxn<'_>,
    pid: u32,
    key: &[u8],
    desc: Descriptor,
) -> Result<(u32, Option<(KeyEntry, u32)>, Option<Descriptor>)> {
    let mut node = txn.load(pid)?;
    let pos = node.find_key_position(key);

    if node.is_leaf {
        let old = if pos < node.keys.len() && node.keys[pos].bytes.as_slice() == key {
            let prev = std::mem::replace(&mut node.vals[pos], desc);
            txn.free_descriptor(&prev)?;
            Some(prev)
        } else {
            node.insert_at(pos, KeyEntry::new(key), desc);
            None
        };

        if node.needs_split() {
            let (sep, right) = node.split();
            let right_pid = txn.save(right)?;
            node.next_leaf = right_pid;
            let left_pid = txn.save(node)?;
            return Ok((left_pid, Some((sep, right_pid)), old));
        }
        let new_pid = txn.save(node)?;
        return Ok((new_pid, None, old));
    }

    let child_idx = node.child_index(key);
    if child_idx >= node.children.len() {
        return Err(corrupt(format!("internal node {} missing child", pid)));
    }
    let child_pid = node.children[child_idx];
    let (new_child, child_split, old) = insert_rec(txn, child_pid, key, desc)?;
    node.children[child_idx] = new_child;
    if let Some((sep, right_pid)) = child_split {
        node.insert_internal(child_idx, sep, right_pid);
    }

    if node.needs_split() {
        let (sep, right) = node.split();
        let right_pid = txn.save(right)?;
        let left_pid = txn.save(node)?;
        return Ok((left_pid, Some((sep, right_pid)), old));
    }
    let new_pid = txn.save(node)?;
    Ok((new_pid, None, old))
}

// ---------------------------------------------------------------------------
// Удаление
// ---------------------------------------------------------------------------

/// Удалить запись. Возвращает прежний дескриптор (или None);
/// цепочки ключа и значения уже помечены к освобождению.
pub fn tree_remove(txn: &mut TreeTxn<'_>, key: &[u8]) -> Result<Option<Descriptor>> {
    let root = txn.root;
    let (new_root, _underflow, old) = remove_rec(txn, root, key)?;
    if old.is_none() {
        return Ok(None);
    }
    txn.root = new_root;

    // Схлопывание корня: внутренний корень с единственным ребёнком.
    loop {
        let root_node = txn.load(txn.root)?;
        if !root_node.is_leaf && root_node.keys.is_empty() && root_node.children.len() == 1 {
            let child = root_node.children[0];
            txn.discard_merged(txn.root, child, false);
            txn.root = child;
        } else {
            break;
        }
    }
    Ok(old)
}

fn remove_rec(
    txn: &mut TreeTxn<'_>,
    pid: u32,
    key: &[u8],
) -> Result<(u32, bool, Option<Descriptor>)> {
    let mut node = txn.load(pid)?;
    let pos = node.find_key_position(key);

    if node.is_leaf {
        if pos < node.keys.len() && node.keys[pos].bytes.as_slice() == key {
            let removed_key = node.keys.remove(pos);
            let removed_val = node.vals.remove(pos);
            txn.free_key(&removed_key)?;
            txn.free_descriptor(&removed_val)?;
            let underflow = node.is_underflow();
            let new_pid = txn.save(node)?;
            return Ok((new_pid, underflow, Some(removed_val)));
        }
        return Ok((pid, false, None));
    }

    let child_idx = node.child_index(key);
    if child_idx >= node.children.len() {
        return Ok((pid, false, None));
    }
    let child_pid = node.children[child_idx];
    let (new_child, child_underflow, old) = remove_rec(txn, child_pid, key)?;
    if old.is_none() {
        return Ok((pid, false, None));
    }
    node.children[child_idx] = new_child;

    if child_underflow {
        rebalance_child(txn, &mut node, child_idx)?;
    }
    let underflow = node.is_underflow();
    let new_pid = txn.save(node)?;
    Ok((new_pid, underflow, old))
}

/// Ребёнок child_idx провалился под минимум. Сначала слияние (если
/// объединённый узел помещается на страницу), иначе перетекание от
/// большего соседа, способного отдавать.
fn rebalance_child(txn: &mut TreeTxn<'_>, parent: &mut Node, child_idx: usize) -> Result<()> {
    let child = txn.load(parent.children[child_idx])?;
    let left = if child_idx > 0 {
        Some(txn.load(parent.children[child_idx - 1])?)
    } else {
        None
    };
    let right = if child_idx + 1 < parent.children.len() {
        Some(txn.load(parent.children[child_idx + 1])?)
    } else {
        None
    };

    // Слияние с левым соседом.
    if let Some(left_node) = &left {
        if merged_fits(left_node, &child, parent.keys.get(child_idx - 1)) {
            let mut merged = left_node.clone();
            let sep = parent.keys.remove(child_idx - 1);
            let absorbed_pid = child.pid;
            if merged.is_leaf {
                // Лист не забирает разделитель; его цепочка освобождается.
                txn.free_key(&sep)?;
                merged.merge_with(child, None);
            } else {
                merged.merge_with(child, Some(sep));
            }
            let is_leaf = merged.is_leaf;
            let merged_pid = txn.save(merged)?;
            txn.discard_merged(absorbed_pid, merged_pid, is_leaf);
            parent.children.remove(child_idx);
            parent.children[child_idx - 1] = merged_pid;
            return Ok(());
        }
    }

    // Слияние правого соседа в ребёнка.
    if let Some(right_node) = &right {
        if merged_fits(&child, right_node, parent.keys.get(child_idx)) {
            let mut merged = child;
            let sep = parent.keys.remove(child_idx);
            let absorbed_pid = right_node.pid;
            if merged.is_leaf {
                txn.free_key(&sep)?;
                merged.merge_with(right_node.clone(), None);
            } else {
                merged.merge_with(right_node.clone(), Some(sep));
            }
            let is_leaf = merged.is_leaf;
            let merged_pid = txn.save(merged)?;
            txn.discard_merged(absorbed_pid, merged_pid, is_leaf);
            parent.children.remove(child_idx + 1);
            parent.children[child_idx] = merged_pid;
            return Ok(());
        }
    }

    // Перетекание: выбираем большего из соседей, способных отдавать.
    let lend_left = left.as_ref().map(|n| n.can_lend()).unwrap_or(false);
    let lend_right = right.as_ref().map(|n| n.can_lend()).unwrap_or(false);
    let from_left = match (lend_left, lend_right) {
        (true, true) => {
            left.as_ref().unwrap().estimated_size() >= right.as_ref().unwrap().estimated_size()
        }
        (true, false) => true,
        (false, true) => false,
        (false, false) => return Ok(()), // отдать некому; узел остаётся недозаполненным
    };

    if from_left {
        let mut left_node = left.unwrap();
        let mut child = child;
        while child.is_underflow() && left_node.can_lend() {
            borrow_from_left(txn, parent, child_idx, &mut left_node, &mut child)?;
        }
        let left_pid = txn.save(left_node)?;
        let child_pid = txn.save(child)?;
        parent.children[child_idx - 1] = left_pid;
        parent.children[child_idx] = child_pid;
    } else {
        let mut right_node = right.unwrap();
        let mut child = child;
        while child.is_underflow() && right_node.can_lend() {
            borrow_from_right(txn, parent, child_idx, &mut child, &mut right_node)?;
        }
        let child_pid = txn.save(child)?;
        let right_pid = txn.save(right_node)?;
        parent.children[child_idx] = child_pid;
        parent.children[child_idx + 1] = right_pid;
    }
    Ok(())
}

/// Один перенос последней записи левого соседа в начало ребёнка.
fn borrow_from_left(
    txn: &mut TreeTxn<'_>,
    parent: &mut Node,
    child_idx: usize,
    left: &mut Node,
    child: &mut Node,
) -> Result<()> {
    if child.is_leaf {
        let k = left.keys.pop().ok_or_else(|| corrupt("left sibling empty"))?;
        let v = left.vals.pop().ok_or_else(|| corrupt("left sibling empty vals"))?;
        child.keys.insert(0, k);
        child.vals.insert(0, v);
        // Новый разделитель - копия нового первого ключа ребёнка;
        // цепочка старого разделителя освобождается.
        let new_sep = KeyEntry::new(&child.keys[0].bytes);
        let old_sep = std::mem::replace(&mut parent.keys[child_idx - 1], new_sep);
        txn.free_key(&old_sep)?;
    } else {
        let borrowed_key = left.keys.pop().ok_or_else(|| corrupt("left sibling empty keys"))?;
        let borrowed_child = left
            .children
            .pop()
            .ok_or_else(|| corrupt("left sibling empty children"))?;
        // Разделитель родителя спускается в ребёнка, занятый ключ
        // поднимается на его место. Цепочки перемещаются вместе с ключами.
        let sep = std::mem::replace(&mut parent.keys[child_idx - 1], borrowed_key);
        child.keys.insert(0, sep);
        child.children.insert(0, borrowed_child);
    }
    Ok(())
}

/// Один перенос первой записи правого соседа в конец ребёнка.
fn borrow_from_right(
    txn: &mut TreeTxn<'_>,
    parent: &mut Node,
    child_idx: usize,
    child: &mut Node,
    right: &mut Node,
) -> Result<()> {
    if child.is_leaf {
        if right.keys.is_empty() {
            return Err(corrupt("right sibling empty"));
        }
        let k = right.keys.remove(0);
        let v = right.vals.remove(0);
        child.keys.push(k);
        child.vals.push(v);
        let new_sep = KeyEntry::new(&right.keys.first().ok_or_else(|| corrupt("right keys exhausted"))?.bytes);
        let old_sep = std::mem::replace(&mut parent.keys[child_idx], new_sep);
        txn.free_key(&old_sep)?;
    } else {
        if right.keys.is_empty() {
            return Err(corrupt("right sibling empty keys"));
        }
        let borrowed_key = right.keys.remove(0);
        let borrowed_child = right.children.remove(0);
        let sep = std::mem::replace(&mut parent.keys[child_idx], borrowed_key);
        child.keys.push(sep);
        child.children.push(borrowed_child);
    }
    Ok(())
}

#[inline]
fn merged_fits(a: &Node, b: &Node, separator: Option<&KeyEntry>) -> bool {
    let sep_cost = if a.is_leaf {
        0
    } else {
        // Разделитель переедет в объединённый узел.
        match separator {
            Some(sep) => {
                3 + 4
                    + if sep.needs_spill() {
                        4
                    } else {
                        sep.bytes.len()
                    }
            }
            None => return false,
        }
    };
    // 6 байт - заголовок узла, который у объединённого будет один.
    a.estimated_size() + b.estimated_size() - 6 + sep_cost <= SPLIT_THRESHOLD
}

// ---------------------------------------------------------------------------
// Чтение без транзакции
// ---------------------------------------------------------------------------

/// Read-only доступ к дереву поверх Pager.
pub struct TreeReader<'a> {
    pager: &'a Pager,
}

impl<'a> TreeReader<'a> {
    pub fn new(pager: &'a Pager) -> Self {
        Self { pager }
    }

    pub fn read_chain(&self, head: u32, total_len: usize) -> Result<Vec<u8>> {
        ovf::read_chain(head, total_len, |pid| self.pager.read_page(pid))
    }

    pub fn load(&self, pid: u32) -> Result<Node> {
        let pg = self.pager.read_page(pid)?;
        Node::decode(pid, &pg, |head, len| self.read_chain(head, len))
    }

    /// Точечный поиск дескриптора.
    pub fn lookup(&self, root: u32, key: &[u8]) -> Result<Option<Descriptor>> {
        if root == NO_PAGE {
            return Ok(None);
        }
        let mut pid = root;
        let mut depth = 0u32;
        loop {
            let node = self.load(pid)?;
            if node.is_leaf {
                let pos = node.find_key_position(key);
                if pos < node.keys.len() && node.keys[pos].bytes.as_slice() == key {
                    return Ok(Some(node.vals[pos].clone()));
                }
                return Ok(None);
            }
            let idx = node.child_index(key);
            if idx >= node.children.len() {
                return Ok(None);
            }
            pid = node.children[idx];
            depth += 1;
            if depth > 64 {
                return Err(corrupt("btree deeper than 64 levels"));
            }
        }
    }

    /// Полные байты stored value по дескриптору.
    pub fn read_stored(&self, desc: &Descriptor) -> Result<Vec<u8>> {
        match desc {
            Descriptor::Inline(b) => Ok(b.clone()),
            Descriptor::Overflow { head, total_len } => {
                self.read_chain(*head, *total_len as usize)
            }
        }
    }

    /// Первые n байт stored value (флаги + expiry без чтения всей цепочки).
    pub fn read_stored_prefix(&self, desc: &Descriptor, n: usize) -> Result<Vec<u8>> {
        match desc {
            Descriptor::Inline(b) => Ok(b[..b.len().min(n)].to_vec()),
            Descriptor::Overflow { head, total_len } => {
                self.read_chain(*head, (*total_len as usize).min(n))
            }
        }
    }
}
