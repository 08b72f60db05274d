//! page/node - кодек узлов B+tree и операции над узлами в памяти.
//!
//! Leaf payload (LE):
//! [item_count u16][next_leaf u32]
//! ячейки: [klen u16][cflags u8][key | key_head u32][vlen u16 + bytes | head u32 + total u32]
//!
//! Internal payload (LE):
//! [item_count u16][rightmost_child u32]
//! ячейки: [klen u16][cflags u8][key | key_head u32][child u32]
//!
//! cflags: bit0 - ключ вынесен в overflow-цепочку (в ячейке только head,
//! длина цепочки равна klen); bit1 - значение в overflow-цепочке.
//! children[i] - левый ребёнок keys[i]; последний ребёнок - rightmost.
//!
//! Узел декодируется в полностью материализованный вид: вынесенные ключи
//! читаются из цепочек при загрузке, так что сравнение и поиск работают
//! по полным байтам ключей.

use byteorder::{ByteOrder, LittleEndian};

use crate::consts::{
    KEY_SPILL_THRESHOLD, NO_PAGE, PAGE_DATA_SIZE, PAGE_HDR_SIZE, PAGE_SIZE, PAGE_TYPE_INTERNAL,
    PAGE_TYPE_LEAF,
};
use crate::error::{corrupt, Result};
use crate::page::{self, page_update_checksum, PageHeader};

const CELL_KEY_SPILL: u8 = 0x1;
const CELL_VAL_OVF: u8 = 0x2;

const NODE_HDR: usize = 6; // item_count u16 + next_leaf/rightmost u32

/// Порог раскола: узел, чья сериализация превышает порог, делится по медиане.
pub const SPLIT_THRESHOLD: usize = PAGE_DATA_SIZE - 64;
/// Минимальное заполнение (~25% области данных); ниже - слияние/перетекание.
pub const MIN_FILL: usize = PAGE_DATA_SIZE / 4;

/// Ключ ячейки: полные байты плюс (для вынесенных) голова существующей
/// цепочки. spill = None у свежих длинных ключей; цепочку выделит save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyEntry {
    pub bytes: Vec<u8>,
    pub spill: Option<u32>,
}

impl KeyEntry {
    pub fn new(bytes: &[u8]) -> Self {
        Self {
            bytes: bytes.to_vec(),
            spill: None,
        }
    }

    #[inline]
    pub fn needs_spill(&self) -> bool {
        self.bytes.len() > KEY_SPILL_THRESHOLD
    }

    #[inline]
    fn encoded_len(&self) -> usize {
        2 + 1 + if self.needs_spill() { 4 } else { self.bytes.len() }
    }
}

/// Дескриптор значения в листе.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Descriptor {
    Inline(Vec<u8>),
    Overflow { head: u32, total_len: u32 },
}

impl Descriptor {
    #[inline]
    fn encoded_len(&self) -> usize {
        match self {
            Descriptor::Inline(b) => 2 + b.len(),
            Descriptor::Overflow { .. } => 8,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub pid: u32,
    pub is_leaf: bool,
    pub keys: Vec<KeyEntry>,
    pub vals: Vec<Descriptor>, // только для листа
    pub children: Vec<u32>,    // только для внутреннего, len = keys + 1
    pub next_leaf: u32,        // только для листа
    /// page_lsn, с которым узел был прочитан (для in-place патча соседа).
    pub page_lsn: u64,
}

impl Node {
    pub fn new_leaf(pid: u32) -> Self {
        Node {
            pid,
            is_leaf: true,
            keys: Vec::new(),
            vals: Vec::new(),
            children: Vec::new(),
            next_leaf: NO_PAGE,
            page_lsn: 0,
        }
    }

    pub fn new_internal(pid: u32) -> Self {
        Node {
            pid,
            is_leaf: false,
            keys: Vec::new(),
            vals: Vec::new(),
            children: Vec::new(),
            next_leaf: NO_PAGE,
            page_lsn: 0,
        }
    }

    /// Раскодировать узел; resolve_key читает цепочку вынесенного ключа.
    pub fn decode<R>(pid: u32, pg: &[u8], mut resolve_key: R) -> Result<Node>
    where
        R: FnMut(u32, usize) -> Result<Vec<u8>>,
    {
        let h = page::header_read(pg)?;
        let is_leaf = match h.page_type {
            PAGE_TYPE_LEAF => true,
            PAGE_TYPE_INTERNAL => false,
            t => return Err(corrupt(format!("page {} is not a btree node (type {})", pid, t))),
        };
        let payload = &pg[PAGE_HDR_SIZE..PAGE_HDR_SIZE + h.payload_len as usize];
        if payload.len() < NODE_HDR {
            return Err(corrupt(format!("node {} payload too short", pid)));
        }
        let item_count = LittleEndian::read_u16(&payload[0..2]) as usize;
        let link = LittleEndian::read_u32(&payload[2..6]);

        let mut node = if is_leaf {
            let mut n = Node::new_leaf(pid);
            n.next_leaf = link;
            n.keys.reserve(item_count);
            n.vals.reserve(item_count);
            n
        } else {
            let mut n = Node::new_internal(pid);
            n.keys.reserve(item_count);
            n.children.reserve(item_count + 1);
            n
        };
        node.page_lsn = h.lsn;

        let mut off = NODE_HDR;
        for _ in 0..item_count {
            if off + 3 > payload.len() {
                return Err(corrupt(format!("node {} cell header truncated", pid)));
            }
            let klen = LittleEndian::read_u16(&payload[off..off + 2]) as usize;
            let cflags = payload[off + 2];
            off += 3;

            let key = if cflags & CELL_KEY_SPILL != 0 {
                if off + 4 > payload.len() {
                    return Err(corrupt(format!("node {} spilled key truncated", pid)));
                }
                let head = LittleEndian::read_u32(&payload[off..off + 4]);
                off += 4;
                let bytes = resolve_key(head, klen)?;
                KeyEntry {
                    bytes,
                    spill: Some(head),
                }
            } else {
                if off + klen > payload.len() {
                    return Err(corrupt(format!("node {} key truncated", pid)));
                }
                let bytes = payload[off..off + klen].to_vec();
                off += klen;
                KeyEntry { bytes, spill: None }
            };

            if is_leaf {
                let desc = if cflags & CELL_VAL_OVF != 0 {
                    if off + 8 > payload.len() {
                        return Err(corrupt(format!("node {} ovf descriptor truncated", pid)));
                    }
                    let head = LittleEndian::read_u32(&payload[off..off + 4]);
                    let total_len = LittleEndian::read_u32(&payload[off + 4..off + 8]);
                    off += 8;
                    Descriptor::Overflow { head, total_len }
                } else {
                    if off + 2 > payload.len() {
                        return Err(corrupt(format!("node {} inline len truncated", pid)));
                    }
                    let vlen = LittleEndian::read_u16(&payload[off..off + 2]) as usize;
                    off += 2;
                    if off + vlen > payload.len() {
                        return Err(corrupt(format!("node {} inline value truncated", pid)));
                    }
                    let bytes = payload[off..off + vlen].to_vec();
                    off += vlen;
                    Descriptor::Inline(bytes)
                };
                node.keys.push(key);
                node.vals.push(desc);
            } else {
                if off + 4 > payload.len() {
                    return Err(corrupt(format!("node {} child pointer truncated", pid)));
                }
                let child = LittleEndian::read_u32(&payload[off..off + 4]);
                off += 4;
                node.keys.push(key);
                node.children.push(child);
            }
        }

        if !is_leaf {
            // rightmost ребёнок лежит в поле link заголовка узла.
            node.children.push(link);
            if node.children.len() != node.keys.len() + 1 {
                return Err(corrupt(format!("node {} children/keys mismatch", pid)));
            }
        }
        Ok(node)
    }

    /// Закодировать узел в полную страницу с crc. Все вынесенные ключи
    /// обязаны уже иметь spill-ссылку (этим занимается TreeTxn::save).
    pub fn encode(&self, lsn: u64) -> Result<Vec<u8>> {
        let page_type = if self.is_leaf {
            PAGE_TYPE_LEAF
        } else {
            PAGE_TYPE_INTERNAL
        };
        let mut pg = vec![0u8; PAGE_SIZE];
        let payload_need = self.estimated_size();
        if payload_need > PAGE_DATA_SIZE {
            return Err(corrupt(format!(
                "node {} does not fit a page ({} bytes)",
                self.pid, payload_need
            )));
        }

        {
            let payload = &mut pg[PAGE_HDR_SIZE..];
            LittleEndian::write_u16(&mut payload[0..2], self.keys.len() as u16);
            let link = if self.is_leaf {
                self.next_leaf
            } else {
                *self.children.last().unwrap_or(&NO_PAGE)
            };
            LittleEndian::write_u32(&mut payload[2..6], link);

            let mut off = NODE_HDR;
            for i in 0..self.keys.len() {
                let key = &self.keys[i];
                let mut cflags = 0u8;
                if key.needs_spill() {
                    cflags |= CELL_KEY_SPILL;
                }
                if self.is_leaf {
                    if matches!(self.vals[i], Descriptor::Overflow { .. }) {
                        cflags |= CELL_VAL_OVF;
                    }
                }
                LittleEndian::write_u16(&mut payload[off..off + 2], key.bytes.len() as u16);
                payload[off + 2] = cflags;
                off += 3;

                if key.needs_spill() {
                    let head = key.spill.ok_or_else(|| {
                        corrupt(format!("node {}: spilled key without chain", self.pid))
                    })?;
                    LittleEndian::write_u32(&mut payload[off..off + 4], head);
                    off += 4;
                } else {
                    payload[off..off + key.bytes.len()].copy_from_slice(&key.bytes);
                    off += key.bytes.len();
                }

                if self.is_leaf {
                    match &self.vals[i] {
                        Descriptor::Inline(b) => {
                            LittleEndian::write_u16(&mut payload[off..off + 2], b.len() as u16);
                            off += 2;
                            payload[off..off + b.len()].copy_from_slice(b);
                            off += b.len();
                        }
                        Descriptor::Overflow { head, total_len } => {
                            LittleEndian::write_u32(&mut payload[off..off + 4], *head);
                            LittleEndian::write_u32(&mut payload[off + 4..off + 8], *total_len);
                            off += 8;
                        }
                    }
                } else {
                    LittleEndian::write_u32(&mut payload[off..off + 4], self.children[i]);
                    off += 4;
                }
            }
            debug_assert_eq!(off, payload_need);
        }

        page::header_write(
            &mut pg,
            &PageHeader {
                page_type,
                payload_len: payload_need as u16,
                lsn,
            },
        );
        page_update_checksum(&mut pg);
        Ok(pg)
    }

    /// Позиция ключа: индекс первой записи с keys[i] >= key.
    pub fn find_key_position(&self, key: &[u8]) -> usize {
        self.keys
            .binary_search_by(|e| e.bytes.as_slice().cmp(key))
            .unwrap_or_else(|i| i)
    }

    /// Индекс ребёнка для спуска: при точном совпадении с разделителем
    /// идём вправо (ключи >= разделителя лежат в правом поддереве).
    pub fn child_index(&self, key: &[u8]) -> usize {
        let pos = self.find_key_position(key);
        if pos < self.keys.len() && self.keys[pos].bytes.as_slice() == key {
            pos + 1
        } else {
            pos
        }
    }

    pub fn insert_at(&mut self, pos: usize, key: KeyEntry, val: Descriptor) {
        self.keys.insert(pos, key);
        self.vals.insert(pos, val);
    }

    pub fn insert_internal(&mut self, pos: usize, key: KeyEntry, right_child: u32) {
        self.keys.insert(pos, key);
        self.children.insert(pos + 1, right_child);
    }

    /// Сериализованный размер payload (включая заголовок узла).
    pub fn estimated_size(&self) -> usize {
        let cells: usize = if self.is_leaf {
            self.keys
                .iter()
                .zip(&self.vals)
                .map(|(k, v)| k.encoded_len() + v.encoded_len())
                .sum()
        } else {
            self.keys.iter().map(|k| k.encoded_len() + 4).sum()
        };
        NODE_HDR + cells
    }

    pub fn needs_split(&self) -> bool {
        self.estimated_size() > SPLIT_THRESHOLD
    }

    pub fn is_underflow(&self) -> bool {
        self.estimated_size() < MIN_FILL
    }

    /// Может отдать запись, не провалившись под минимум.
    pub fn can_lend(&self) -> bool {
        self.keys.len() > 1 && self.estimated_size() > MIN_FILL
    }

    /// Раскол по медиане. Возвращает (разделитель для родителя, правый узел).
    /// Лист: разделитель - копия первого правого ключа; ключи остаются в
    /// листьях. Внутренний: медианный ключ поднимается (перемещается).
    pub fn split(&mut self) -> (KeyEntry, Node) {
        let mid = self.keys.len() / 2;
        if self.is_leaf {
            let mut right = Node::new_leaf(NO_PAGE);
            right.keys = self.keys.split_off(mid);
            right.vals = self.vals.split_off(mid);
            right.next_leaf = self.next_leaf;
            // Копия байтов без spill: при необходимости save выделит
            // разделителю собственную цепочку.
            let separator = KeyEntry::new(&right.keys[0].bytes);
            (separator, right)
        } else {
            let separator = self.keys.remove(mid);
            let mut right = Node::new_internal(NO_PAGE);
            right.keys = self.keys.split_off(mid);
            right.children = self.children.split_off(mid + 1);
            (separator, right)
        }
    }

    /// Влить правый узел в этот. separator нужен только внутренним узлам;
    /// для листа цепочку разделителя освобождает вызывающий код.
    pub fn merge_with(&mut self, right: Node, separator: Option<KeyEntry>) {
        if self.is_leaf {
            self.keys.extend(right.keys);
            self.vals.extend(right.vals);
            self.next_leaf = right.next_leaf;
        } else {
            self.keys
                .push(separator.expect("internal merge requires separator"));
            self.keys.extend(right.keys);
            self.children.extend(right.children);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_spill(_head: u32, _len: usize) -> Result<Vec<u8>> {
        Err(corrupt("no spilled keys expected"))
    }

    #[test]
    fn leaf_roundtrip() {
        let mut n = Node::new_leaf(5);
        n.next_leaf = 9;
        n.page_lsn = 3;
        n.keys.push(KeyEntry::new(b"alpha"));
        n.vals.push(Descriptor::Inline(b"1".to_vec()));
        n.keys.push(KeyEntry::new(b"beta"));
        n.vals.push(Descriptor::Overflow {
            head: 77,
            total_len: 10_000,
        });

        let pg = n.encode(3).unwrap();
        let back = Node::decode(5, &pg, no_spill).unwrap();
        assert!(back.is_leaf);
        assert_eq!(back.next_leaf, 9);
        assert_eq!(back.page_lsn, 3);
        assert_eq!(back.keys.len(), 2);
        assert_eq!(back.keys[0].bytes, b"alpha");
        assert_eq!(back.vals[0], Descriptor::Inline(b"1".to_vec()));
        assert_eq!(
            back.vals[1],
            Descriptor::Overflow {
                head: 77,
                total_len: 10_000
            }
        );
    }

    #[test]
    fn internal_roundtrip() {
        let mut n = Node::new_internal(6);
        n.keys.push(KeyEntry::new(b"m"));
        n.children = vec![10, 11];

        let pg = n.encode(1).unwrap();
        let back = Node::decode(6, &pg, no_spill).unwrap();
        assert!(!back.is_leaf);
        assert_eq!(back.keys[0].bytes, b"m");
        assert_eq!(back.children, vec![10, 11]);
    }

    #[test]
    fn spilled_key_roundtrip() {
        let long_key = vec![b'k'; KEY_SPILL_THRESHOLD + 100];
        let mut n = Node::new_leaf(7);
        n.keys.push(KeyEntry {
            bytes: long_key.clone(),
            spill: Some(33),
        });
        n.vals.push(Descriptor::Inline(b"v".to_vec()));

        let pg = n.encode(2).unwrap();
        let resolved = Node::decode(7, &pg, |head, len| {
            assert_eq!(head, 33);
            assert_eq!(len, long_key.len());
            Ok(long_key.clone())
        })
        .unwrap();
        assert_eq!(resolved.keys[0].bytes, long_key);
        assert_eq!(resolved.keys[0].spill, Some(33));
    }

    #[test]
    fn spilled_key_without_chain_is_error() {
        let mut n = Node::new_leaf(8);
        n.keys.push(KeyEntry::new(&vec![b'x'; KEY_SPILL_THRESHOLD + 1]));
        n.vals.push(Descriptor::Inline(Vec::new()));
        assert!(n.encode(1).is_err());
    }

    #[test]
    fn split_leaf_keeps_order_and_links() {
        let mut n = Node::new_leaf(1);
        n.next_leaf = 44;
        for i in 0..10u8 {
            n.keys.push(KeyEntry::new(&[b'a' + i]));
            n.vals.push(Descriptor::Inline(vec![i]));
        }
        let (sep, right) = n.split();
        assert_eq!(sep.bytes, right.keys[0].bytes);
        assert_eq!(n.keys.len() + right.keys.len(), 10);
        assert_eq!(right.next_leaf, 44);
        assert!(n.keys.last().unwrap().bytes < right.keys[0].bytes);
    }

    #[test]
    fn split_internal_moves_median_up() {
        let mut n = Node::new_internal(1);
        for i in 0..5u8 {
            n.keys.push(KeyEntry::new(&[b'a' + i]));
        }
        n.children = vec![10, 11, 12, 13, 14, 15];
        let (sep, right) = n.split();
        assert_eq!(sep.bytes, b"c");
        assert_eq!(n.keys.len(), 2);
        assert_eq!(right.keys.len(), 2);
        assert_eq!(n.children.len(), 3);
        assert_eq!(right.children.len(), 3);
    }

    #[test]
    fn find_position_and_child_index() {
        let mut n = Node::new_internal(1);
        n.keys.push(KeyEntry::new(b"c"));
        n.keys.push(KeyEntry::new(b"f"));
        n.children = vec![1, 2, 3];
        assert_eq!(n.child_index(b"a"), 0);
        assert_eq!(n.child_index(b"c"), 1); // равный разделителю уходит вправо
        assert_eq!(n.child_index(b"d"), 1);
        assert_eq!(n.child_index(b"z"), 2);
    }
}
