//! engine/scan - упорядоченные сканы диапазона и префикса.
//!
//! scan_range: [lo, hi) по возрастанию ключей, до limit живых записей.
//! Истёкшие записи пропускаются и ставятся в очередь ленивого удаления.

use crate::codec::Decoded;
use crate::error::Result;
use crate::tree::{Cursor, TreeReader};
use crate::util::{now_ms, prefix_upper_bound};

use super::core::Engine;

impl Engine {
    /// Скан [lo, hi_exclusive): hi = None - без верхней границы.
    pub fn scan_range(
        &mut self,
        lo: &[u8],
        hi: Option<&[u8]>,
        limit: usize,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.check_open()?;
        if limit == 0 {
            return Ok(Vec::new());
        }
        if let Some(hi) = hi {
            if hi <= lo {
                return Ok(Vec::new());
            }
        }

        let now = now_ms();
        let mut out: Vec<(Vec<u8>, Vec<u8>)> = Vec::new();
        let mut expired: Vec<Vec<u8>> = Vec::new();
        {
            let reader = TreeReader::new(&self.pager);
            let mut cur = Cursor::seek(&reader, self.pager.meta.root, lo)?;
            while let Some(c) = cur {
                let (key, desc) = c.entry(&reader)?;
                if let Some(hi) = hi {
                    if key.as_slice() >= hi {
                        break;
                    }
                }
                let stored = reader.read_stored(&desc)?;
                match self.codec.decode(&stored, now)? {
                    Decoded::Live(v) => {
                        out.push((key, v));
                        if out.len() >= limit {
                            break;
                        }
                    }
                    Decoded::Expired => expired.push(key),
                }
                cur = c.advance(&reader)?;
            }
        }
        self.expired_queue.extend(expired);
        Ok(out)
    }

    /// Скан по префиксу ключа.
    pub fn scan_prefix(&mut self, prefix: &[u8], limit: usize) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let hi = prefix_upper_bound(prefix);
        self.scan_range(prefix, hi.as_deref(), limit)
    }
}
