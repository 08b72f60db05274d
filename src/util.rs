//! Утилиты (время, диапазоны ключей).

use std::time::{SystemTime, UNIX_EPOCH};

/// Текущее wall-clock время в миллисекундах с эпохи.
/// TTL сравнивается с ним на чтении; точность ограничена системными часами,
/// и TTL не является механизмом безопасности.
#[inline]
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Верхняя граница диапазона для префиксного скана: ближайший ключ,
/// строго больший любого ключа с данным префиксом. None, если префикс
/// состоит из 0xFF (диапазон не ограничен сверху).
pub fn prefix_upper_bound(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.last_mut() {
        if *last < 0xFF {
            *last += 1;
            return Some(end);
        }
        end.pop();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_bound_basic() {
        assert_eq!(prefix_upper_bound(b"abc"), Some(b"abd".to_vec()));
        assert_eq!(prefix_upper_bound(b"a\xff"), Some(b"b".to_vec()));
        assert_eq!(prefix_upper_bound(b"\xff\xff"), None);
    }
}
