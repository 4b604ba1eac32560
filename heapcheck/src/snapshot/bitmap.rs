use std::sync::atomic::{AtomicU64, Ordering};

use crate::{Address, HEAP_WORD_SIZE};

/// One mark bit per heap word.
#[derive(Debug)]
pub struct MarkBitmap {
    base: usize,
    words: usize,
    bits: Box<[AtomicU64]>,
}

impl MarkBitmap {
    pub fn new(base: Address, heap_size: usize) -> Self {
        let words = heap_size / HEAP_WORD_SIZE;
        let mut bits = Vec::new();
        bits.resize_with(words.div_ceil(64), || AtomicU64::new(0));
        Self {
            base: base.raw(),
            words,
            bits: bits.into_boxed_slice(),
        }
    }

    #[inline]
    fn bit_index(&self, addr: Address) -> Option<usize> {
        let offset = addr.raw().checked_sub(self.base)?;
        let index = offset / HEAP_WORD_SIZE;
        (index < self.words).then_some(index)
    }

    /// Sets the bit for `addr`. Returns `true` if it was previously clear.
    pub fn mark(&self, addr: Address) -> bool {
        let Some(index) = self.bit_index(addr) else {
            return false;
        };
        let mask = 1u64 << (index % 64);
        self.bits[index / 64].fetch_or(mask, Ordering::Relaxed) & mask == 0
    }

    pub fn is_marked(&self, addr: Address) -> bool {
        self.bit_index(addr).is_some_and(|index| {
            self.bits[index / 64].load(Ordering::Relaxed) & (1u64 << (index % 64)) != 0
        })
    }

    pub fn clear(&self) {
        for word in self.bits.iter() {
            word.store(0, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_and_clear() {
        let bitmap = MarkBitmap::new(Address::new(0x1000), 0x1000);
        let addr = Address::new(0x1010);

        assert!(!bitmap.is_marked(addr));
        assert!(bitmap.mark(addr));
        assert!(!bitmap.mark(addr));
        assert!(bitmap.is_marked(addr));
        assert!(!bitmap.is_marked(Address::new(0x1018)));

        bitmap.clear();
        assert!(!bitmap.is_marked(addr));
    }

    #[test]
    fn test_out_of_range_is_unmarked() {
        let bitmap = MarkBitmap::new(Address::new(0x1000), 0x1000);
        assert!(!bitmap.mark(Address::new(0x10)));
        assert!(!bitmap.is_marked(Address::new(0x10)));
        assert!(!bitmap.is_marked(Address::new(0x2000)));
    }
}
