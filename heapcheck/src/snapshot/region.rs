use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use bitflags::bitflags;

use crate::{Address, MarkGeneration, Region};

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct RegionFlags: u8 {
        const ACTIVE = 1 << 0;
        const HUMONGOUS_START = 1 << 1;
        const HUMONGOUS_CONTINUATION = 1 << 2;
        const COLLECTION_SET = 1 << 3;
    }
}

/// Metadata for one fixed-size region.
#[derive(Debug)]
pub struct RegionMeta {
    index: usize,
    bottom: Address,
    end: Address,
    /// Bump pointer, next free byte.
    top: AtomicUsize,
    flags: AtomicU8,
    /// Top at mark start, one per marking generation.
    tams: [AtomicUsize; 2],
}

impl RegionMeta {
    pub fn new(index: usize, bottom: Address, size: usize) -> Self {
        Self {
            index,
            bottom,
            end: bottom.offset(size),
            top: AtomicUsize::new(bottom.raw()),
            flags: AtomicU8::new(0),
            tams: [
                AtomicUsize::new(bottom.raw()),
                AtomicUsize::new(bottom.raw()),
            ],
        }
    }

    #[inline]
    pub fn bottom(&self) -> Address {
        self.bottom
    }

    #[inline]
    pub fn top(&self) -> Address {
        Address::new(self.top.load(Ordering::Relaxed))
    }

    pub fn set_top(&self, top: Address) {
        debug_assert!(top >= self.bottom && top <= self.end);
        self.top.store(top.raw(), Ordering::Relaxed);
    }

    /// Bump allocates `bytes`, returning the old top, or `None` if the
    /// region cannot fit them.
    pub fn bump(&self, bytes: usize) -> Option<Address> {
        let end = self.end.raw();
        self.top
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |top| {
                top.checked_add(bytes).filter(|&new_top| new_top <= end)
            })
            .ok()
            .map(Address::new)
    }

    /// Nothing has ever been allocated here.
    pub fn is_pristine(&self) -> bool {
        self.flags().is_empty() && self.top() == self.bottom
    }

    #[inline]
    pub fn flags(&self) -> RegionFlags {
        RegionFlags::from_bits_truncate(self.flags.load(Ordering::Relaxed))
    }

    pub fn set_flags(&self, flags: RegionFlags) {
        self.flags.store(flags.bits(), Ordering::Relaxed);
    }

    pub fn add_flags(&self, flags: RegionFlags) {
        self.flags.fetch_or(flags.bits(), Ordering::Relaxed);
    }

    pub fn remove_flags(&self, flags: RegionFlags) {
        self.flags.fetch_and(!flags.bits(), Ordering::Relaxed);
    }

    pub fn in_collection_set(&self) -> bool {
        self.flags().contains(RegionFlags::COLLECTION_SET)
    }

    pub fn top_at_mark_start(&self, generation: MarkGeneration) -> Address {
        Address::new(self.tams[slot(generation)].load(Ordering::Relaxed))
    }

    pub fn set_top_at_mark_start(&self, generation: MarkGeneration, tams: Address) {
        self.tams[slot(generation)].store(tams.raw(), Ordering::Relaxed);
    }

    fn state_code(&self) -> &'static str {
        let flags = self.flags();
        if flags.contains(RegionFlags::HUMONGOUS_START) {
            "HS"
        } else if flags.contains(RegionFlags::HUMONGOUS_CONTINUATION) {
            "HC"
        } else if flags.contains(RegionFlags::ACTIVE) {
            "R"
        } else {
            "E"
        }
    }
}

#[inline]
pub(super) fn slot(generation: MarkGeneration) -> usize {
    match generation {
        MarkGeneration::Complete => 0,
        MarkGeneration::Next => 1,
    }
}

impl Region for RegionMeta {
    fn index(&self) -> usize {
        self.index
    }

    fn is_active(&self) -> bool {
        self.flags().contains(RegionFlags::ACTIVE)
    }

    fn is_humongous_start(&self) -> bool {
        self.flags().contains(RegionFlags::HUMONGOUS_START)
    }

    fn is_humongous_continuation(&self) -> bool {
        self.flags().contains(RegionFlags::HUMONGOUS_CONTINUATION)
    }

    fn summary(&self) -> String {
        format!(
            "|{:5}|{:<2}|{}|BTE {}, {}, {}|TAMS {}, {}|",
            self.index,
            self.state_code(),
            if self.in_collection_set() { "CS" } else { "  " },
            self.bottom,
            self.top(),
            self.end,
            self.top_at_mark_start(MarkGeneration::Complete),
            self.top_at_mark_start(MarkGeneration::Next),
        )
    }
}
