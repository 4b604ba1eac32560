use std::fmt;

/// Size of a heap word in bytes.
pub const HEAP_WORD_SIZE: usize = 8;

/// Number of heap words reserved in front of every object for the
/// forwarding (indirection) word.
pub const FORWARDING_WORDS: usize = 1;

/// A raw location. May be null, garbage, or point into the middle of an
/// object; nothing about it is trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct Address(pub usize);

impl Address {
    pub const NULL: Self = Self(0);

    #[inline(always)]
    pub const fn new(raw: usize) -> Self {
        Self(raw)
    }

    #[inline(always)]
    pub const fn raw(self) -> usize {
        self.0
    }

    #[inline(always)]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    #[inline(always)]
    pub const fn offset(self, bytes: usize) -> Self {
        Self(self.0.wrapping_add(bytes))
    }

    #[inline(always)]
    pub const fn wrapping_sub(self, bytes: usize) -> Self {
        Self(self.0.wrapping_sub(bytes))
    }

    /// Location of the forwarding word belonging to an object that starts
    /// at `self`.
    #[inline(always)]
    pub const fn forwarding_slot(self) -> Self {
        self.wrapping_sub(FORWARDING_WORDS * HEAP_WORD_SIZE)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

/// A borrowed view of an object living in collector-owned memory.
///
/// Identity is the address. Two handles are the same object iff their
/// addresses are equal; no header is consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct ObjectHandle(Address);

impl ObjectHandle {
    #[inline(always)]
    pub const fn from_address(addr: Address) -> Self {
        Self(addr)
    }

    #[inline(always)]
    pub const fn from_raw(raw: usize) -> Self {
        Self(Address(raw))
    }

    #[inline(always)]
    pub const fn address(self) -> Address {
        self.0
    }
}

impl From<ObjectHandle> for Address {
    fn from(obj: ObjectHandle) -> Self {
        obj.0
    }
}

impl fmt::Display for ObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_width_hex() {
        assert_eq!(Address::new(0x1000).to_string(), "0x0000000000001000");
        assert_eq!(Address::NULL.to_string(), "0x0000000000000000");
        assert_eq!(
            ObjectHandle::from_raw(0xdead_beef).to_string(),
            "0x00000000deadbeef"
        );
    }

    #[test]
    fn test_forwarding_slot_wraps() {
        assert_eq!(Address::new(0x1008).forwarding_slot(), Address::new(0x1000));
        assert_eq!(
            Address::NULL.forwarding_slot(),
            Address::new(usize::MAX - (HEAP_WORD_SIZE - 1))
        );
    }
}
