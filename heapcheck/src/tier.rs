use std::fmt;

/// How much of the object graph has been validated and may be dereferenced.
///
/// Tiers only ever increase while a check runs. Every rendering step asks
/// for the tier that validated the data it is about to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SafetyTier {
    /// Nothing is known. Only the address and heap-range tests are safe.
    Unknown,
    /// The object is in the heap; its header and metadata can be read.
    ObjectSafe,
    /// The object and its forwardee can both be read.
    ObjectAndForwardeeSafe,
    /// Everything reachable from the object, regions included, is sane.
    AllSafe,
}

impl SafetyTier {
    /// Grants a dereference capability if `self` covers `required`.
    ///
    /// Tiers below [`SafetyTier::ObjectSafe`] never grant one: at those
    /// tiers nothing may be read through the object.
    #[inline]
    pub fn permits(self, required: SafetyTier) -> Option<DerefToken> {
        if required >= SafetyTier::ObjectSafe && self >= required {
            Some(DerefToken { _private: () })
        } else {
            None
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            SafetyTier::Unknown => "unknown",
            SafetyTier::ObjectSafe => "object-safe",
            SafetyTier::ObjectAndForwardeeSafe => "object-and-forwardee-safe",
            SafetyTier::AllSafe => "all-safe",
        }
    }
}

impl fmt::Display for SafetyTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Proof that an object's header, type descriptor and mark state may be read.
///
/// Only [`SafetyTier::permits`] creates one.
#[derive(Debug, Clone, Copy)]
pub struct DerefToken {
    _private: (),
}
