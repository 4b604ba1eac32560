//! Read-only view of the collector state the verifier depends on.
//!
//! The verifier never owns or mutates any of this. Implementations hand out
//! snapshots of whatever the collector currently holds, without taking locks:
//! a check must stay usable while the collector is rewriting the very state
//! being inspected.

use std::fmt;

use crate::{Address, HEAP_WORD_SIZE, ObjectHandle};

/// The two overlapping marking generations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarkGeneration {
    /// Bitmap of the last finished marking cycle.
    Complete,
    /// Bitmap the running marking cycle is filling in.
    Next,
}

impl MarkGeneration {
    pub const ALL: [MarkGeneration; 2] = [MarkGeneration::Complete, MarkGeneration::Next];

    pub const fn name(self) -> &'static str {
        match self {
            MarkGeneration::Complete => "complete",
            MarkGeneration::Next => "next",
        }
    }
}

/// Identity of a liveness ("is alive") closure. Only compared and printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct ClosureId(pub usize);

impl ClosureId {
    /// Identity of a closure object, taken from its address.
    pub fn of<T>(closure: &T) -> Self {
        Self(closure as *const T as usize)
    }
}

impl fmt::Display for ClosureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Address::new(self.0).fmt(f)
    }
}

/// Type descriptor ("klass") of an object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDescriptor {
    pub address: Address,
    pub name: String,
}

/// A heap region as seen by the verifier.
pub trait Region {
    fn index(&self) -> usize;
    fn is_active(&self) -> bool;
    fn is_humongous_start(&self) -> bool;
    fn is_humongous_continuation(&self) -> bool;
    /// One-line human readable description, no trailing newline.
    fn summary(&self) -> String;
}

/// Region-to-region remembered-set adjacency.
pub trait ConnectivityMatrix {
    fn is_connected(&self, from: usize, to: usize) -> bool;
}

pub trait ReferenceProcessor {
    /// The liveness closure currently installed, if any.
    fn active_liveness_closure(&self) -> Option<ClosureId>;
}

/// Everything the verifier may ask the heap.
///
/// Only [`HeapModel::is_in`], [`HeapModel::region_containing`],
/// [`HeapModel::in_collection_set`] and [`HeapModel::load_word`] are safe to
/// call on an unvalidated address. The remaining object queries assume the
/// caller has established that `obj` is an object inside the heap.
pub trait HeapModel {
    type Region: Region;
    type Matrix: ConnectivityMatrix;
    type RefProcessor: ReferenceProcessor;

    fn is_in(&self, addr: Address) -> bool;

    fn region_containing(&self, addr: Address) -> Option<&Self::Region>;

    /// Index of the region covering `addr`. Callers must have checked
    /// [`HeapModel::is_in`] first.
    fn region_index_containing(&self, addr: Address) -> usize;

    fn region_at(&self, index: usize) -> Option<&Self::Region>;

    fn is_marked(&self, generation: MarkGeneration, obj: ObjectHandle) -> bool;

    fn allocated_after_mark_start(&self, generation: MarkGeneration, addr: Address) -> bool;

    fn in_collection_set(&self, addr: Address) -> bool;

    fn is_full_gc_move_in_progress(&self) -> bool;

    fn connectivity_matrix(&self) -> Option<&Self::Matrix>;

    fn reference_processor(&self) -> &Self::RefProcessor;

    fn canonical_liveness_closure(&self) -> ClosureId;

    /// Liveness closure variant that resolves forwarding first.
    fn forwarded_liveness_closure(&self) -> ClosureId;

    /// Unchecked read of one heap word. Never validates `addr`.
    fn load_word(&self, addr: Address) -> usize;

    fn type_descriptor(&self, obj: ObjectHandle) -> TypeDescriptor;

    /// Object size in heap words, excluding the forwarding word.
    fn object_size_words(&self, obj: ObjectHandle) -> usize;

    fn humongous_threshold_words(&self) -> usize;

    fn region_size_bytes(&self) -> usize;

    fn required_regions(&self, bytes: usize) -> usize {
        bytes.div_ceil(self.region_size_bytes())
    }

    /// Best-effort symbolic description of an address outside the heap.
    fn describe_location(&self, _addr: Address) -> Option<String> {
        None
    }
}

/// Allocation size of `obj` in heap words, forwarding word included.
/// `None` when the reported size overflows.
pub(crate) fn allocation_words<H: HeapModel + ?Sized>(
    heap: &H,
    obj: ObjectHandle,
) -> Option<usize> {
    heap.object_size_words(obj).checked_add(crate::FORWARDING_WORDS)
}

pub(crate) fn allocation_bytes(words: usize) -> Option<usize> {
    words.checked_mul(HEAP_WORD_SIZE)
}
