//! Raw access to forwarding (indirection) words.
//!
//! Every object is preceded by one word holding the address of its current
//! copy. A word pointing back at the object means "not relocated".

use crate::{HeapModel, ObjectHandle};

/// Reads the forwarding word of `obj` without any validation.
///
/// Does not consult heap membership or region state. The result may be
/// garbage; validating it is the caller's job.
#[inline]
pub fn resolve_raw<H: HeapModel + ?Sized>(heap: &H, obj: ObjectHandle) -> ObjectHandle {
    let word = heap.load_word(obj.address().forwarding_slot());
    ObjectHandle::from_raw(word)
}

/// Forwarding state of one object, derived on demand from its word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Forwarding {
    SelfReferencing,
    ForwardedTo(ObjectHandle),
}

impl Forwarding {
    pub fn of<H: HeapModel + ?Sized>(heap: &H, obj: ObjectHandle) -> Self {
        let fwd = resolve_raw(heap, obj);
        if fwd == obj {
            Forwarding::SelfReferencing
        } else {
            Forwarding::ForwardedTo(fwd)
        }
    }

    #[inline]
    pub fn is_forwarded(self) -> bool {
        matches!(self, Forwarding::ForwardedTo(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Address, HeapCreateInfo, SnapshotHeap};

    #[test]
    fn test_fresh_object_is_self_referencing() {
        let heap = SnapshotHeap::new(HeapCreateInfo::default());
        let obj = heap.allocate(0, 4, "Pair");

        assert_eq!(resolve_raw(&heap, obj), obj);
        assert_eq!(Forwarding::of(&heap, obj), Forwarding::SelfReferencing);
    }

    #[test]
    fn test_evacuated_object_points_to_copy() {
        let heap = SnapshotHeap::new(HeapCreateInfo::default());
        let obj = heap.allocate(0, 4, "Pair");
        let copy = heap.evacuate(obj, 3);

        let state = Forwarding::of(&heap, obj);
        assert!(state.is_forwarded());
        assert_eq!(state, Forwarding::ForwardedTo(copy));
        assert_eq!(Forwarding::of(&heap, copy), Forwarding::SelfReferencing);
    }

    #[test]
    fn test_garbage_handle_reads_zeroed_memory() {
        let heap = SnapshotHeap::new(HeapCreateInfo::default());
        let garbage = ObjectHandle::from_address(Address::new(0x42));

        assert_eq!(resolve_raw(&heap, garbage).address(), Address::NULL);
    }
}
