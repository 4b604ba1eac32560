//! Invariant verification for a concurrent, region-based, evacuating
//! collector that relocates objects through per-object forwarding words.
//!
//! The entry point is [`Verifier`]. It reads whatever collector state a
//! [`HeapModel`] exposes, checks forwarding, region residency, mark state,
//! collection-set membership and reference-processor wiring, and on a
//! violation builds a [`Report`] whose precision is limited by the
//! [`SafetyTier`] established so far.

mod address;
mod checker;
pub mod forwarding;
mod model;
pub mod report;
pub mod scenario;
pub mod snapshot;
mod tier;
mod violation;

pub use address::{Address, FORWARDING_WORDS, HEAP_WORD_SIZE, ObjectHandle};
pub use checker::Verifier;
pub use forwarding::{Forwarding, resolve_raw};
pub use model::{
    ClosureId, ConnectivityMatrix, HeapModel, MarkGeneration, ReferenceProcessor, Region,
    TypeDescriptor,
};
pub use report::{Report, Section, SourceLocation, Subject};
pub use scenario::Scenario;
pub use snapshot::{HeapCreateInfo, HeapSettings, RegionFlags, SnapshotHeap};
pub use tier::{DerefToken, SafetyTier};
pub use violation::{Failure, VerifyResult, Violation, ViolationClass};

#[cfg(test)]
mod property_tests;
