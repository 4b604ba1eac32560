use thiserror::Error;

use crate::{Report, SafetyTier};

/// A single detected invariant violation. `Display` yields the report label.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Violation {
    #[error("oop must point to a heap address")]
    ObjectOutsideHeap,
    #[error("Forwardee must point to a heap address")]
    ForwardeeOutsideHeap,
    #[error("Non-trivial forwarding pointer during Full GC moves, probable bug.")]
    ForwardedDuringFullGcMove,
    #[error("Forwardee should be self, or another region")]
    ForwardeeInSameRegion,
    #[error("Multiple forwardings")]
    MultipleForwardings,
    #[error("Object must reside in active region")]
    InactiveRegion,
    #[error("Object must reside in humongous start")]
    NotHumongousStart,
    #[error("Humongous continuation should be of proper size")]
    BadHumongousContinuation { region: usize },
    #[error("Object should be forwarded")]
    NotForwarded,
    #[error("Object should not be forwarded")]
    Forwarded,
    #[error("Object should be marked (complete)")]
    NotMarkedComplete,
    #[error("Object should be marked (next)")]
    NotMarkedNext,
    #[error("Object should not be in collection set")]
    ObjectInCollectionSet,
    #[error("Interior location should not be in collection set")]
    LocationInCollectionSet,
    #[error("Reference processor liveness closure should be installed")]
    LivenessClosureMissing,
    #[error("Reference processor liveness closure should not be installed")]
    LivenessClosureInstalled,
}

/// Broad family a [`Violation`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViolationClass {
    HeapMembership,
    ForwardingCorruption,
    RegionResidency,
    MarkState,
    CollectionSet,
    ReferenceProcessorInstallation,
}

impl Violation {
    pub const fn class(self) -> ViolationClass {
        use Violation::*;
        match self {
            ObjectOutsideHeap | ForwardeeOutsideHeap => ViolationClass::HeapMembership,
            ForwardedDuringFullGcMove
            | ForwardeeInSameRegion
            | MultipleForwardings
            | NotForwarded
            | Forwarded => ViolationClass::ForwardingCorruption,
            InactiveRegion | NotHumongousStart | BadHumongousContinuation { .. } => {
                ViolationClass::RegionResidency
            }
            NotMarkedComplete | NotMarkedNext => ViolationClass::MarkState,
            ObjectInCollectionSet | LocationInCollectionSet => ViolationClass::CollectionSet,
            LivenessClosureMissing | LivenessClosureInstalled => {
                ViolationClass::ReferenceProcessorInstallation
            }
        }
    }
}

/// A violation together with the diagnostic built for it.
///
/// Produced by the `verify_*` entry points. The `check_*` entry points hand
/// it straight to [`crate::report::fail`].
#[derive(Error, Debug, Clone)]
#[error("{report}")]
pub struct Failure {
    pub violation: Violation,
    pub tier: SafetyTier,
    pub report: Report,
}

pub type VerifyResult = Result<(), Box<Failure>>;
