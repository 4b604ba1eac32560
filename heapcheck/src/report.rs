//! Failure reports.
//!
//! A report is an ordered list of labelled sections built from plain data
//! and rendered to text only at the boundary. Labels are fixed so log
//! tooling can match on `Object:`, `Forwardee:`, `Matrix connections:` and
//! friends. Every renderer that reads through an object needs a
//! [`DerefToken`]; without one only addresses and region lookups are used.

use std::{fmt, panic::Location};

use crate::{
    Address, ClosureId, ConnectivityMatrix, DerefToken, Failure, HeapModel, MarkGeneration,
    ObjectHandle, Region, SafetyTier, forwarding::resolve_raw,
};

/// Where a failing check was invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLocation {
    pub file: &'static str,
    pub line: u32,
}

impl SourceLocation {
    #[track_caller]
    #[inline]
    pub fn caller() -> Self {
        let location = Location::caller();
        Self {
            file: location.file(),
            line: location.line(),
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub title: &'static str,
    pub lines: Vec<String>,
}

impl Section {
    pub fn new(title: &'static str) -> Self {
        Self {
            title,
            lines: Vec::new(),
        }
    }

    pub fn line(&mut self, line: impl Into<String>) -> &mut Self {
        self.lines.push(line.into());
        self
    }

    pub fn extend(&mut self, lines: impl IntoIterator<Item = String>) -> &mut Self {
        self.lines.extend(lines);
        self
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lines.iter().any(|line| line.contains(needle))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub phase: String,
    pub label: String,
    pub sections: Vec<Section>,
    pub location: SourceLocation,
}

impl Report {
    pub fn new(
        phase: impl Into<String>,
        label: impl Into<String>,
        location: SourceLocation,
    ) -> Self {
        Self {
            phase: phase.into(),
            label: label.into(),
            sections: Vec::new(),
            location,
        }
    }

    pub fn push(&mut self, section: Section) {
        self.sections.push(section);
    }

    pub fn section(&self, title: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.title == title)
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}; {}", self.phase, self.label)?;
        writeln!(f)?;
        for section in &self.sections {
            writeln!(f, "{}:", section.title)?;
            for line in &section.lines {
                writeln!(f, "{line}")?;
            }
            writeln!(f)?;
        }
        write!(f, "Source location: {}", self.location)
    }
}

// ── Field rendering ───────────────────────────────────────────────────

/// Three-character boolean token: blank when set, `not` otherwise.
#[inline]
fn flag(value: bool) -> &'static str {
    if value { "" } else { "not" }
}

fn region_line<H: HeapModel + ?Sized>(heap: &H, addr: Address) -> Option<String> {
    if !heap.is_in(addr) {
        return None;
    }
    heap.region_containing(addr).map(|region| format!("  region: {}", region.summary()))
}

/// Full detail for an object: type descriptor, allocation epochs, mark bits,
/// collection-set membership and region.
pub fn object_full<H: HeapModel + ?Sized>(
    heap: &H,
    obj: ObjectHandle,
    _token: DerefToken,
) -> Vec<String> {
    let addr = obj.address();
    let descriptor = heap.type_descriptor(obj);

    let mut lines = vec![format!(
        "  {obj} - klass {} {}",
        descriptor.address, descriptor.name
    )];
    for generation in MarkGeneration::ALL {
        lines.push(format!(
            "    {:>3} allocated after {} mark start",
            flag(heap.allocated_after_mark_start(generation, addr)),
            generation.name()
        ));
    }
    for generation in MarkGeneration::ALL {
        lines.push(format!(
            "    {:>3} marked {}",
            flag(heap.is_marked(generation, obj)),
            generation.name()
        ));
    }
    lines.push(format!(
        "    {:>3} in collection set",
        flag(heap.in_collection_set(addr))
    ));
    lines.extend(region_line(heap, addr));
    lines
}

/// Address plus containing region. Never reads through `addr`.
pub fn object_minimal<H: HeapModel + ?Sized>(heap: &H, addr: Address) -> Vec<String> {
    let mut lines = vec![format!("  {addr} - safe print, no details")];
    lines.extend(region_line(heap, addr));
    lines
}

/// Renders `obj` in full when `token` allows it, minimally otherwise.
pub fn object_at<H: HeapModel + ?Sized>(
    heap: &H,
    obj: ObjectHandle,
    token: Option<DerefToken>,
) -> Vec<String> {
    match token {
        Some(token) => object_full(heap, obj, token),
        None => object_minimal(heap, obj.address()),
    }
}

/// A location that is not known to start an object.
pub fn non_object<H: HeapModel + ?Sized>(heap: &H, loc: Address) -> Vec<String> {
    if heap.is_in(loc) {
        let mut lines = vec![
            "  inside heap".to_string(),
            format!("    {:>3} in collection set", flag(heap.in_collection_set(loc))),
        ];
        lines.extend(region_line(heap, loc));
        lines
    } else {
        let description = heap
            .describe_location(loc)
            .unwrap_or_else(|| "no symbolic information".to_string());
        vec!["  outside of heap".to_string(), format!("  {description}")]
    }
}

// ── Report assembly ───────────────────────────────────────────────────

/// The object under inspection and where it was reached from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Subject {
    pub obj: Option<ObjectHandle>,
    /// Field or slot the reference was loaded from.
    pub interior: Option<Address>,
    /// Object holding `interior`, when the caller knows it.
    pub referrer: Option<ObjectHandle>,
}

/// Builds the object-centric failure report at precision `tier`.
pub fn build<H: HeapModel + ?Sized>(
    heap: &H,
    tier: SafetyTier,
    subject: Subject,
    phase: &str,
    label: &str,
    location: SourceLocation,
) -> Report {
    let mut report = Report::new(phase, label, location);

    report.push(referenced_from(heap, tier, subject));

    let mut object = Section::new("Object");
    match subject.obj {
        Some(obj) => object.extend(object_at(heap, obj, tier.permits(SafetyTier::ObjectSafe))),
        None => object.line("  no object resolved"),
    };
    report.push(object);

    let Some(obj) = subject.obj else {
        return report;
    };

    if tier >= SafetyTier::ObjectSafe {
        let fwd = resolve_raw(heap, obj);
        let mut forwardee = Section::new("Forwardee");
        if fwd == obj {
            forwardee.line("  (the object itself)");
        } else {
            forwardee.extend(object_at(
                heap,
                fwd,
                tier.permits(SafetyTier::ObjectAndForwardeeSafe),
            ));
        }
        report.push(forwardee);
    }

    if tier >= SafetyTier::ObjectAndForwardeeSafe {
        let fwd = resolve_raw(heap, obj);
        let fwd2 = resolve_raw(heap, fwd);
        if fwd2 != fwd {
            let mut second = Section::new("Second forwardee");
            second.extend(object_minimal(heap, fwd2.address()));
            report.push(second);
        }
    }

    if let Some(section) = matrix_connections(heap, tier, subject, obj) {
        report.push(section);
    }

    report
}

fn referenced_from<H: HeapModel + ?Sized>(
    heap: &H,
    tier: SafetyTier,
    subject: Subject,
) -> Section {
    let mut section = Section::new("Referenced from");
    let Some(interior) = subject.interior else {
        section.line(
            "  no interior location recorded (probably a plain heap scan, or detached object)",
        );
        return section;
    };

    section.line(format!("  interior location: {interior}"));
    match subject.referrer {
        Some(referrer) if heap.is_in(referrer.address()) => {
            section.extend(object_at(heap, referrer, tier.permits(SafetyTier::ObjectSafe)));
        }
        _ => {
            section.extend(non_object(heap, interior));
        }
    }
    section
}

fn region_index<H: HeapModel + ?Sized>(heap: &H, addr: Address) -> Option<usize> {
    heap.is_in(addr).then(|| heap.region_index_containing(addr))
}

fn connection_row<M: ConnectivityMatrix + ?Sized>(
    matrix: &M,
    name: &str,
    from: Option<usize>,
    to: Option<usize>,
) -> String {
    let state = match (from, to) {
        (Some(from), Some(to)) => flag(matrix.is_connected(from, to)),
        _ => "???",
    };
    format!("  {name:>35} {state:>3} connected")
}

fn matrix_connections<H: HeapModel + ?Sized>(
    heap: &H,
    tier: SafetyTier,
    subject: Subject,
    obj: ObjectHandle,
) -> Option<Section> {
    if tier != SafetyTier::AllSafe {
        return None;
    }
    let referrer = subject.referrer.filter(|r| heap.is_in(r.address()))?;
    let matrix = heap.connectivity_matrix()?;

    let fwd_to = resolve_raw(heap, obj);
    let fwd_from = resolve_raw(heap, referrer);

    let from_idx = region_index(heap, referrer.address());
    let to_idx = region_index(heap, obj.address());
    let fwd_from_idx = region_index(heap, fwd_from.address());
    let fwd_to_idx = region_index(heap, fwd_to.address());

    let mut section = Section::new("Matrix connections");
    section
        .line(connection_row(matrix, "reference and object", from_idx, to_idx))
        .line(connection_row(matrix, "fwd(reference) and object", fwd_from_idx, to_idx))
        .line(connection_row(matrix, "reference and fwd(object)", from_idx, fwd_to_idx))
        .line(connection_row(
            matrix,
            "fwd(reference) and fwd(object)",
            fwd_from_idx,
            fwd_to_idx,
        ));

    let interior = subject
        .interior
        .filter(|&loc| loc != referrer.address() && heap.is_in(loc));
    if let Some(interior) = interior {
        let interior_idx = region_index(heap, interior);
        section
            .line(connection_row(matrix, "interior-reference and object", interior_idx, to_idx))
            .line(connection_row(
                matrix,
                "interior-reference and fwd(object)",
                interior_idx,
                fwd_to_idx,
            ));
    }
    Some(section)
}

/// Report for a misinstalled liveness closure. No object is involved.
pub fn build_reference_processor<H: HeapModel + ?Sized>(
    heap: &H,
    phase: &str,
    label: &str,
    actual: Option<ClosureId>,
    expected: Option<ClosureId>,
    location: SourceLocation,
) -> Report {
    let identity = |closure: Option<ClosureId>| closure.unwrap_or(ClosureId(0));

    let mut report = Report::new(phase, label, location);
    let mut closures = Section::new("Liveness closures");
    closures
        .line(format!("  Actual:    {}", identity(actual)))
        .line(format!("  Expected:  {}", identity(expected)))
        .line(format!("  Canonical: {}", heap.canonical_liveness_closure()))
        .line(format!("  Forwarded: {}", heap.forwarded_liveness_closure()));
    report.push(closures);
    report
}

// ── Termination ───────────────────────────────────────────────────────

/// Reports `failure` and terminates. Never returns.
#[track_caller]
#[cold]
pub fn fail(failure: Box<Failure>) -> ! {
    let text = failure.report.to_string();
    log::error!(
        "heap verification failed ({:?}, tier {})\n{text}",
        failure.violation.class(),
        failure.tier
    );
    panic!("{text}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{HeapCreateInfo, SnapshotHeap};

    fn here() -> SourceLocation {
        SourceLocation {
            file: "heapcheck/src/report.rs",
            line: 1,
        }
    }

    fn matrix_heap() -> SnapshotHeap {
        SnapshotHeap::new(HeapCreateInfo {
            connectivity_matrix: Some(true),
            ..Default::default()
        })
    }

    #[test]
    fn test_render_layout() {
        let mut report = Report::new("check_correct failed", "Multiple forwardings", here());
        let mut object = Section::new("Object");
        object.line("  0x0000000000000010 - safe print, no details");
        report.push(object);

        assert_eq!(
            report.to_string(),
            "check_correct failed; Multiple forwardings\n\
             \n\
             Object:\n  0x0000000000000010 - safe print, no details\n\
             \n\
             Source location: heapcheck/src/report.rs:1"
        );
    }

    #[test]
    fn test_minimal_skips_type_descriptor() {
        let heap = SnapshotHeap::new(HeapCreateInfo::default());
        let obj = heap.allocate(2, 4, "Secret");

        let lines = object_minimal(&heap, obj.address());
        assert!(lines[0].ends_with("safe print, no details"));
        assert!(lines.iter().all(|l| !l.contains("Secret")));
        assert!(lines[1].starts_with("  region: |    2|"));

        let outside = object_minimal(&heap, Address::new(0x10));
        assert_eq!(outside.len(), 1);
    }

    #[test]
    fn test_full_shows_marks_and_type() {
        let heap = SnapshotHeap::new(HeapCreateInfo::default());
        let obj = heap.allocate(2, 4, "Pair");
        heap.mark(MarkGeneration::Complete, obj);
        heap.add_to_collection_set(2);

        let token = SafetyTier::AllSafe.permits(SafetyTier::ObjectSafe);
        let lines = object_at(&heap, obj, token);
        assert!(lines[0].contains(" - klass 0x"));
        assert!(lines[0].ends_with(" Pair"));
        assert_eq!(lines[3], "        marked complete");
        assert_eq!(lines[4], "    not marked next");
        assert_eq!(lines[5], "        in collection set");
        assert!(lines[6].starts_with("  region: "));
    }

    #[test]
    fn test_non_object_outside_heap() {
        let heap = SnapshotHeap::new(HeapCreateInfo::default());
        let lines = non_object(&heap, Address::NULL);
        assert_eq!(lines[0], "  outside of heap");
        assert_eq!(lines[1], "  null pointer");
    }

    #[test]
    fn test_unknown_tier_has_no_forwardee() {
        let heap = SnapshotHeap::new(HeapCreateInfo::default());
        let obj = heap.allocate(1, 4, "Pair");
        heap.evacuate(obj, 2);

        let subject = Subject {
            obj: Some(obj),
            ..Default::default()
        };
        let report = build(&heap, SafetyTier::Unknown, subject, "p", "l", here());
        assert!(report.section("Forwardee").is_none());
        assert!(report.section("Second forwardee").is_none());
        assert!(
            report
                .section("Referenced from")
                .is_some_and(|s| s.contains("no interior location recorded"))
        );
    }

    #[test]
    fn test_forwardee_precision_follows_tier() {
        let heap = SnapshotHeap::new(HeapCreateInfo::default());
        let obj = heap.allocate(1, 4, "Pair");
        heap.evacuate(obj, 2);
        let subject = Subject {
            obj: Some(obj),
            ..Default::default()
        };

        let report = build(&heap, SafetyTier::ObjectSafe, subject, "p", "l", here());
        let forwardee = report.section("Forwardee").expect("forwardee section");
        assert!(forwardee.contains("safe print, no details"));

        let report = build(&heap, SafetyTier::AllSafe, subject, "p", "l", here());
        let forwardee = report.section("Forwardee").expect("forwardee section");
        assert!(forwardee.contains("- klass"));
    }

    #[test]
    fn test_matrix_requires_referrer_and_all_safe() {
        let heap = matrix_heap();
        let holder = heap.allocate(0, 4, "Holder");
        let obj = heap.allocate(1, 4, "Pair");
        heap.connect(0, 1);

        let subject = Subject {
            obj: Some(obj),
            interior: Some(holder.address().offset(8)),
            referrer: Some(holder),
        };
        let report = build(&heap, SafetyTier::ObjectSafe, subject, "p", "l", here());
        assert!(report.section("Matrix connections").is_none());

        let report = build(&heap, SafetyTier::AllSafe, subject, "p", "l", here());
        let matrix = report.section("Matrix connections").expect("matrix section");
        assert_eq!(matrix.lines.len(), 6);
        assert_eq!(
            matrix.lines[0],
            format!("  {:>35} {:>3} connected", "reference and object", "")
        );
        assert!(matrix.lines[4].contains("interior-reference and object"));

        let no_referrer = Subject {
            referrer: None,
            ..subject
        };
        let report = build(&heap, SafetyTier::AllSafe, no_referrer, "p", "l", here());
        assert!(report.section("Matrix connections").is_none());
    }

    #[test]
    fn test_matrix_skips_interior_equal_to_referrer() {
        let heap = matrix_heap();
        let holder = heap.allocate(0, 4, "Holder");
        let obj = heap.allocate(1, 4, "Pair");

        let subject = Subject {
            obj: Some(obj),
            interior: Some(holder.address()),
            referrer: Some(holder),
        };
        let report = build(&heap, SafetyTier::AllSafe, subject, "p", "l", here());
        let matrix = report.section("Matrix connections").expect("matrix section");
        assert_eq!(matrix.lines.len(), 4);
        assert!(matrix.lines.iter().all(|l| l.ends_with("not connected")));
    }

    #[test]
    fn test_matrix_marks_unresolvable_regions() {
        let heap = matrix_heap();
        let holder = heap.allocate(0, 4, "Holder");
        let obj = heap.allocate(1, 4, "Pair");
        heap.set_forwardee(obj, ObjectHandle::from_raw(0x8));
        heap.connect(0, 1);

        let subject = Subject {
            obj: Some(obj),
            interior: Some(holder.address().offset(8)),
            referrer: Some(holder),
        };
        let report = build(&heap, SafetyTier::AllSafe, subject, "p", "l", here());
        let matrix = report.section("Matrix connections").expect("matrix section");
        let unknown = |name: &str| format!("  {name:>35} ??? connected");

        assert_eq!(
            matrix.lines[0],
            format!("  {:>35} {:>3} connected", "reference and object", "")
        );
        assert_eq!(matrix.lines[2], unknown("reference and fwd(object)"));
        assert_eq!(matrix.lines[3], unknown("fwd(reference) and fwd(object)"));
        assert_eq!(matrix.lines[5], unknown("interior-reference and fwd(object)"));
    }

    #[test]
    fn test_reference_processor_report() {
        let heap = SnapshotHeap::new(HeapCreateInfo::default());
        let canonical = heap.canonical_liveness_closure();
        let report = build_reference_processor(&heap, "p", "l", Some(canonical), None, here());

        let closures = report.section("Liveness closures").expect("closures");
        assert_eq!(closures.lines[0], format!("  Actual:    {canonical}"));
        assert_eq!(closures.lines[1], "  Expected:  0x0000000000000000");
        assert!(report.section("Object").is_none());
    }
}
