//! In-process heap snapshot.
//!
//! A small region heap whose every piece of collector metadata can be set
//! directly: region flags, forwarding words, mark bits, collection set,
//! connectivity matrix and reference processor state. Objects are records,
//! memory is a sparse word map, so arbitrary corruption can be staged
//! without touching real memory.

mod bitmap;
mod matrix;
mod region;

use std::{
    collections::HashMap,
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
};

use parking_lot::RwLock;

pub use bitmap::MarkBitmap;
pub use matrix::RegionMatrix;
pub use region::{RegionFlags, RegionMeta};

use crate::{
    Address, ClosureId, FORWARDING_WORDS, HEAP_WORD_SIZE, HeapModel, MarkGeneration,
    ObjectHandle, ReferenceProcessor, TypeDescriptor,
};

/// Type descriptors live outside the heap, starting here.
const TYPE_AREA: usize = 0x7f00_0000_0000;
const TYPE_STRIDE: usize = 0x40;

// ── Heap settings ─────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct HeapCreateInfo {
    pub base: Option<usize>,
    pub region_count: Option<usize>,
    pub region_size: Option<usize>,
    // defaults to one region worth of words
    pub humongous_threshold_words: Option<usize>,
    pub connectivity_matrix: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapSettings {
    /// First heap address. Must be non-null and region aligned.
    pub base: usize,
    pub region_count: usize,
    /// Region size in bytes, a multiple of the heap word size.
    pub region_size: usize,
    /// Objects with more allocation words than this are humongous.
    pub humongous_threshold_words: usize,
    pub connectivity_matrix: bool,
}

impl Default for HeapSettings {
    fn default() -> Self {
        Self {
            base: 0x1000_0000,
            region_count: 64,
            region_size: 32_768,
            humongous_threshold_words: 32_768 / HEAP_WORD_SIZE,
            connectivity_matrix: false,
        }
    }
}

impl HeapSettings {
    pub fn from_info(info: &HeapCreateInfo) -> Self {
        let mut settings = HeapSettings::default();
        info.base.inspect(|&val| settings.base = val);
        info.region_count.inspect(|&val| settings.region_count = val);
        info.region_size.inspect(|&val| settings.region_size = val);
        settings.humongous_threshold_words = info
            .humongous_threshold_words
            .unwrap_or(settings.region_size / HEAP_WORD_SIZE);
        info.connectivity_matrix
            .inspect(|&val| settings.connectivity_matrix = val);
        settings
    }

    pub fn heap_size(&self) -> usize {
        self.region_count * self.region_size
    }

    pub fn validate(&self) -> Result<(), &'static str> {
        if self.region_count == 0 || self.region_size == 0 {
            return Err("Sizes must be > 0");
        }
        if !self.region_size.is_multiple_of(HEAP_WORD_SIZE) {
            return Err("region_size must be a multiple of the heap word size");
        }
        if self.base == 0 {
            return Err("base must not be null");
        }
        if !self.base.is_multiple_of(self.region_size) {
            return Err("base must be aligned to region_size");
        }
        let size = self
            .region_count
            .checked_mul(self.region_size)
            .ok_or("heap size overflows")?;
        if self.base.checked_add(size).is_none() {
            return Err("heap does not fit the address space");
        }
        if self.humongous_threshold_words == 0
            || self.humongous_threshold_words > self.region_size / HEAP_WORD_SIZE
        {
            return Err("humongous threshold must lie within one region");
        }
        Ok(())
    }
}

// ── Collaborators ─────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct ObjectRecord {
    size_words: usize,
    descriptor: TypeDescriptor,
}

/// A liveness closure. Only its address is ever used.
#[derive(Debug)]
struct LivenessClosure {
    _name: &'static str,
}

#[derive(Debug, Default)]
pub struct SnapshotReferenceProcessor {
    is_alive: AtomicUsize,
}

impl ReferenceProcessor for SnapshotReferenceProcessor {
    fn active_liveness_closure(&self) -> Option<ClosureId> {
        let raw = self.is_alive.load(Ordering::Relaxed);
        (raw != 0).then_some(ClosureId(raw))
    }
}

// ── SnapshotHeap ──────────────────────────────────────────────────────

#[derive(Debug)]
pub struct SnapshotHeap {
    settings: HeapSettings,
    regions: Box<[RegionMeta]>,
    words: RwLock<HashMap<usize, usize, ahash::RandomState>>,
    objects: RwLock<HashMap<usize, ObjectRecord, ahash::RandomState>>,
    types: RwLock<HashMap<String, Address, ahash::RandomState>>,
    marks: [MarkBitmap; 2],
    matrix: Option<RegionMatrix>,
    ref_processor: SnapshotReferenceProcessor,
    /// Canonical and forwarding-aware closures. Boxed so their identities
    /// survive moves of the heap value.
    closures: Box<[LivenessClosure; 2]>,
    full_gc_move: AtomicBool,
}

impl SnapshotHeap {
    pub fn try_new(info: HeapCreateInfo) -> Result<Self, &'static str> {
        let settings = HeapSettings::from_info(&info);
        settings.validate()?;

        let base = Address::new(settings.base);
        let regions: Vec<RegionMeta> = (0..settings.region_count)
            .map(|index| {
                RegionMeta::new(
                    index,
                    base.offset(index * settings.region_size),
                    settings.region_size,
                )
            })
            .collect();

        let heap_size = settings.heap_size();
        let matrix = settings
            .connectivity_matrix
            .then(|| RegionMatrix::new(settings.region_count));

        log::debug!(
            "snapshot heap {} .. {} ({} regions of {} bytes)",
            base,
            base.offset(heap_size),
            settings.region_count,
            settings.region_size
        );

        Ok(Self {
            regions: regions.into_boxed_slice(),
            words: RwLock::new(HashMap::default()),
            objects: RwLock::new(HashMap::default()),
            types: RwLock::new(HashMap::default()),
            marks: [
                MarkBitmap::new(base, heap_size),
                MarkBitmap::new(base, heap_size),
            ],
            matrix,
            ref_processor: SnapshotReferenceProcessor::default(),
            closures: Box::new([
                LivenessClosure { _name: "is_alive" },
                LivenessClosure {
                    _name: "forwarded_is_alive",
                },
            ]),
            full_gc_move: AtomicBool::new(false),
            settings,
        })
    }

    pub fn new(info: HeapCreateInfo) -> Self {
        Self::try_new(info).expect("Invalid Heap Settings")
    }

    pub fn settings(&self) -> &HeapSettings {
        &self.settings
    }

    pub fn region(&self, index: usize) -> Option<&RegionMeta> {
        self.regions.get(index)
    }

    fn region_or_panic(&self, index: usize) -> &RegionMeta {
        self.regions
            .get(index)
            .unwrap_or_else(|| panic!("no region {index}"))
    }

    fn intern_type(&self, name: &str) -> TypeDescriptor {
        if let Some(&address) = self.types.read().get(name) {
            return TypeDescriptor {
                address,
                name: name.to_string(),
            };
        }
        let mut types = self.types.write();
        let next = Address::new(TYPE_AREA + types.len() * TYPE_STRIDE);
        let address = *types.entry(name.to_string()).or_insert(next);
        TypeDescriptor {
            address,
            name: name.to_string(),
        }
    }

    fn install(&self, obj: ObjectHandle, size_words: usize, type_name: &str) {
        let descriptor = self.intern_type(type_name);
        self.set_forwardee(obj, obj);
        self.objects.write().insert(
            obj.address().raw(),
            ObjectRecord {
                size_words,
                descriptor,
            },
        );
    }

    // ── Allocation ────────────────────────────────────────────────────

    /// Bump allocates an object of `size_words` in `region`, forwarding
    /// word in front. The region becomes active.
    pub fn allocate(&self, region: usize, size_words: usize, type_name: &str) -> ObjectHandle {
        let meta = self.region_or_panic(region);
        let bytes = (size_words + FORWARDING_WORDS) * HEAP_WORD_SIZE;
        let Some(slot) = meta.bump(bytes) else {
            panic!("region {region} exhausted");
        };
        meta.add_flags(RegionFlags::ACTIVE);

        let obj = ObjectHandle::from_address(slot.offset(FORWARDING_WORDS * HEAP_WORD_SIZE));
        self.install(obj, size_words, type_name);
        log::debug!("allocated {obj} {type_name} ({size_words} words) in region {region}");
        obj
    }

    /// Allocates an object spanning whole regions, flagging the first as
    /// humongous start and the rest as continuations.
    pub fn allocate_humongous(&self, size_words: usize, type_name: &str) -> ObjectHandle {
        let region_size = self.settings.region_size;
        let bytes = (size_words + FORWARDING_WORDS) * HEAP_WORD_SIZE;
        let count = self.required_regions(bytes);

        let Some(start) = self
            .regions
            .windows(count)
            .position(|run| run.iter().all(RegionMeta::is_pristine))
        else {
            panic!("no {count} contiguous free regions");
        };

        for (i, region) in self.regions[start..start + count].iter().enumerate() {
            let flags = if i == 0 {
                RegionFlags::ACTIVE | RegionFlags::HUMONGOUS_START
            } else {
                RegionFlags::ACTIVE | RegionFlags::HUMONGOUS_CONTINUATION
            };
            region.set_flags(flags);
            let used = (bytes - i * region_size).min(region_size);
            region.set_top(region.bottom().offset(used));
        }

        let obj = ObjectHandle::from_address(
            self.regions[start]
                .bottom()
                .offset(FORWARDING_WORDS * HEAP_WORD_SIZE),
        );
        self.install(obj, size_words, type_name);
        log::debug!(
            "allocated humongous {obj} {type_name} ({size_words} words) in regions {start}..{}",
            start + count
        );
        obj
    }

    /// Copies `obj` into `to_region` and forwards it to the copy.
    pub fn evacuate(&self, obj: ObjectHandle, to_region: usize) -> ObjectHandle {
        let record = self.objects.read().get(&obj.address().raw()).cloned();
        let Some(record) = record else {
            panic!("{obj} is not an object");
        };
        let copy = self.allocate(to_region, record.size_words, &record.descriptor.name);
        self.set_forwardee(obj, copy);
        log::debug!("evacuated {obj} -> {copy}");
        copy
    }

    // ── Direct state manipulation ─────────────────────────────────────

    /// Raw store, no checks. Used to stage corruption.
    pub fn write_word(&self, addr: Address, value: usize) {
        self.words.write().insert(addr.raw(), value);
    }

    pub fn set_forwardee(&self, obj: ObjectHandle, target: ObjectHandle) {
        self.write_word(obj.address().forwarding_slot(), target.address().raw());
    }

    pub fn mark(&self, generation: MarkGeneration, obj: ObjectHandle) -> bool {
        self.marks[region::slot(generation)].mark(obj.address())
    }

    pub fn clear_marks(&self, generation: MarkGeneration) {
        self.marks[region::slot(generation)].clear();
    }

    /// Records the current top of every region as its top at mark start.
    pub fn capture_mark_start(&self, generation: MarkGeneration) {
        for region in self.regions.iter() {
            region.set_top_at_mark_start(generation, region.top());
        }
    }

    pub fn set_top_at_mark_start(&self, generation: MarkGeneration, region: usize, tams: Address) {
        self.region_or_panic(region)
            .set_top_at_mark_start(generation, tams);
    }

    pub fn add_to_collection_set(&self, region: usize) {
        self.region_or_panic(region)
            .add_flags(RegionFlags::COLLECTION_SET);
    }

    pub fn remove_from_collection_set(&self, region: usize) {
        self.region_or_panic(region)
            .remove_flags(RegionFlags::COLLECTION_SET);
    }

    pub fn set_region_flags(&self, region: usize, flags: RegionFlags) {
        self.region_or_panic(region).set_flags(flags);
    }

    /// Records a reference from region `from` into region `to`. No-op
    /// without a matrix.
    pub fn connect(&self, from: usize, to: usize) {
        if let Some(matrix) = &self.matrix {
            matrix.connect(from, to);
        }
    }

    pub fn install_liveness_closure(&self, closure: ClosureId) {
        self.ref_processor
            .is_alive
            .store(closure.0, Ordering::Relaxed);
    }

    pub fn uninstall_liveness_closure(&self) {
        self.ref_processor.is_alive.store(0, Ordering::Relaxed);
    }

    pub fn set_full_gc_move_in_progress(&self, in_progress: bool) {
        self.full_gc_move.store(in_progress, Ordering::Relaxed);
    }
}

impl HeapModel for SnapshotHeap {
    type Region = RegionMeta;
    type Matrix = RegionMatrix;
    type RefProcessor = SnapshotReferenceProcessor;

    #[inline]
    fn is_in(&self, addr: Address) -> bool {
        let base = self.settings.base;
        (base..base + self.settings.heap_size()).contains(&addr.raw())
    }

    fn region_containing(&self, addr: Address) -> Option<&RegionMeta> {
        if !self.is_in(addr) {
            return None;
        }
        self.regions.get(self.region_index_containing(addr))
    }

    #[inline]
    fn region_index_containing(&self, addr: Address) -> usize {
        addr.raw().wrapping_sub(self.settings.base) / self.settings.region_size
    }

    fn region_at(&self, index: usize) -> Option<&RegionMeta> {
        self.regions.get(index)
    }

    fn is_marked(&self, generation: MarkGeneration, obj: ObjectHandle) -> bool {
        self.marks[region::slot(generation)].is_marked(obj.address())
    }

    fn allocated_after_mark_start(&self, generation: MarkGeneration, addr: Address) -> bool {
        self.region_containing(addr)
            .is_some_and(|region| addr >= region.top_at_mark_start(generation))
    }

    fn in_collection_set(&self, addr: Address) -> bool {
        self.region_containing(addr)
            .is_some_and(RegionMeta::in_collection_set)
    }

    fn is_full_gc_move_in_progress(&self) -> bool {
        self.full_gc_move.load(Ordering::Relaxed)
    }

    fn connectivity_matrix(&self) -> Option<&RegionMatrix> {
        self.matrix.as_ref()
    }

    fn reference_processor(&self) -> &SnapshotReferenceProcessor {
        &self.ref_processor
    }

    fn canonical_liveness_closure(&self) -> ClosureId {
        ClosureId::of(&self.closures[0])
    }

    fn forwarded_liveness_closure(&self) -> ClosureId {
        ClosureId::of(&self.closures[1])
    }

    fn load_word(&self, addr: Address) -> usize {
        self.words.read().get(&addr.raw()).copied().unwrap_or(0)
    }

    fn type_descriptor(&self, obj: ObjectHandle) -> TypeDescriptor {
        self.objects
            .read()
            .get(&obj.address().raw())
            .map(|record| record.descriptor.clone())
            .unwrap_or_else(|| TypeDescriptor {
                address: Address::NULL,
                name: "<not an object>".to_string(),
            })
    }

    fn object_size_words(&self, obj: ObjectHandle) -> usize {
        self.objects
            .read()
            .get(&obj.address().raw())
            .map_or(0, |record| record.size_words)
    }

    fn humongous_threshold_words(&self) -> usize {
        self.settings.humongous_threshold_words
    }

    fn region_size_bytes(&self) -> usize {
        self.settings.region_size
    }

    fn describe_location(&self, addr: Address) -> Option<String> {
        if addr.is_null() {
            return Some("null pointer".to_string());
        }
        self.types
            .read()
            .iter()
            .find(|&(_, &address)| address == addr)
            .map(|(name, _)| format!("type descriptor {name}"))
    }
}
