use std::sync::atomic::{AtomicBool, Ordering};

use crate::ConnectivityMatrix;

/// Square region adjacency, `cells[from * stride + to]`.
#[derive(Debug)]
pub struct RegionMatrix {
    stride: usize,
    cells: Box<[AtomicBool]>,
}

impl RegionMatrix {
    pub fn new(regions: usize) -> Self {
        let mut cells = Vec::new();
        cells.resize_with(regions * regions, || AtomicBool::new(false));
        Self {
            stride: regions,
            cells: cells.into_boxed_slice(),
        }
    }

    #[inline]
    fn cell(&self, from: usize, to: usize) -> Option<&AtomicBool> {
        if from >= self.stride || to >= self.stride {
            return None;
        }
        self.cells.get(from * self.stride + to)
    }

    pub fn connect(&self, from: usize, to: usize) {
        if let Some(cell) = self.cell(from, to) {
            cell.store(true, Ordering::Relaxed);
        }
    }
}

impl ConnectivityMatrix for RegionMatrix {
    fn is_connected(&self, from: usize, to: usize) -> bool {
        self.cell(from, to)
            .is_some_and(|cell| cell.load(Ordering::Relaxed))
    }
}
