//! Dense per-position depth counters.
//!
//! Both arrays are owned by the worker that fills them and never shared.

/// Saturation value of [`ChromosomeCoverage`].
pub const CHROMOSOME_COVERAGE_MAX: u8 = 254;

/// `u32` counters for one target region starting at `offset` (1-based).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionCoverage {
    offset: u32,
    depth: Vec<u32>,
}

impl RegionCoverage {
    pub fn new(start: u32, end: u32) -> Self {
        let len = if end < start { 0 } else { end - start + 1 };
        Self {
            offset: start,
            depth: vec![0; len as usize],
        }
    }

    pub fn offset(&self) -> u32 {
        self.offset
    }

    pub fn values(&self) -> &[u32] {
        &self.depth
    }

    /// Adds one read covering `start..=end` (clipped to the region).
    ///
    /// `mask` holds one flag per reference position of the read starting at
    /// `start`; positions whose flag is `false` are not counted.
    pub fn add_span(&mut self, start: u32, end: u32, mask: Option<&[bool]>) {
        let Some((first, last)) = clip(self.offset, self.depth.len(), start, end) else {
            return;
        };
        for pos in first..=last {
            if let Some(mask) = mask
                && !mask.get((pos - start) as usize).copied().unwrap_or(true)
            {
                continue;
            }
            let slot = &mut self.depth[(pos - self.offset) as usize];
            *slot = slot.saturating_add(1);
        }
    }
}

/// Saturating `u8` counters for a whole chromosome, indexed by 1-based
/// position. Values stop at [`CHROMOSOME_COVERAGE_MAX`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChromosomeCoverage {
    depth: Vec<u8>,
}

impl ChromosomeCoverage {
    pub fn new(length: u32) -> Self {
        Self {
            depth: vec![0; length as usize + 1],
        }
    }

    pub fn length(&self) -> u32 {
        (self.depth.len() - 1) as u32
    }

    pub fn add_span(&mut self, start: u32, end: u32, mask: Option<&[bool]>) {
        let Some((first, last)) = clip(1, self.depth.len() - 1, start, end) else {
            return;
        };
        for pos in first..=last {
            if let Some(mask) = mask
                && !mask.get((pos - start) as usize).copied().unwrap_or(true)
            {
                continue;
            }
            let slot = &mut self.depth[pos as usize];
            if *slot < CHROMOSOME_COVERAGE_MAX {
                *slot += 1;
            }
        }
    }

    pub fn get(&self, pos: u32) -> u8 {
        self.depth.get(pos as usize).copied().unwrap_or(0)
    }

    /// Counters for `start..=end`, clipped to the chromosome. The first
    /// element belongs to `start`.
    pub fn slice(&self, start: u32, end: u32) -> &[u8] {
        let first = (start.max(1) as usize).min(self.depth.len());
        let last = (end as usize + 1).min(self.depth.len()).max(first);
        &self.depth[first..last]
    }
}

/// Intersection of `start..=end` with `offset..offset+len`, if any.
fn clip(offset: u32, len: usize, start: u32, end: u32) -> Option<(u32, u32)> {
    if len == 0 {
        return None;
    }
    let region_end = offset + (len as u32) - 1;
    let first = start.max(offset);
    let last = end.min(region_end);
    (first <= last).then_some((first, last))
}
