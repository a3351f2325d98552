use crate::chromosome::Chromosome;
use std::cmp::Ordering;
use std::fmt;

/// Genomic interval with 1-based, inclusive coordinates.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Interval {
    pub chromosome: Chromosome,
    pub start: u32,
    pub end: u32,
    pub annotations: Vec<String>,
}

impl Interval {
    pub fn new(chromosome: impl Into<Chromosome>, start: u32, end: u32) -> Self {
        Self {
            chromosome: chromosome.into(),
            start,
            end,
            annotations: Vec::new(),
        }
    }

    pub fn with_annotations(mut self, annotations: Vec<String>) -> Self {
        self.annotations = annotations;
        self
    }

    pub fn length(&self) -> u32 {
        if self.end < self.start {
            0
        } else {
            self.end - self.start + 1
        }
    }

    pub fn overlaps(&self, start: u32, end: u32) -> bool {
        self.start <= end && start <= self.end
    }

    pub fn overlaps_with(&self, chromosome: &Chromosome, start: u32, end: u32) -> bool {
        self.chromosome == *chromosome && self.overlaps(start, end)
    }

    /// Chromosome, then start, then end.
    pub fn position_cmp(&self, other: &Self) -> Ordering {
        self.chromosome
            .cmp(&other.chromosome)
            .then(self.start.cmp(&other.start))
            .then(self.end.cmp(&other.end))
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}-{}", self.chromosome, self.start, self.end)
    }
}

pub fn is_sorted(intervals: &[Interval]) -> bool {
    intervals
        .windows(2)
        .all(|pair| pair[0].position_cmp(&pair[1]) != Ordering::Greater)
}

/// Sorted and free of overlaps between neighbours. Book-ended intervals
/// count as merged.
pub fn is_merged_and_sorted(intervals: &[Interval]) -> bool {
    intervals.windows(2).all(|pair| {
        pair[0].position_cmp(&pair[1]) != Ordering::Greater
            && !pair[0].overlaps_with(&pair[1].chromosome, pair[1].start, pair[1].end)
    })
}

pub fn sort(intervals: &mut [Interval]) {
    intervals.sort_by(Interval::position_cmp);
}

/// Sorts and merges overlapping intervals, optionally also book-ended ones.
/// Annotations are dropped.
pub fn merge(mut intervals: Vec<Interval>, merge_back_to_back: bool) -> Vec<Interval> {
    sort(&mut intervals);

    let mut merged: Vec<Interval> = Vec::with_capacity(intervals.len());
    for mut interval in intervals {
        interval.annotations.clear();
        if let Some(last) = merged.last_mut()
            && last.chromosome == interval.chromosome
            && (last.overlaps(interval.start, interval.end)
                || (merge_back_to_back && last.end.saturating_add(1) == interval.start))
        {
            last.end = last.end.max(interval.end);
            continue;
        }
        merged.push(interval);
    }
    merged
}

pub fn base_count(intervals: &[Interval]) -> u64 {
    intervals
        .iter()
        .map(|interval| u64::from(interval.length()))
        .sum()
}

/// Splits intervals longer than `chunk_size` into pieces of near-equal
/// length. The piece count is whichever of `length / chunk_size` and one more
/// gives pieces closer to `chunk_size`; piece lengths differ by at most one.
pub fn chunk(intervals: &[Interval], chunk_size: u32) -> Vec<Interval> {
    let mut output = Vec::with_capacity(intervals.len());
    for interval in intervals {
        let length = interval.length();
        if chunk_size == 0 || length <= chunk_size {
            output.push(interval.clone());
            continue;
        }

        let target = f64::from(chunk_size);
        let mut count = length / chunk_size;
        if (target - f64::from(length) / f64::from(count)).abs()
            > (target - f64::from(length) / f64::from(count + 1)).abs()
        {
            count += 1;
        }
        let base = length / count;
        let extra = length % count;
        // rounding is absorbed from the front: longer front pieces on surplus, shorter on shortfall
        let longer_first = u64::from(length) >= u64::from(count) * u64::from(chunk_size);

        let mut start = interval.start;
        for piece in 0..count {
            let longer = if longer_first {
                piece < extra
            } else {
                piece >= count - extra
            };
            let end = start + base + u32::from(longer) - 1;
            output.push(Interval {
                chromosome: interval.chromosome.clone(),
                start,
                end,
                annotations: interval.annotations.clone(),
            });
            start = end + 1;
        }
    }
    output
}
