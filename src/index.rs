use crate::chromosome::Chromosome;
use crate::interval::Interval;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy)]
struct Entry {
    start: u32,
    end: u32,
    index: usize,
}

#[derive(Debug, Default)]
struct ChromosomeEntries {
    entries: Vec<Entry>,
    max_length: u32,
}

/// Overlap lookup over an interval list that may be unsorted or contain
/// overlapping intervals. Results are positions in the indexed list.
#[derive(Debug, Default)]
pub struct IntervalIndex {
    chromosomes: HashMap<Chromosome, ChromosomeEntries>,
}

impl IntervalIndex {
    pub fn new(intervals: &[Interval]) -> Self {
        let mut chromosomes: HashMap<Chromosome, ChromosomeEntries> = HashMap::new();
        for (index, interval) in intervals.iter().enumerate() {
            let slot = chromosomes.entry(interval.chromosome.clone()).or_default();
            slot.entries.push(Entry {
                start: interval.start,
                end: interval.end,
                index,
            });
            slot.max_length = slot.max_length.max(interval.length());
        }
        for slot in chromosomes.values_mut() {
            slot.entries
                .sort_by(|left, right| left.start.cmp(&right.start).then(left.index.cmp(&right.index)));
        }
        Self { chromosomes }
    }

    /// Every indexed interval overlapping `start..=end`, in list order.
    pub fn matching_indices(&self, chromosome: &Chromosome, start: u32, end: u32) -> Vec<usize> {
        let mut matches = self
            .candidates(chromosome, start, end)
            .map(|entry| entry.index)
            .collect::<Vec<_>>();
        matches.sort_unstable();
        matches
    }

    /// Some overlapping interval, or `None`.
    pub fn matching_index(&self, chromosome: &Chromosome, start: u32, end: u32) -> Option<usize> {
        self.candidates(chromosome, start, end)
            .map(|entry| entry.index)
            .min()
    }

    pub fn overlaps(&self, chromosome: &Chromosome, start: u32, end: u32) -> bool {
        self.candidates(chromosome, start, end).next().is_some()
    }

    fn candidates<'a>(
        &'a self,
        chromosome: &Chromosome,
        start: u32,
        end: u32,
    ) -> impl Iterator<Item = &'a Entry> + 'a {
        let entries = self
            .chromosomes
            .get(chromosome)
            .map_or(&[][..], |slot| {
                // an overlapping interval cannot start before this
                let lowest_start = start.saturating_sub(slot.max_length.saturating_sub(1));
                let first = slot.entries.partition_point(|entry| entry.start < lowest_start);
                &slot.entries[first..]
            });
        entries
            .iter()
            .take_while(move |entry| entry.start <= end)
            .filter(move |entry| entry.end >= start)
    }
}
