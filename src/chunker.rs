use crate::chromosome::Chromosome;
use crate::interval::Interval;
use std::ops::Range;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkKind {
    /// Intervals scanned one by one with region queries.
    Regions,
    /// All intervals of one chromosome, scanned with one chromosome-wide
    /// coverage array.
    Chromosome(Chromosome),
}

/// Unit of parallel work: a contiguous slice of the input interval list.
///
/// Created before submission, mutated only by the worker that owns it and
/// read by the caller after all workers are done.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub index: usize,
    pub range: Range<usize>,
    pub kind: ChunkKind,
    pub output: Vec<Interval>,
    pub error: Option<String>,
}

impl Chunk {
    fn new(index: usize, range: Range<usize>, kind: ChunkKind) -> Self {
        Self {
            index,
            range,
            kind,
            output: Vec::new(),
            error: None,
        }
    }

    pub fn len(&self) -> usize {
        self.range.len()
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }
}

/// Splits `count` intervals into at most `workers` contiguous chunks whose
/// sizes differ by at most one. `count == 0` or `workers == 0` yields a
/// single chunk covering everything.
pub fn split_regions(count: usize, workers: usize) -> Vec<Chunk> {
    if count == 0 || workers == 0 {
        return vec![Chunk::new(0, 0..count, ChunkKind::Regions)];
    }

    let workers = workers.min(count);
    let base = count / workers;
    let remainder = count % workers;
    let mut chunks = Vec::with_capacity(workers);
    let mut start = 0;
    for index in 0..workers {
        let size = base + usize::from(index < remainder);
        chunks.push(Chunk::new(index, start..start + size, ChunkKind::Regions));
        start += size;
    }
    chunks
}

/// One chunk per run of consecutive intervals on the same chromosome.
/// Expects sorted input, so every chromosome forms exactly one run.
pub fn split_chromosomes(intervals: &[Interval]) -> Vec<Chunk> {
    let mut chunks: Vec<Chunk> = Vec::new();
    for (position, interval) in intervals.iter().enumerate() {
        if let Some(last) = chunks.last_mut()
            && last.kind == ChunkKind::Chromosome(interval.chromosome.clone())
        {
            last.range.end = position + 1;
            continue;
        }
        let index = chunks.len();
        chunks.push(Chunk::new(
            index,
            position..position + 1,
            ChunkKind::Chromosome(interval.chromosome.clone()),
        ));
    }
    chunks
}

/// Drops intervals on alt contigs, decoys and other special chromosomes.
pub fn non_special_only(intervals: Vec<Interval>) -> Vec<Interval> {
    intervals
        .into_iter()
        .filter(|interval| interval.chromosome.is_non_special())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{ChunkKind, non_special_only, split_chromosomes, split_regions};
    use crate::chromosome::Chromosome;
    use crate::interval::Interval;

    #[test]
    fn region_chunks_are_near_equal_and_contiguous() {
        let chunks = split_regions(10, 4);
        let sizes = chunks.iter().map(|chunk| chunk.len()).collect::<Vec<_>>();
        assert_eq!(sizes, vec![3, 3, 2, 2]);
        assert_eq!(chunks[0].range, 0..3);
        assert_eq!(chunks[3].range, 8..10);
        for pair in chunks.windows(2) {
            assert_eq!(pair[0].range.end, pair[1].range.start);
            assert_eq!(pair[0].index + 1, pair[1].index);
        }
    }

    #[test]
    fn more_workers_than_regions_gives_single_region_chunks() {
        let chunks = split_regions(3, 8);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|chunk| chunk.len() == 1));
    }

    #[test]
    fn degenerate_inputs_yield_one_trivial_chunk() {
        let empty = split_regions(0, 4);
        assert_eq!(empty.len(), 1);
        assert!(empty[0].is_empty());

        let no_workers = split_regions(5, 0);
        assert_eq!(no_workers.len(), 1);
        assert_eq!(no_workers[0].range, 0..5);
    }

    #[test]
    fn chromosome_chunks_never_split_a_chromosome() {
        let intervals = vec![
            Interval::new("chr1", 1, 10),
            Interval::new("chr1", 20, 30),
            Interval::new("chr2", 1, 10),
            Interval::new("chrX", 5, 6),
            Interval::new("chrX", 8, 9),
        ];
        let chunks = split_chromosomes(&intervals);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].range, 0..2);
        assert_eq!(chunks[0].kind, ChunkKind::Chromosome(Chromosome::new("chr1")));
        assert_eq!(chunks[1].range, 2..3);
        assert_eq!(chunks[2].range, 3..5);
        assert!(split_chromosomes(&[]).is_empty());
    }

    #[test]
    fn special_chromosomes_are_filtered() {
        let intervals = vec![
            Interval::new("chr1", 1, 10),
            Interval::new("chrUn_gl000220", 1, 10),
            Interval::new("chrM", 1, 10),
        ];
        let kept = non_special_only(intervals);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[1].chromosome.as_str(), "chrM");
    }
}
