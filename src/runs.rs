/// Depth predicate for interval extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Threshold {
    /// Low coverage: `depth < cutoff`.
    Below(u32),
    /// High coverage: `depth >= cutoff`.
    AtLeast(u32),
}

impl Threshold {
    pub fn cutoff(&self) -> u32 {
        match *self {
            Self::Below(cutoff) | Self::AtLeast(cutoff) => cutoff,
        }
    }

    pub fn matches(&self, depth: u32) -> bool {
        match *self {
            Self::Below(cutoff) => depth < cutoff,
            Self::AtLeast(cutoff) => depth >= cutoff,
        }
    }
}

/// Maximal runs of `values` whose depth satisfies `threshold`, as 1-based
/// closed intervals. `values[0]` belongs to position `offset`.
pub fn threshold_runs<T>(values: &[T], offset: u32, threshold: Threshold) -> Vec<(u32, u32)>
where
    T: Copy + Into<u32>,
{
    let mut runs = Vec::new();
    let mut open: Option<u32> = None;
    for (index, value) in values.iter().enumerate() {
        let pos = offset + index as u32;
        match (open, threshold.matches((*value).into())) {
            (Some(start), false) => {
                runs.push((start, pos - 1));
                open = None;
            }
            (None, true) => open = Some(pos),
            _ => {}
        }
    }
    if let Some(start) = open {
        runs.push((start, offset + values.len() as u32 - 1));
    }
    runs
}

#[cfg(test)]
mod tests {
    use super::{Threshold, threshold_runs};

    #[test]
    fn emits_maximal_runs_and_flushes_open_run() {
        let depth: [u32; 8] = [5, 5, 30, 30, 5, 30, 5, 5];
        assert_eq!(
            threshold_runs(&depth, 100, Threshold::Below(20)),
            vec![(100, 101), (104, 104), (106, 107)]
        );
        assert_eq!(
            threshold_runs(&depth, 100, Threshold::AtLeast(20)),
            vec![(102, 103), (105, 105)]
        );
    }

    #[test]
    fn empty_input_yields_nothing() {
        let depth: [u8; 0] = [];
        assert!(threshold_runs(&depth, 1, Threshold::Below(10)).is_empty());
    }

    #[test]
    fn works_on_saturating_byte_counters() {
        let depth: [u8; 4] = [254, 254, 0, 254];
        assert_eq!(
            threshold_runs(&depth, 1, Threshold::AtLeast(255)),
            Vec::<(u32, u32)>::new()
        );
        assert_eq!(threshold_runs(&depth, 1, Threshold::Below(1)), vec![(3, 3)]);
        assert_eq!(Threshold::AtLeast(255).cutoff(), 255);
    }
}
