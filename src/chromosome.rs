use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Sort class of a chromosome name after `chr` stripping.
///
/// Numeric chromosomes come first, then X, Y and M, then everything else by
/// upper-cased name. The variant order is the genomic order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum ChromosomeKey {
    Numeric(u32),
    X,
    Y,
    M,
    Other(Arc<str>),
}

/// Chromosome identifier.
///
/// Keeps the spelling it was created with (`chr1`, `1`, `CHRX`) for display,
/// while equality, hashing and ordering use the normalised key, so `chr1`
/// and `1` are the same chromosome.
#[derive(Debug, Clone)]
pub struct Chromosome {
    name: Arc<str>,
    key: ChromosomeKey,
}

impl Chromosome {
    pub fn new(name: &str) -> Self {
        let trimmed = name.trim();
        Self {
            name: Arc::from(trimmed),
            key: chromosome_key(trimmed),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.name
    }

    /// Name without `chr` prefix, with `MT` folded to `M`.
    pub fn normalized(&self) -> String {
        match &self.key {
            ChromosomeKey::Numeric(num) => num.to_string(),
            ChromosomeKey::X => "X".to_string(),
            ChromosomeKey::Y => "Y".to_string(),
            ChromosomeKey::M => "M".to_string(),
            ChromosomeKey::Other(name) => name.to_string(),
        }
    }

    pub fn is_autosome(&self) -> bool {
        matches!(self.key, ChromosomeKey::Numeric(num) if num > 0)
    }

    pub fn is_gonosome(&self) -> bool {
        matches!(self.key, ChromosomeKey::X | ChromosomeKey::Y)
    }

    pub fn is_x(&self) -> bool {
        self.key == ChromosomeKey::X
    }

    pub fn is_y(&self) -> bool {
        self.key == ChromosomeKey::Y
    }

    pub fn is_m(&self) -> bool {
        self.key == ChromosomeKey::M
    }

    /// Primary assembly chromosome (autosomes, X, Y, M). Alt contigs, decoys
    /// and unplaced scaffolds are special.
    pub fn is_non_special(&self) -> bool {
        !matches!(self.key, ChromosomeKey::Other(_))
    }
}

impl PartialEq for Chromosome {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for Chromosome {}

impl Hash for Chromosome {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl PartialOrd for Chromosome {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Chromosome {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key)
    }
}

impl fmt::Display for Chromosome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl From<&str> for Chromosome {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

fn chromosome_key(raw: &str) -> ChromosomeKey {
    let normalized = strip_chr_prefix(raw);

    if let Some(num) = parse_u32_ascii(normalized.as_bytes()) {
        return ChromosomeKey::Numeric(num);
    }

    if normalized.eq_ignore_ascii_case("X") {
        ChromosomeKey::X
    } else if normalized.eq_ignore_ascii_case("Y") {
        ChromosomeKey::Y
    } else if normalized.eq_ignore_ascii_case("M") || normalized.eq_ignore_ascii_case("MT") {
        ChromosomeKey::M
    } else {
        ChromosomeKey::Other(Arc::from(normalized.to_ascii_uppercase()))
    }
}

fn strip_chr_prefix(raw: &str) -> &str {
    if raw.len() >= 3 {
        let bytes = raw.as_bytes();
        if bytes[0].eq_ignore_ascii_case(&b'c')
            && bytes[1].eq_ignore_ascii_case(&b'h')
            && bytes[2].eq_ignore_ascii_case(&b'r')
        {
            return &raw[3..];
        }
    }
    raw
}

fn parse_u32_ascii(raw: &[u8]) -> Option<u32> {
    if raw.is_empty() {
        return None;
    }

    let mut value: u32 = 0;
    for &byte in raw {
        if !byte.is_ascii_digit() {
            return None;
        }
        value = value.checked_mul(10)?.checked_add(u32::from(byte - b'0'))?;
    }
    Some(value)
}
