//! Sequence records and strand helpers.

/// Reverse complement of a nucleotide sequence. Ambiguous letters map to
/// themselves, case is preserved for the canonical bases.
pub fn reverse_complement(sequence: &[u8]) -> Vec<u8> {
    sequence
        .iter()
        .rev()
        .map(|&base| match base {
            b'A' => b'T',
            b'C' => b'G',
            b'G' => b'C',
            b'T' => b'A',
            b'a' => b't',
            b'c' => b'g',
            b'g' => b'c',
            b't' => b'a',
            other => other,
        })
        .collect()
}

/// PHRED offset of quality strings handled by the intake layer.
pub const QUALITY_OFFSET: u8 = 33;

/// A named sequence with optional per-letter quality.
///
/// The reverse-complement and reversed-quality buffers are materialized
/// once, by `transmute`, and only when some reverse-strand overlap needs
/// them; `transmute` likewise drops the name and forward buffers that no
/// later stage will read. After that single mutation the record is
/// read-only.
#[derive(Debug)]
pub struct Sequence {
    name: String,
    data: Vec<u8>,
    quality: Vec<u8>,
    reverse_complement: Vec<u8>,
    reverse_quality: Vec<u8>,
}

impl Sequence {
    pub fn new(name: String, data: Vec<u8>, quality: Vec<u8>) -> Self {
        Sequence {
            name,
            data,
            quality,
            reverse_complement: Vec::new(),
            reverse_quality: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Empty when the record carries no quality.
    pub fn quality(&self) -> &[u8] {
        &self.quality
    }

    pub fn reverse_complement(&self) -> &[u8] {
        &self.reverse_complement
    }

    pub fn reverse_quality(&self) -> &[u8] {
        &self.reverse_quality
    }

    /// Drops or materializes representations according to observed usage:
    /// reverse buffers are built when a reverse-strand overlap touches this
    /// sequence, the name and forward buffers are released when nothing
    /// will read them again.
    pub fn transmute(&mut self, keep_name: bool, keep_data: bool, needs_reverse: bool) {
        if needs_reverse {
            self.reverse_complement = reverse_complement(&self.data);
            if !self.quality.is_empty() {
                self.reverse_quality = self.quality.iter().rev().copied().collect();
            }
        }
        if !keep_name {
            self.name = String::new();
        }
        if !keep_data {
            self.data = Vec::new();
            self.quality = Vec::new();
        }
    }
}

/// Mean PHRED value of a quality slice.
pub fn average_quality(quality: &[u8]) -> f64 {
    if quality.is_empty() {
        return 0.0;
    }
    let total: u64 = quality
        .iter()
        .map(|&q| q.saturating_sub(QUALITY_OFFSET) as u64)
        .sum();
    total as f64 / quality.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reverse_complement_basic() {
        assert_eq!(reverse_complement(b"ACGT"), b"ACGT");
        assert_eq!(reverse_complement(b"AACGT"), b"ACGTT");
        assert_eq!(reverse_complement(b"NNA"), b"TNN");
    }

    #[test]
    fn transmute_materializes_reverse_buffers() {
        let mut seq = Sequence::new("r1".into(), b"AACG".to_vec(), b"!!I5".to_vec());
        seq.transmute(true, true, true);
        assert_eq!(seq.reverse_complement(), b"CGTT");
        assert_eq!(seq.reverse_quality(), b"5I!!");
        assert_eq!(seq.data(), b"AACG");
        assert_eq!(seq.name(), "r1");
    }

    #[test]
    fn transmute_drops_unused_representations() {
        let mut seq = Sequence::new("r1".into(), b"AACG".to_vec(), b"!!I5".to_vec());
        seq.transmute(false, false, true);
        assert_eq!(seq.reverse_complement(), b"CGTT");
        assert!(seq.name().is_empty());
        assert!(seq.data().is_empty());
        assert!(seq.quality().is_empty());
    }

    #[test]
    fn average_quality_uses_phred_offset() {
        // '!' is 0, 'I' is 40
        assert_eq!(average_quality(b"!!"), 0.0);
        assert_eq!(average_quality(b"II"), 40.0);
        assert_eq!(average_quality(b"!I"), 20.0);
        assert_eq!(average_quality(b""), 0.0);
    }
}
