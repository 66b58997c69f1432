//! Pairwise overlap records between query reads and target sequences.
//!
//! An overlap is parsed with external names or numeric ids, resolved to
//! internal dense ids by `transmute`, and finally annotated with
//! break-points: the (target, query) coordinates at which the overlap
//! crosses a target window boundary. Break-points are what the polisher
//! uses to route read fragments into windows.

use crate::sequence::Sequence;
use rustc_hash::FxHashMap;

/// Strand orientation of the query relative to the target.
#[derive(Default, PartialEq, Eq, Clone, Copy, Debug)]
pub enum Strand {
    #[default]
    Forward,
    Reverse,
}

/// External identity of an overlap's sequences, before id resolution.
#[derive(Debug, Clone)]
pub enum ExternalIds {
    /// PAF records carry sequence names.
    Names { query: String, target: String },
    /// MHAP records carry numeric ids in order of appearance.
    Ids { query: u64, target: u64 },
}

pub struct Overlap {
    external: Option<ExternalIds>,
    q_id: u32,
    t_id: u32,
    strand: Strand,
    q_begin: u32,
    q_end: u32,
    q_length: u32,
    t_begin: u32,
    t_end: u32,
    t_length: u32,
    error: f64,
    length: u32,
    breaking_points: Vec<(u32, u32)>,
    transmuted: bool,
    resolved: bool,
}

impl Overlap {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        external: ExternalIds,
        strand: Strand,
        q_begin: u32,
        q_end: u32,
        q_length: u32,
        t_begin: u32,
        t_end: u32,
        t_length: u32,
        error: f64,
        length: u32,
    ) -> Self {
        Overlap {
            external: Some(external),
            q_id: 0,
            t_id: 0,
            strand,
            q_begin,
            q_end,
            q_length,
            t_begin,
            t_end,
            t_length,
            error,
            length,
            breaking_points: Vec::new(),
            transmuted: false,
            resolved: false,
        }
    }

    pub fn q_id(&self) -> u32 {
        self.q_id
    }

    pub fn t_id(&self) -> u32 {
        self.t_id
    }

    pub fn strand(&self) -> Strand {
        self.strand
    }

    pub fn error(&self) -> f64 {
        self.error
    }

    pub fn length(&self) -> u32 {
        self.length
    }

    pub fn t_length(&self) -> u32 {
        self.t_length
    }

    pub fn breaking_points(&self) -> &[(u32, u32)] {
        &self.breaking_points
    }

    /// Resolves external names/ids to internal sequence ids. Query names
    /// resolve through their `"q"`-suffixed key, target names through
    /// `"t"`; numeric ids through the pair encoding
    /// `(external_id << 1) | is_target`. Idempotent; a missing side or a
    /// self-overlap leaves the record invalid.
    pub fn transmute(
        &mut self,
        name_to_id: &FxHashMap<String, u64>,
        id_to_id: &FxHashMap<u64, u64>,
    ) {
        if self.transmuted {
            return;
        }
        self.transmuted = true;
        let resolved = match self.external.take() {
            Some(ExternalIds::Names { query, target }) => {
                let q = name_to_id.get(&format!("{}q", query));
                let t = name_to_id.get(&format!("{}t", target));
                match (q, t) {
                    (Some(&q), Some(&t)) => Some((q, t)),
                    _ => None,
                }
            }
            Some(ExternalIds::Ids { query, target }) => {
                let q = id_to_id.get(&(query << 1));
                let t = id_to_id.get(&(target << 1 | 1));
                match (q, t) {
                    (Some(&q), Some(&t)) => Some((q, t)),
                    _ => None,
                }
            }
            None => None,
        };
        if let Some((q, t)) = resolved {
            self.q_id = q as u32;
            self.t_id = t as u32;
            self.resolved = q != t;
        }
    }

    pub fn is_valid(&self, error_threshold: f64) -> bool {
        self.transmuted
            && self.resolved
            && self.error <= error_threshold
            && self.q_begin < self.q_end
            && self.t_begin < self.t_end
    }

    /// Aligns the overlapping spans and records break-points at every
    /// target window boundary: alternating (segment_start, segment_end)
    /// pairs of (target_pos, query_pos), query positions expressed in
    /// strand-adjusted coordinates. Idempotent.
    pub fn find_breaking_points(&mut self, sequences: &[Option<Sequence>], window_length: u32) {
        if !self.breaking_points.is_empty() {
            return;
        }
        let query = sequences[self.q_id as usize].as_ref().unwrap();
        let target = sequences[self.t_id as usize].as_ref().unwrap();

        let query_span = match self.strand {
            Strand::Reverse => {
                let begin = (self.q_length - self.q_end) as usize;
                let end = (self.q_length - self.q_begin) as usize;
                &query.reverse_complement()[begin..end]
            }
            Strand::Forward => &query.data()[self.q_begin as usize..self.q_end as usize],
        };
        let target_span = &target.data()[self.t_begin as usize..self.t_end as usize];

        let ops = alignment_ops(query_span, target_span);
        self.emit_breaking_points(&ops, window_length);
    }

    fn emit_breaking_points(&mut self, ops: &[u8], window_length: u32) {
        let window_length = window_length as i64;
        let mut q_ptr = match self.strand {
            Strand::Reverse => (self.q_length - self.q_end) as i64 - 1,
            Strand::Forward => self.q_begin as i64 - 1,
        };
        let mut t_ptr = self.t_begin as i64 - 1;

        let mut found_first_match = false;
        let mut first_match = (0u32, 0u32);
        let mut last_match = (0u32, 0u32);

        for &op in ops {
            match op {
                b'M' => {
                    q_ptr += 1;
                    t_ptr += 1;
                    if !found_first_match {
                        found_first_match = true;
                        first_match = (t_ptr as u32, q_ptr as u32);
                    }
                    last_match = ((t_ptr + 1) as u32, (q_ptr + 1) as u32);
                    if t_ptr % window_length == window_length - 1 {
                        if found_first_match {
                            self.breaking_points.push(first_match);
                            self.breaking_points.push(last_match);
                        }
                        found_first_match = false;
                    }
                }
                b'I' => {
                    q_ptr += 1;
                }
                b'D' => {
                    t_ptr += 1;
                    if t_ptr % window_length == window_length - 1 {
                        if found_first_match {
                            self.breaking_points.push(first_match);
                            self.breaking_points.push(last_match);
                        }
                        found_first_match = false;
                    }
                }
                _ => unreachable!("unknown alignment op"),
            }
        }
        if found_first_match {
            self.breaking_points.push(first_match);
            self.breaking_points.push(last_match);
        }
    }
}

const OPS_NONE: u8 = 0;
const OPS_DIAG: u8 = 1;
const OPS_UP: u8 = 2;
const OPS_LEFT: u8 = 3;

/// Banded global alignment of `query` against `target`, minimizing edit
/// cost. Returns one op per alignment column: `M` consumes both
/// coordinates, `I` only the query, `D` only the target. The band half
/// width covers the length difference plus drift headroom, which is ample
/// for overlap spans that cover the same region of a genome.
fn alignment_ops(query: &[u8], target: &[u8]) -> Vec<u8> {
    let n = query.len();
    let m = target.len();
    if n == 0 {
        return vec![b'D'; m];
    }
    if m == 0 {
        return vec![b'I'; n];
    }

    let half = (n.abs_diff(m) + 64 + n.max(m) / 8) as i64;
    let width = (2 * half + 1) as usize;
    const INF: u32 = u32::MAX / 2;

    let band = |i: i64| -> (i64, i64) { ((i - half).max(0), (i + half).min(m as i64)) };
    let offset = |i: i64, j: i64| -> usize { (j - (i - half)) as usize };

    let mut moves = vec![OPS_NONE; (n + 1) * width];
    let mut prev_cost = vec![INF; m + 1];
    let mut cost = vec![INF; m + 1];

    let (_, hi0) = band(0);
    for j in 0..=hi0 {
        prev_cost[j as usize] = j as u32;
        if j > 0 {
            moves[offset(0, j)] = OPS_LEFT;
        }
    }

    for i in 1..=n as i64 {
        let (lo, hi) = band(i);
        let (prev_lo, prev_hi) = band(i - 1);
        for j in lo..=hi {
            let mut best = INF;
            let mut best_move = OPS_NONE;
            if j > 0 && j - 1 >= prev_lo && j - 1 <= prev_hi {
                let mismatch =
                    !query[i as usize - 1].eq_ignore_ascii_case(&target[j as usize - 1]);
                let diagonal = prev_cost[j as usize - 1].saturating_add(mismatch as u32);
                if diagonal < best {
                    best = diagonal;
                    best_move = OPS_DIAG;
                }
            }
            if j >= prev_lo && j <= prev_hi {
                let up = prev_cost[j as usize].saturating_add(1);
                if up < best {
                    best = up;
                    best_move = OPS_UP;
                }
            }
            if j > lo {
                let left = cost[j as usize - 1].saturating_add(1);
                if left < best {
                    best = left;
                    best_move = OPS_LEFT;
                }
            }
            cost[j as usize] = best;
            moves[i as usize * width + offset(i, j)] = best_move;
        }
        for j in prev_lo..=prev_hi {
            prev_cost[j as usize] = INF;
        }
        std::mem::swap(&mut prev_cost, &mut cost);
    }

    let mut ops = Vec::with_capacity(n + m);
    let mut i = n as i64;
    let mut j = m as i64;
    while i > 0 || j > 0 {
        match moves[i as usize * width + offset(i, j)] {
            OPS_DIAG => {
                ops.push(b'M');
                i -= 1;
                j -= 1;
            }
            OPS_UP => {
                ops.push(b'I');
                i -= 1;
            }
            OPS_LEFT => {
                ops.push(b'D');
                j -= 1;
            }
            _ => unreachable!("traceback escaped the band"),
        }
    }
    ops.reverse();
    ops
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(query: &str, target: &str) -> ExternalIds {
        ExternalIds::Names {
            query: query.to_string(),
            target: target.to_string(),
        }
    }

    fn seq_table(entries: &[(&str, &[u8])]) -> Vec<Option<Sequence>> {
        entries
            .iter()
            .map(|(name, data)| Some(Sequence::new(name.to_string(), data.to_vec(), Vec::new())))
            .collect()
    }

    #[test]
    fn alignment_ops_identity() {
        let ops = alignment_ops(b"ACGT", b"ACGT");
        assert_eq!(ops, b"MMMM");
    }

    #[test]
    fn alignment_ops_indels() {
        // extra query letter is an insertion, extra target letter a deletion
        assert_eq!(alignment_ops(b"ACGT", b"AGT"), b"MIMM");
        assert_eq!(alignment_ops(b"AGT", b"ACGT"), b"MDMM");
        assert_eq!(alignment_ops(b"", b"ACG"), b"DDD");
        assert_eq!(alignment_ops(b"ACG", b""), b"III");
    }

    #[test]
    fn transmute_resolves_names() {
        let mut name_to_id = FxHashMap::default();
        name_to_id.insert("Qq".to_string(), 1u64);
        name_to_id.insert("Tt".to_string(), 0u64);
        let mut overlap = Overlap::new(named("Q", "T"), Strand::Forward, 0, 8, 8, 0, 8, 8, 0.0, 8);
        overlap.transmute(&name_to_id, &FxHashMap::default());
        assert!(overlap.is_valid(0.3));
        assert_eq!(overlap.q_id(), 1);
        assert_eq!(overlap.t_id(), 0);
    }

    #[test]
    fn transmute_rejects_missing_and_self_overlaps() {
        let mut name_to_id = FxHashMap::default();
        name_to_id.insert("Qq".to_string(), 0u64);
        name_to_id.insert("Qt".to_string(), 0u64);
        let mut missing = Overlap::new(named("X", "Q"), Strand::Forward, 0, 8, 8, 0, 8, 8, 0.0, 8);
        missing.transmute(&name_to_id, &FxHashMap::default());
        assert!(!missing.is_valid(1.0));
        let mut selfish = Overlap::new(named("Q", "Q"), Strand::Forward, 0, 8, 8, 0, 8, 8, 0.0, 8);
        selfish.transmute(&name_to_id, &FxHashMap::default());
        assert!(!selfish.is_valid(1.0));
    }

    #[test]
    fn error_threshold_bounds_validity() {
        let mut name_to_id = FxHashMap::default();
        name_to_id.insert("Qq".to_string(), 1u64);
        name_to_id.insert("Tt".to_string(), 0u64);
        let mut overlap = Overlap::new(named("Q", "T"), Strand::Forward, 0, 8, 8, 0, 8, 8, 0.4, 8);
        overlap.transmute(&name_to_id, &FxHashMap::default());
        assert!(!overlap.is_valid(0.3));
        assert!(overlap.is_valid(0.5));
    }

    #[test]
    fn transmute_resolves_numeric_ids() {
        let mut id_to_id = FxHashMap::default();
        id_to_id.insert(0u64 << 1, 1u64);
        id_to_id.insert(0u64 << 1 | 1, 0u64);
        let external = ExternalIds::Ids { query: 0, target: 0 };
        let mut overlap = Overlap::new(external, Strand::Forward, 0, 8, 8, 0, 8, 8, 0.0, 8);
        overlap.transmute(&FxHashMap::default(), &id_to_id);
        assert!(overlap.is_valid(0.3));
        assert_eq!(overlap.q_id(), 1);
        assert_eq!(overlap.t_id(), 0);
    }

    #[test]
    fn breaking_points_split_at_window_boundaries() {
        let mut name_to_id = FxHashMap::default();
        name_to_id.insert("Qq".to_string(), 1u64);
        name_to_id.insert("Tt".to_string(), 0u64);
        let sequences = seq_table(&[("T", b"ACGTACGT"), ("Q", b"ACGTACGT")]);
        let mut overlap = Overlap::new(named("Q", "T"), Strand::Forward, 0, 8, 8, 0, 8, 8, 0.0, 8);
        overlap.transmute(&name_to_id, &FxHashMap::default());
        overlap.find_breaking_points(&sequences, 4);
        assert_eq!(
            overlap.breaking_points(),
            &[(0, 0), (4, 4), (4, 4), (8, 8)]
        );
    }

    #[test]
    fn breaking_points_respect_reverse_strand() {
        let mut name_to_id = FxHashMap::default();
        name_to_id.insert("Qq".to_string(), 1u64);
        name_to_id.insert("Tt".to_string(), 0u64);
        let target = b"ACGTACGT";
        let query = crate::sequence::reverse_complement(target);
        let mut sequences = seq_table(&[("T", target)]);
        let mut q = Sequence::new("Q".to_string(), query, Vec::new());
        q.transmute(true, true, true);
        sequences.push(Some(q));
        let mut overlap = Overlap::new(named("Q", "T"), Strand::Reverse, 0, 8, 8, 0, 8, 8, 0.0, 8);
        overlap.transmute(&name_to_id, &FxHashMap::default());
        overlap.find_breaking_points(&sequences, 4);
        assert_eq!(
            overlap.breaking_points(),
            &[(0, 0), (4, 4), (4, 4), (8, 8)]
        );
    }

    #[test]
    fn breaking_points_offset_overlap() {
        // overlap covers target[2..8) with a matching query span
        let mut name_to_id = FxHashMap::default();
        name_to_id.insert("Qq".to_string(), 1u64);
        name_to_id.insert("Tt".to_string(), 0u64);
        let sequences = seq_table(&[("T", b"ACGTACGT"), ("Q", b"GTACGT")]);
        let mut overlap = Overlap::new(named("Q", "T"), Strand::Forward, 0, 6, 6, 2, 8, 8, 0.0, 6);
        overlap.transmute(&name_to_id, &FxHashMap::default());
        overlap.find_breaking_points(&sequences, 4);
        assert_eq!(
            overlap.breaking_points(),
            &[(2, 0), (4, 2), (4, 2), (8, 6)]
        );
    }
}
