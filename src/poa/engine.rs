use crate::poa::graph::Graph;
use crate::poa::Alignment;

const NEG_INF: i32 = i32::MIN / 2;

const MOVE_NONE: u8 = 0;
const MOVE_DIAG: u8 = 1;
const MOVE_UP: u8 = 2;
const MOVE_LEFT: u8 = 3;

/// Needleman-Wunsch aligner of a sequence against a POA graph.
///
/// The DP runs over the graph's topological order, one row per node plus a
/// virtual origin row; a cell's upper neighbours are the rows of the
/// node's predecessors. The whole sequence must be consumed, the graph
/// side may be soft-clipped at either end. All DP buffers live in the
/// engine and are reused between calls, so one engine serves one worker
/// thread for its lifetime.
pub struct AlignmentEngine {
    match_score: i32,
    mismatch_score: i32,
    gap_score: i32,
    scores: Vec<i32>,
    moves: Vec<u8>,
    move_preds: Vec<u32>,
    rank_of: Vec<u32>,
    pred_rows: Vec<usize>,
}

impl AlignmentEngine {
    pub fn new(match_score: i8, mismatch_score: i8, gap_score: i8) -> Self {
        AlignmentEngine {
            match_score: match_score as i32,
            mismatch_score: mismatch_score as i32,
            gap_score: gap_score as i32,
            scores: Vec::new(),
            moves: Vec::new(),
            move_preds: Vec::new(),
            rank_of: Vec::new(),
            pred_rows: Vec::new(),
        }
    }

    /// Grows the DP buffers for sequences up to `max_sequence_len` aligned
    /// against graphs with roughly `fanout` alternatives per backbone
    /// position, so the hot path never reallocates.
    pub fn prealloc(&mut self, max_sequence_len: usize, fanout: u8) {
        let rows = max_sequence_len * fanout as usize + 1;
        let cells = rows * (max_sequence_len + 1);
        self.scores.reserve(cells.saturating_sub(self.scores.len()));
        self.moves.reserve(cells.saturating_sub(self.moves.len()));
        self.move_preds
            .reserve(cells.saturating_sub(self.move_preds.len()));
    }

    /// Global-in-sequence alignment against the full graph.
    pub fn align(&mut self, sequence: &[u8], graph: &mut Graph) -> Alignment {
        self.align_inner(sequence, graph, usize::MAX)
    }

    /// Banded variant: each node row only considers sequence positions
    /// within `band` of the row's diagonal. Used for short, well-anchored
    /// fragments where the optimum stays near the diagonal.
    pub fn align_banded(&mut self, sequence: &[u8], graph: &mut Graph, band: usize) -> Alignment {
        self.align_inner(sequence, graph, band)
    }

    fn align_inner(&mut self, sequence: &[u8], graph: &mut Graph, band: usize) -> Alignment {
        if sequence.is_empty() || graph.num_nodes() == 0 {
            return Alignment::new();
        }
        graph.topological_sort();
        let sorted = graph.sorted_node_ids();

        let rows = sorted.len() + 1;
        let cols = sequence.len() + 1;
        let cells = rows * cols;

        self.scores.clear();
        self.scores.resize(cells, NEG_INF);
        self.moves.clear();
        self.moves.resize(cells, MOVE_NONE);
        self.move_preds.clear();
        self.move_preds.resize(cells, 0);
        self.rank_of.clear();
        self.rank_of.resize(graph.num_nodes(), 0);
        for (rank, &id) in sorted.iter().enumerate() {
            self.rank_of[id as usize] = rank as u32;
        }

        self.scores[0] = 0;
        for j in 1..cols {
            self.scores[j] = self.gap_score * j as i32;
            self.moves[j] = MOVE_LEFT;
        }

        for (rank, &node_id) in sorted.iter().enumerate() {
            let row = rank + 1;
            let letter = graph.node(node_id).letter();

            self.pred_rows.clear();
            if graph.node(node_id).in_edges().is_empty() {
                self.pred_rows.push(0);
            } else {
                for &e in graph.node(node_id).in_edges() {
                    let begin = graph.edge(e).begin_node_id();
                    self.pred_rows.push(self.rank_of[begin as usize] as usize + 1);
                }
            }

            let (lo, hi) = if band == usize::MAX {
                (0, cols - 1)
            } else {
                let center = row * (cols - 1) / rows.max(1);
                (center.saturating_sub(band), (center + band).min(cols - 1))
            };

            if lo == 0 {
                for p in 0..self.pred_rows.len() {
                    let pr = self.pred_rows[p];
                    let up = self.scores[pr * cols].saturating_add(self.gap_score);
                    if up > self.scores[row * cols] {
                        self.scores[row * cols] = up;
                        self.moves[row * cols] = MOVE_UP;
                        self.move_preds[row * cols] = pr as u32;
                    }
                }
            }

            for j in lo.max(1)..=hi {
                let idx = row * cols + j;
                let substitution = if sequence[j - 1].eq_ignore_ascii_case(&letter) {
                    self.match_score
                } else {
                    self.mismatch_score
                };
                for p in 0..self.pred_rows.len() {
                    let pr = self.pred_rows[p];
                    let diagonal = self.scores[pr * cols + j - 1].saturating_add(substitution);
                    if diagonal > self.scores[idx] {
                        self.scores[idx] = diagonal;
                        self.moves[idx] = MOVE_DIAG;
                        self.move_preds[idx] = pr as u32;
                    }
                    let up = self.scores[pr * cols + j].saturating_add(self.gap_score);
                    if up > self.scores[idx] {
                        self.scores[idx] = up;
                        self.moves[idx] = MOVE_UP;
                        self.move_preds[idx] = pr as u32;
                    }
                }
                let left = self.scores[idx - 1].saturating_add(self.gap_score);
                if left > self.scores[idx] {
                    self.scores[idx] = left;
                    self.moves[idx] = MOVE_LEFT;
                    self.move_preds[idx] = row as u32;
                }
            }
        }

        let mut best_row = 1;
        let mut best_score = NEG_INF;
        for row in 1..rows {
            let score = self.scores[row * cols + cols - 1];
            if score > best_score {
                best_score = score;
                best_row = row;
            }
        }

        let mut alignment = Alignment::new();
        let mut row = best_row;
        let mut col = cols - 1;
        while row > 0 || col > 0 {
            let idx = row * cols + col;
            match self.moves[idx] {
                MOVE_DIAG => {
                    let node_id = sorted[row - 1] as i32;
                    alignment.push((node_id, col as i32 - 1));
                    row = self.move_preds[idx] as usize;
                    col -= 1;
                }
                MOVE_UP => {
                    let node_id = sorted[row - 1] as i32;
                    alignment.push((node_id, -1));
                    row = self.move_preds[idx] as usize;
                }
                MOVE_LEFT => {
                    alignment.push((-1, col as i32 - 1));
                    col -= 1;
                }
                _ => break,
            }
        }
        alignment.reverse();
        alignment
    }
}
