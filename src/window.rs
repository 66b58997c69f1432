//! A window is a fixed-length slice of a target sequence together with
//! the read fragments layered onto it. Each window builds its own POA
//! graph and emits a local consensus; the polisher stitches these back
//! together in rank order.

use crate::poa::{update_alignment, AlignmentEngine, Graph};
use log::debug;

/// Short-read windows are well anchored and use a banded alignment with a
/// small fan-out; long-read windows run the full POA alignment and have
/// their consensus ends trimmed by coverage.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum WindowType {
    Short,
    Long,
}

#[derive(Debug)]
struct Layer {
    data: Vec<u8>,
    quality: Option<Vec<u8>>,
    begin: u32,
    end: u32,
}

#[derive(Debug)]
pub struct Window {
    id: u64,
    rank: u32,
    window_type: WindowType,
    data: Vec<u8>,
    quality: Option<Vec<u8>>,
    layers: Vec<Layer>,
    consensus: Vec<u8>,
    allele_ratios: Vec<f32>,
}

fn letter_weights(data: &[u8], quality: Option<&[u8]>) -> Vec<f32> {
    match quality {
        Some(quality) => quality
            .iter()
            .map(|&q| q.saturating_sub(crate::sequence::QUALITY_OFFSET) as f32)
            .collect(),
        None => vec![1.0; data.len()],
    }
}

impl Window {
    pub fn new(
        id: u64,
        rank: u32,
        window_type: WindowType,
        data: Vec<u8>,
        quality: Option<Vec<u8>>,
    ) -> Self {
        Window {
            id,
            rank,
            window_type,
            data,
            quality,
            layers: Vec::new(),
            consensus: Vec::new(),
            allele_ratios: Vec::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn rank(&self) -> u32 {
        self.rank
    }

    pub fn consensus(&self) -> &[u8] {
        &self.consensus
    }

    /// Per consensus position, the weight share of the chosen letter
    /// within its alignment column. Empty until `generate_consensus`.
    pub fn allele_ratios(&self) -> &[f32] {
        &self.allele_ratios
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    /// Appends a read fragment spanning the inclusive window offsets
    /// `[begin, end]`.
    pub fn add_layer(&mut self, data: Vec<u8>, quality: Option<Vec<u8>>, begin: u32, end: u32) {
        debug_assert!(begin <= end && (end as usize) < self.data.len());
        debug_assert!(quality.as_ref().map_or(true, |q| q.len() == data.len()));
        self.layers.push(Layer {
            data,
            quality,
            begin,
            end,
        });
    }

    /// Builds the window POA and replaces the backbone with its
    /// consensus. Returns `false` — leaving the backbone in place — when
    /// the window cannot be polished: no layers, or a consensus path with
    /// more gap columns than `allowed_gap_percent` allows.
    pub fn generate_consensus(
        &mut self,
        engine: &mut AlignmentEngine,
        min_coverage: u32,
        allowed_gap_percent: u8,
    ) -> bool {
        if self.layers.is_empty() {
            self.consensus = self.data.clone();
            return false;
        }

        let backbone_weights = letter_weights(&self.data, self.quality.as_deref());
        let mut graph = Graph::from_sequence(&self.data, &backbone_weights);

        let mut order: Vec<usize> = (0..self.layers.len()).collect();
        order.sort_by_key(|&i| self.layers[i].begin);

        // fragments reaching both window borders align against the whole
        // graph, the rest only against the subgraph of their span
        let margin = self.data.len() as u32 / 100;
        let last_offset = self.data.len() as u32 - 1;
        for &i in &order {
            let layer = &self.layers[i];
            if layer.data.is_empty() {
                continue;
            }
            let weights = letter_weights(&layer.data, layer.quality.as_deref());
            let spans_whole = layer.begin < margin && layer.end > last_offset - margin;
            let alignment = if spans_whole {
                self.align_layer(engine, &layer.data, &mut graph)
            } else {
                let (mut subgraph, mapping) = graph.subgraph(layer.begin, layer.end);
                let mut alignment = self.align_layer(engine, &layer.data, &mut subgraph);
                update_alignment(&mut alignment, &mapping);
                alignment
            };
            graph.add_alignment(&alignment, &layer.data, &weights);
        }

        let (consensus, coverages) = graph.generate_consensus_with_coverages();

        // every path node owns one MSA column, so the columns the bundle
        // skips are exactly the gaps on the chosen path
        let columns = graph.num_alignment_columns();
        let gap_columns = columns - consensus.len();
        if gap_columns * 100 > columns * allowed_gap_percent as usize {
            debug!(
                "window {}:{} unpolished, {}/{} gap columns",
                self.id, self.rank, gap_columns, columns
            );
            self.consensus = self.data.clone();
            return false;
        }

        let mut begin = 0usize;
        let mut end = consensus.len();
        if self.window_type == WindowType::Long && min_coverage > 0 {
            while begin < end && coverages[begin] < min_coverage {
                begin += 1;
            }
            while end > begin && coverages[end - 1] < min_coverage {
                end -= 1;
            }
        }
        self.consensus = consensus[begin..end].to_vec();

        let path = &graph.consensus_node_ids()[begin..end];
        self.allele_ratios = path
            .iter()
            .map(|&node_id| {
                let own = graph.node_weight(node_id);
                let column: f32 = graph
                    .node(node_id)
                    .aligned_node_ids()
                    .iter()
                    .map(|&a| graph.node_weight(a))
                    .sum::<f32>()
                    + own;
                if column > 0.0 {
                    own / column
                } else {
                    1.0
                }
            })
            .collect();

        true
    }

    fn align_layer(
        &self,
        engine: &mut AlignmentEngine,
        data: &[u8],
        graph: &mut Graph,
    ) -> crate::poa::Alignment {
        match self.window_type {
            WindowType::Short => {
                let band = 64 + data.len() / 8;
                engine.align_banded(data, graph, band)
            }
            WindowType::Long => engine.align(data, graph),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> AlignmentEngine {
        AlignmentEngine::new(3, -5, -4)
    }

    #[test]
    fn window_without_layers_keeps_backbone() {
        let mut window = Window::new(0, 0, WindowType::Long, b"ACGTACGT".to_vec(), None);
        assert!(!window.generate_consensus(&mut engine(), 0, 30));
        assert_eq!(window.consensus(), b"ACGTACGT");
        assert!(window.allele_ratios().is_empty());
    }

    #[test]
    fn single_perfect_layer_polishes() {
        let mut window = Window::new(0, 0, WindowType::Long, b"ACGTACGT".to_vec(), None);
        window.add_layer(b"ACGTACGT".to_vec(), None, 0, 7);
        assert!(window.generate_consensus(&mut engine(), 0, 30));
        assert_eq!(window.consensus(), b"ACGTACGT");
        assert_eq!(window.allele_ratios().len(), 8);
        assert!(window.allele_ratios().iter().all(|&r| r == 1.0));
    }

    #[test]
    fn majority_corrects_single_error() {
        let mut window = Window::new(0, 0, WindowType::Long, b"ACGTACGT".to_vec(), None);
        for _ in 0..3 {
            window.add_layer(b"ACGTACGT".to_vec(), None, 0, 7);
        }
        window.add_layer(b"ACGAACGT".to_vec(), None, 0, 7);
        assert!(window.generate_consensus(&mut engine(), 0, 30));
        assert_eq!(window.consensus(), b"ACGTACGT");
        // the competing letter dilutes the allele ratio at its column
        assert!(window.allele_ratios().iter().any(|&r| r < 1.0));
    }

    #[test]
    fn partial_layer_aligns_against_subgraph() {
        let mut window = Window::new(0, 0, WindowType::Long, b"ACGTACGTACGT".to_vec(), None);
        window.add_layer(b"TACG".to_vec(), None, 3, 6);
        assert!(window.generate_consensus(&mut engine(), 0, 30));
        assert_eq!(window.consensus(), b"ACGTACGTACGT");
    }

    #[test]
    fn quality_weighted_majority_beats_headcount() {
        // two low-quality layers vote A, one high-quality layer votes T
        let mut window = Window::new(0, 0, WindowType::Long, b"CCTCC".to_vec(), Some(b"(((((".to_vec()));
        window.add_layer(b"CCACC".to_vec(), Some(b"##%##".to_vec()), 0, 4);
        window.add_layer(b"CCACC".to_vec(), Some(b"##%##".to_vec()), 0, 4);
        window.add_layer(b"CCTCC".to_vec(), Some(b"IIIII".to_vec()), 0, 4);
        assert!(window.generate_consensus(&mut engine(), 0, 30));
        assert_eq!(window.consensus(), b"CCTCC");
    }

    #[test]
    fn coverage_trim_drops_thin_ends() {
        // layers cover only the middle of the backbone
        let mut window = Window::new(0, 0, WindowType::Long, b"AACCGGTTAACC".to_vec(), None);
        for _ in 0..3 {
            window.add_layer(b"GGTT".to_vec(), None, 4, 7);
        }
        assert!(window.generate_consensus(&mut engine(), 3, 100));
        assert_eq!(window.consensus(), b"GGTT");
        assert_eq!(window.allele_ratios().len(), 4);
    }

    #[test]
    fn insertion_columns_count_against_gap_budget() {
        // one layer inserts TTT; the bundle keeps the backbone, so the
        // three insertion columns are gaps on the chosen path (3/11)
        let build = || {
            let mut window = Window::new(0, 0, WindowType::Long, b"ACGTACGT".to_vec(), None);
            window.add_layer(b"ACGTACGT".to_vec(), None, 0, 7);
            window.add_layer(b"ACGTACGT".to_vec(), None, 0, 7);
            window.add_layer(b"ACGTTTTACGT".to_vec(), None, 0, 7);
            window
        };

        let mut strict = build();
        assert!(!strict.generate_consensus(&mut engine(), 0, 25));
        assert_eq!(strict.consensus(), b"ACGTACGT");

        let mut permissive = build();
        assert!(permissive.generate_consensus(&mut engine(), 0, 30));
        assert_eq!(permissive.consensus(), b"ACGTACGT");
    }

    #[test]
    fn short_windows_use_banded_alignment() {
        let mut window = Window::new(0, 0, WindowType::Short, b"ACGTACGT".to_vec(), None);
        window.add_layer(b"ACGTACGT".to_vec(), None, 0, 7);
        assert!(window.generate_consensus(&mut engine(), 0, 30));
        assert_eq!(window.consensus(), b"ACGTACGT");
    }
}
