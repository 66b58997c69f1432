//! Partial order alignment: a DAG over nucleotide letters in which every
//! inserted sequence is a path, plus the aligner that threads new
//! sequences onto it.

pub mod engine;
pub mod graph;

pub use engine::AlignmentEngine;
pub use graph::{update_alignment, Graph};

/// Alignment between a sequence and a POA graph: ordered
/// `(node_id | -1, seq_pos | -1)` pairs. A `-1` on the graph side marks an
/// insertion (letter present only in the sequence), a `-1` on the sequence
/// side a deletion (node present only in the graph). Unaligned sequence
/// ends are simply omitted.
pub type Alignment = Vec<(i32, i32)>;
