use crate::poa::Alignment;
use rustc_hash::FxHashSet;
use std::io;

/// A single letter of the partial order graph.
///
/// Adjacency lists hold indices into the graph's edge arena, so an edge is
/// shared by its two endpoints without owning pointers in either direction.
pub struct Node {
    letter: u8,
    in_edges: Vec<usize>,
    out_edges: Vec<usize>,
    aligned_node_ids: Vec<u32>,
}

impl Node {
    fn new(letter: u8) -> Self {
        Node {
            letter,
            in_edges: Vec::new(),
            out_edges: Vec::new(),
            aligned_node_ids: Vec::new(),
        }
    }

    pub fn letter(&self) -> u8 {
        self.letter
    }

    pub fn in_edges(&self) -> &[usize] {
        &self.in_edges
    }

    pub fn out_edges(&self) -> &[usize] {
        &self.out_edges
    }

    /// Other nodes occupying the same alignment column (mismatching
    /// alternatives). Symmetric and transitive within a column.
    pub fn aligned_node_ids(&self) -> &[u32] {
        &self.aligned_node_ids
    }
}

/// A directed weighted edge. The weight accumulates one contribution per
/// sequence traversing the edge and never decreases; `labels` records
/// which sequences those were.
pub struct Edge {
    begin_node_id: u32,
    end_node_id: u32,
    weight: f32,
    labels: Vec<u32>,
}

impl Edge {
    pub fn begin_node_id(&self) -> u32 {
        self.begin_node_id
    }

    pub fn end_node_id(&self) -> u32 {
        self.end_node_id
    }

    pub fn weight(&self) -> f32 {
        self.weight
    }

    pub fn labels(&self) -> &[u32] {
        &self.labels
    }
}

/// Partial order alignment graph.
///
/// Sequences are inserted either as a seed chain (`from_sequence`) or
/// threaded onto the existing graph along a precomputed alignment
/// (`add_alignment`). The graph stays acyclic by construction; the
/// topological order is cached and recomputed lazily after structural
/// mutations.
#[derive(Default)]
pub struct Graph {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    alphabet: FxHashSet<u8>,
    num_sequences: u32,
    sequence_start_node_ids: Vec<u32>,
    sorted_node_ids: Vec<u32>,
    is_sorted: bool,
    consensus: Vec<u32>,
}

impl Graph {
    pub fn new() -> Self {
        Graph::default()
    }

    /// Seeds a graph with a linear chain over `sequence`, one node per
    /// letter, consecutive nodes joined by an edge weighted with the
    /// smaller of the two endpoint weights.
    pub fn from_sequence(sequence: &[u8], weights: &[f32]) -> Self {
        let mut graph = Graph::new();
        graph.add_alignment(&[], sequence, weights);
        graph
    }

    pub fn node(&self, id: u32) -> &Node {
        &self.nodes[id as usize]
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn edge(&self, index: usize) -> &Edge {
        &self.edges[index]
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn num_sequences(&self) -> u32 {
        self.num_sequences
    }

    pub fn alphabet(&self) -> &FxHashSet<u8> {
        &self.alphabet
    }

    pub fn sequence_start_node_ids(&self) -> &[u32] {
        &self.sequence_start_node_ids
    }

    /// Node ids of the most recently generated consensus path.
    pub fn consensus_node_ids(&self) -> &[u32] {
        &self.consensus
    }

    /// Topological order computed by the latest `topological_sort`.
    pub fn sorted_node_ids(&self) -> &[u32] {
        debug_assert!(self.is_sorted);
        &self.sorted_node_ids
    }

    fn add_node(&mut self, letter: u8) -> u32 {
        let id = self.nodes.len() as u32;
        self.nodes.push(Node::new(letter));
        self.alphabet.insert(letter);
        self.is_sorted = false;
        id
    }

    fn add_edge(&mut self, begin_node_id: u32, end_node_id: u32, weight: f32, label: u32) {
        debug_assert_ne!(begin_node_id, end_node_id);
        let existing = self.nodes[begin_node_id as usize]
            .out_edges
            .iter()
            .copied()
            .find(|&e| self.edges[e].end_node_id == end_node_id);
        match existing {
            Some(e) => {
                self.edges[e].weight += weight;
                self.edges[e].labels.push(label);
            }
            None => {
                let e = self.edges.len();
                self.edges.push(Edge {
                    begin_node_id,
                    end_node_id,
                    weight,
                    labels: vec![label],
                });
                self.nodes[begin_node_id as usize].out_edges.push(e);
                self.nodes[end_node_id as usize].in_edges.push(e);
                self.is_sorted = false;
            }
        }
    }

    /// Appends `sequence[begin..end]` as a fresh chain labeled `label` and
    /// returns the id of its first node, or -1 for an empty range.
    fn add_sequence_chain(
        &mut self,
        label: u32,
        sequence: &[u8],
        weights: &[f32],
        begin: usize,
        end: usize,
    ) -> i32 {
        if begin == end {
            return -1;
        }
        let first = self.add_node(sequence[begin]);
        let mut prev = first;
        for i in begin + 1..end {
            let node = self.add_node(sequence[i]);
            self.add_edge(prev, node, weights[i - 1].min(weights[i]), label);
            prev = node;
        }
        first as i32
    }

    /// Threads `sequence` onto the graph along `alignment`.
    ///
    /// Matching letters reuse the aligned node, mismatches reuse a member
    /// of the node's aligned-set with the right letter or open a new one
    /// (extending the column closure), insertions always open a new node.
    /// Unaligned sequence ends become fresh chains hanging off the aligned
    /// region. Every traversed edge gains the smaller of its two endpoint
    /// weights.
    pub fn add_alignment(&mut self, alignment: &[(i32, i32)], sequence: &[u8], weights: &[f32]) {
        assert_eq!(sequence.len(), weights.len());
        if sequence.is_empty() {
            return;
        }
        let label = self.num_sequences;
        self.num_sequences += 1;

        let valid: Vec<usize> = alignment
            .iter()
            .filter(|pair| pair.1 != -1)
            .map(|pair| pair.1 as usize)
            .collect();
        if valid.is_empty() {
            let first = self.add_sequence_chain(label, sequence, weights, 0, sequence.len());
            self.sequence_start_node_ids.push(first as u32);
            return;
        }
        let first_valid = valid[0];
        let last_valid = *valid.last().unwrap();

        let nodes_before = self.nodes.len();
        let mut begin_node_id = self.add_sequence_chain(label, sequence, weights, 0, first_valid);
        let mut head_node_id: i32 = if self.nodes.len() == nodes_before {
            -1
        } else {
            self.nodes.len() as i32 - 1
        };
        let tail_node_id =
            self.add_sequence_chain(label, sequence, weights, last_valid + 1, sequence.len());

        let mut prev_weight = if head_node_id == -1 {
            0.0
        } else {
            weights[first_valid - 1]
        };

        for &(node_id, seq_pos) in alignment {
            if seq_pos == -1 {
                continue;
            }
            let pos = seq_pos as usize;
            let letter = sequence[pos];

            let new_node_id = if node_id == -1 {
                self.add_node(letter)
            } else {
                let node_id = node_id as u32;
                if self.nodes[node_id as usize].letter == letter {
                    node_id
                } else {
                    let aligned = self.nodes[node_id as usize]
                        .aligned_node_ids
                        .iter()
                        .copied()
                        .find(|&a| self.nodes[a as usize].letter == letter);
                    match aligned {
                        Some(a) => a,
                        None => {
                            let new_id = self.add_node(letter);
                            let mut column = self.nodes[node_id as usize].aligned_node_ids.clone();
                            column.push(node_id);
                            for &member in &column {
                                self.nodes[member as usize].aligned_node_ids.push(new_id);
                            }
                            self.nodes[new_id as usize].aligned_node_ids = column;
                            new_id
                        }
                    }
                }
            };

            if begin_node_id == -1 {
                begin_node_id = new_node_id as i32;
            }
            if head_node_id != -1 {
                self.add_edge(
                    head_node_id as u32,
                    new_node_id,
                    prev_weight.min(weights[pos]),
                    label,
                );
            }
            head_node_id = new_node_id as i32;
            prev_weight = weights[pos];
        }

        if tail_node_id != -1 {
            self.add_edge(
                head_node_id as u32,
                tail_node_id as u32,
                weights[last_valid].min(weights[last_valid + 1]),
                label,
            );
        }

        self.sequence_start_node_ids.push(begin_node_id as u32);
    }

    /// Orders nodes so that every edge points forward and every
    /// aligned-set occupies a consecutive run. Cached; cheap when nothing
    /// changed since the last call.
    pub fn topological_sort(&mut self) {
        if self.is_sorted {
            return;
        }
        self.sorted_node_ids.clear();

        // 0 - unmarked, 1 - on the current path, 2 - done
        let mut marks = vec![0u8; self.nodes.len()];
        let mut expand_aligned = vec![true; self.nodes.len()];
        let mut stack: Vec<u32> = Vec::new();

        for i in 0..self.nodes.len() as u32 {
            if marks[i as usize] != 0 {
                continue;
            }
            stack.push(i);
            while let Some(&node_id) = stack.last() {
                let ni = node_id as usize;
                if marks[ni] == 2 {
                    stack.pop();
                    continue;
                }
                let mut ready = true;
                for &e in &self.nodes[ni].in_edges {
                    let begin = self.edges[e].begin_node_id;
                    if marks[begin as usize] != 2 {
                        stack.push(begin);
                        ready = false;
                    }
                }
                if expand_aligned[ni] {
                    for &a in &self.nodes[ni].aligned_node_ids {
                        if marks[a as usize] != 2 {
                            stack.push(a);
                            expand_aligned[a as usize] = false;
                            ready = false;
                        }
                    }
                }
                assert!(ready || marks[ni] != 1, "cycle in partial order graph");
                marks[ni] = 1;
                if ready {
                    marks[ni] = 2;
                    if expand_aligned[ni] {
                        self.sorted_node_ids.push(node_id);
                        for &a in &self.nodes[ni].aligned_node_ids {
                            self.sorted_node_ids.push(a);
                        }
                    }
                    stack.pop();
                }
            }
        }
        self.is_sorted = true;
    }

    /// `topological_sort` plus an explicit post-check that every edge
    /// respects the produced ranks. Used after mutations that must not be
    /// trusted blindly.
    pub fn topological_sort_rigorous(&mut self) -> io::Result<()> {
        self.topological_sort();
        if !self.is_topologically_sorted() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "topological order inconsistent with graph edges",
            ));
        }
        Ok(())
    }

    /// Verifies invariant (d): rank(u) < rank(v) for every edge (u, v).
    pub fn is_topologically_sorted(&self) -> bool {
        if !self.is_sorted || self.sorted_node_ids.len() != self.nodes.len() {
            return false;
        }
        let mut rank = vec![0u32; self.nodes.len()];
        for (r, &id) in self.sorted_node_ids.iter().enumerate() {
            rank[id as usize] = r as u32;
        }
        self.edges
            .iter()
            .all(|e| rank[e.begin_node_id as usize] < rank[e.end_node_id as usize])
    }

    /// Extracts the induced subgraph over nodes reachable from
    /// `begin_node_id` that can reach `end_node_id`. Returns the new graph
    /// and the mapping from its node ids back to ids in `self` (for
    /// translating alignments with [`update_alignment`]).
    pub fn subgraph(&self, begin_node_id: u32, end_node_id: u32) -> (Graph, Vec<i32>) {
        let n = self.nodes.len();

        let mut forward = vec![false; n];
        let mut stack = vec![begin_node_id];
        while let Some(id) = stack.pop() {
            if forward[id as usize] {
                continue;
            }
            forward[id as usize] = true;
            for &e in &self.nodes[id as usize].out_edges {
                stack.push(self.edges[e].end_node_id);
            }
        }

        let mut backward = vec![false; n];
        stack.push(end_node_id);
        while let Some(id) = stack.pop() {
            if backward[id as usize] {
                continue;
            }
            backward[id as usize] = true;
            for &e in &self.nodes[id as usize].in_edges {
                stack.push(self.edges[e].begin_node_id);
            }
        }

        let kept: Vec<u32> = (0..n as u32)
            .filter(|&id| forward[id as usize] && backward[id as usize])
            .collect();

        let mut graph_to_subgraph = vec![-1i32; n];
        for (new_id, &old_id) in kept.iter().enumerate() {
            graph_to_subgraph[old_id as usize] = new_id as i32;
        }

        let mut subgraph = Graph::new();
        for &old_id in &kept {
            subgraph.add_node(self.nodes[old_id as usize].letter);
        }
        for (new_id, &old_id) in kept.iter().enumerate() {
            subgraph.nodes[new_id].aligned_node_ids = self.nodes[old_id as usize]
                .aligned_node_ids
                .iter()
                .filter(|&&a| graph_to_subgraph[a as usize] != -1)
                .map(|&a| graph_to_subgraph[a as usize] as u32)
                .collect();
            for &e in &self.nodes[old_id as usize].out_edges {
                let edge = &self.edges[e];
                let end = graph_to_subgraph[edge.end_node_id as usize];
                if end != -1 {
                    let idx = subgraph.edges.len();
                    subgraph.edges.push(Edge {
                        begin_node_id: new_id as u32,
                        end_node_id: end as u32,
                        weight: edge.weight,
                        labels: Vec::new(),
                    });
                    subgraph.nodes[new_id].out_edges.push(idx);
                    subgraph.nodes[end as usize].in_edges.push(idx);
                }
            }
        }

        let mapping: Vec<i32> = kept.iter().map(|&id| id as i32).collect();
        (subgraph, mapping)
    }

    /// Assigns every node its MSA column: members of an aligned-set share
    /// one column, otherwise a node sits one past the largest column among
    /// its predecessors. Returns the per-node columns and the column
    /// count.
    fn assign_msa_columns(&mut self) -> (Vec<i32>, usize) {
        self.topological_sort();

        let n = self.nodes.len();
        let mut node_column = vec![-1i32; n];
        let mut num_columns = 0usize;
        for idx in 0..self.sorted_node_ids.len() {
            let node_id = self.sorted_node_ids[idx];
            if node_column[node_id as usize] != -1 {
                continue;
            }
            let mut column = 0i32;
            let mut members = vec![node_id];
            members.extend_from_slice(&self.nodes[node_id as usize].aligned_node_ids);
            for &member in &members {
                for &e in &self.nodes[member as usize].in_edges {
                    let begin = self.edges[e].begin_node_id;
                    column = column.max(node_column[begin as usize] + 1);
                }
            }
            for &member in &members {
                node_column[member as usize] = column;
            }
            num_columns = num_columns.max(column as usize + 1);
        }
        (node_column, num_columns)
    }

    /// Number of columns the MSA of this graph spans. Columns strictly
    /// increase along every edge, so a path of length k covers k distinct
    /// columns and skips the remaining ones.
    pub fn num_alignment_columns(&mut self) -> usize {
        self.assign_msa_columns().1
    }

    /// Multiple sequence alignment: one row per inserted sequence, all of
    /// equal length, gap `-` where the sequence skips a column. With
    /// `include_consensus` a final row holds the heaviest-bundle path.
    pub fn generate_msa(&mut self, include_consensus: bool) -> Vec<Vec<u8>> {
        let (node_column, num_columns) = self.assign_msa_columns();

        let mut msa = Vec::with_capacity(self.num_sequences as usize);
        for label in 0..self.num_sequences {
            let mut row = vec![b'-'; num_columns];
            let mut node_id = self.sequence_start_node_ids[label as usize] as usize;
            loop {
                row[node_column[node_id] as usize] = self.nodes[node_id].letter;
                let next = self.nodes[node_id]
                    .out_edges
                    .iter()
                    .copied()
                    .find(|&e| self.edges[e].labels.contains(&label));
                match next {
                    Some(e) => node_id = self.edges[e].end_node_id as usize,
                    None => break,
                }
            }
            msa.push(row);
        }

        if include_consensus {
            self.traverse_heaviest_bundle();
            let mut row = vec![b'-'; num_columns];
            for &node_id in &self.consensus {
                row[node_column[node_id as usize] as usize] = self.nodes[node_id as usize].letter;
            }
            msa.push(row);
        }
        msa
    }

    /// Heaviest-bundle consensus: the path maximizing summed edge weights,
    /// refined by branch completion at forks.
    pub fn generate_consensus(&mut self) -> Vec<u8> {
        self.traverse_heaviest_bundle();
        self.consensus
            .iter()
            .map(|&id| self.nodes[id as usize].letter)
            .collect()
    }

    /// Consensus plus, per output position, the summed weight of the path
    /// edges incident to the chosen node.
    pub fn generate_consensus_with_coverages(&mut self) -> (Vec<u8>, Vec<u32>) {
        let consensus = self.generate_consensus();
        let mut coverages = Vec::with_capacity(self.consensus.len());
        for (i, &node_id) in self.consensus.iter().enumerate() {
            let mut total = 0.0f32;
            if i > 0 {
                total += self.edge_weight_between(self.consensus[i - 1], node_id);
            }
            if i + 1 < self.consensus.len() {
                total += self.edge_weight_between(node_id, self.consensus[i + 1]);
            }
            coverages.push(total.round() as u32);
        }
        (consensus, coverages)
    }

    /// Summed in-edge weight of a node; source nodes report their out-edge
    /// weight instead.
    pub fn node_weight(&self, id: u32) -> f32 {
        let node = &self.nodes[id as usize];
        let edges = if node.in_edges.is_empty() {
            &node.out_edges
        } else {
            &node.in_edges
        };
        edges.iter().map(|&e| self.edges[e].weight).sum()
    }

    fn edge_weight_between(&self, begin_node_id: u32, end_node_id: u32) -> f32 {
        self.nodes[begin_node_id as usize]
            .out_edges
            .iter()
            .copied()
            .find(|&e| self.edges[e].end_node_id == end_node_id)
            .map(|e| self.edges[e].weight)
            .unwrap_or(0.0)
    }

    fn traverse_heaviest_bundle(&mut self) {
        self.consensus.clear();
        if self.nodes.is_empty() {
            return;
        }
        self.topological_sort();

        let n = self.nodes.len();
        let mut predecessors = vec![-1i32; n];
        let mut scores = vec![-1.0f32; n];
        let mut max_score_id = self.sorted_node_ids[0];

        let pred_score = |scores: &[f32], p: i32| -> f32 {
            if p < 0 {
                f32::MIN
            } else {
                scores[p as usize]
            }
        };

        for &node_id in &self.sorted_node_ids {
            let ni = node_id as usize;
            for &e in &self.nodes[ni].in_edges {
                let edge = &self.edges[e];
                let begin = edge.begin_node_id as usize;
                if scores[ni] < edge.weight
                    || (scores[ni] == edge.weight
                        && pred_score(&scores, predecessors[ni]) <= scores[begin])
                {
                    scores[ni] = edge.weight;
                    predecessors[ni] = begin as i32;
                }
            }
            if predecessors[ni] != -1 {
                scores[ni] += scores[predecessors[ni] as usize];
            }
            if scores[max_score_id as usize] < scores[ni] {
                max_score_id = node_id;
            }
        }

        if !self.nodes[max_score_id as usize].out_edges.is_empty() {
            let mut rank_of = vec![0u32; n];
            for (r, &id) in self.sorted_node_ids.iter().enumerate() {
                rank_of[id as usize] = r as u32;
            }
            while !self.nodes[max_score_id as usize].out_edges.is_empty() {
                let next = self.branch_completion(
                    &mut scores,
                    &mut predecessors,
                    rank_of[max_score_id as usize],
                );
                if next == max_score_id {
                    break;
                }
                max_score_id = next;
            }
        }

        let mut id = max_score_id as i32;
        while id != -1 {
            self.consensus.push(id as u32);
            id = predecessors[id as usize];
        }
        self.consensus.reverse();
    }

    /// Re-scores everything past `rank` with the competing parents of the
    /// current bundle head invalidated, so the traversal commits to the
    /// branch whose completion is heaviest. Returns the new bundle end.
    fn branch_completion(
        &self,
        scores: &mut [f32],
        predecessors: &mut [i32],
        rank: u32,
    ) -> u32 {
        let node_id = self.sorted_node_ids[rank as usize];
        for &e in &self.nodes[node_id as usize].out_edges {
            let end = self.edges[e].end_node_id;
            for &o in &self.nodes[end as usize].in_edges {
                let begin = self.edges[o].begin_node_id;
                if begin != node_id {
                    scores[begin as usize] = -1.0;
                }
            }
        }

        let pred_score = |scores: &[f32], p: i32| -> f32 {
            if p < 0 {
                f32::MIN
            } else {
                scores[p as usize]
            }
        };

        let mut max_score = 0.0f32;
        let mut max_score_id = node_id;
        for &id in &self.sorted_node_ids[rank as usize + 1..] {
            let ni = id as usize;
            scores[ni] = -1.0;
            predecessors[ni] = -1;
            for &e in &self.nodes[ni].in_edges {
                let edge = &self.edges[e];
                let begin = edge.begin_node_id as usize;
                if scores[begin] == -1.0 {
                    continue;
                }
                if scores[ni] < edge.weight
                    || (scores[ni] == edge.weight
                        && pred_score(scores, predecessors[ni]) <= scores[begin])
                {
                    scores[ni] = edge.weight;
                    predecessors[ni] = begin as i32;
                }
            }
            if predecessors[ni] != -1 {
                scores[ni] += scores[predecessors[ni] as usize];
            }
            if max_score < scores[ni] {
                max_score = scores[ni];
                max_score_id = id;
            }
        }
        max_score_id
    }
}

/// Translates node ids of an alignment computed against a subgraph back
/// to ids in the parent graph, using the mapping `subgraph` returned.
pub fn update_alignment(alignment: &mut Alignment, subgraph_to_graph: &[i32]) {
    for pair in alignment.iter_mut() {
        if pair.0 != -1 {
            pair.0 = subgraph_to_graph[pair.0 as usize];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_weights(len: usize) -> Vec<f32> {
        vec![1.0; len]
    }

    fn edge_between(graph: &Graph, begin: u32, end: u32) -> Option<&Edge> {
        graph.node(begin).out_edges().iter().copied().map(|e| graph.edge(e)).find(|e| e.end_node_id() == end)
    }

    #[test]
    fn seed_creates_linear_chain() {
        let graph = Graph::from_sequence(b"ACGT", &unit_weights(4));
        assert_eq!(graph.num_nodes(), 4);
        assert_eq!(graph.num_sequences(), 1);
        assert_eq!(graph.sequence_start_node_ids(), &[0]);
        for i in 0..3u32 {
            let edge = edge_between(&graph, i, i + 1).unwrap();
            assert_eq!(edge.weight(), 1.0);
            assert_eq!(edge.labels(), &[0]);
        }
        assert!(graph.node(3).out_edges().is_empty());
        assert_eq!(graph.alphabet().len(), 4);
    }

    #[test]
    fn adjacency_lists_are_mutual() {
        let mut graph = Graph::from_sequence(b"ACGT", &unit_weights(4));
        graph.add_alignment(&[(0, 0), (1, 1), (2, 2), (3, 3)], b"ATGT", &unit_weights(4));
        for (idx, edge) in graph.edges.iter().enumerate() {
            let outs = graph.node(edge.begin_node_id()).out_edges();
            let ins = graph.node(edge.end_node_id()).in_edges();
            assert_eq!(outs.iter().filter(|&&e| e == idx).count(), 1);
            assert_eq!(ins.iter().filter(|&&e| e == idx).count(), 1);
        }
    }

    #[test]
    fn reinserting_a_sequence_doubles_edge_weights() {
        let mut graph = Graph::from_sequence(b"ACGT", &unit_weights(4));
        let alignment = vec![(0, 0), (1, 1), (2, 2), (3, 3)];
        graph.add_alignment(&alignment, b"ACGT", &unit_weights(4));
        assert_eq!(graph.num_nodes(), 4);
        for i in 0..3u32 {
            assert_eq!(edge_between(&graph, i, i + 1).unwrap().weight(), 2.0);
        }
        assert_eq!(graph.generate_consensus(), b"ACGT");
    }

    #[test]
    fn mismatch_opens_aligned_node() {
        // "AC" + "AG" via insertion of G: nodes A(0), C(1), G(2); the
        // heaviest bundle breaks the tie toward the earlier node.
        let mut graph = Graph::from_sequence(b"AC", &unit_weights(2));
        graph.add_alignment(&[(0, 0), (-1, 1)], b"AG", &unit_weights(2));
        assert_eq!(graph.num_nodes(), 3);
        assert_eq!(graph.node(2).letter(), b'G');
        assert_eq!(graph.generate_consensus(), b"AC");
    }

    #[test]
    fn aligned_set_closure_is_symmetric() {
        let mut graph = Graph::from_sequence(b"AAC", &unit_weights(3));
        graph.add_alignment(&[(0, 0), (1, 1), (2, 2)], b"AGC", &unit_weights(3));
        // G (node 3) mismatches A (node 1)
        assert_eq!(graph.node(3).aligned_node_ids(), &[1]);
        assert_eq!(graph.node(1).aligned_node_ids(), &[3]);
        // a third letter joins the same column and closes over both
        graph.add_alignment(&[(0, 0), (1, 1), (2, 2)], b"ATC", &unit_weights(3));
        let mut column = graph.node(4).aligned_node_ids().to_vec();
        column.sort_unstable();
        assert_eq!(column, vec![1, 3]);
        assert!(graph.node(1).aligned_node_ids().contains(&4));
        assert!(graph.node(3).aligned_node_ids().contains(&4));
    }

    #[test]
    fn topological_sort_respects_edges() {
        let mut graph = Graph::from_sequence(b"ACGTACGT", &unit_weights(8));
        graph.add_alignment(
            &[(0, 0), (1, 1), (2, 2), (3, 3), (4, 4), (5, 5), (6, 6), (7, 7)],
            b"ACGAACGT",
            &unit_weights(8),
        );
        graph.topological_sort();
        assert!(graph.is_topologically_sorted());
        assert!(graph.topological_sort_rigorous().is_ok());
    }

    #[test]
    fn sorted_order_keeps_aligned_sets_consecutive() {
        let mut graph = Graph::from_sequence(b"AAC", &unit_weights(3));
        graph.add_alignment(&[(0, 0), (1, 1), (2, 2)], b"AGC", &unit_weights(3));
        graph.topological_sort();
        let sorted = graph.sorted_node_ids();
        let pos_a = sorted.iter().position(|&id| id == 1).unwrap();
        let pos_g = sorted.iter().position(|&id| id == 3).unwrap();
        assert_eq!(pos_a.abs_diff(pos_g), 1);
    }

    #[test]
    fn msa_rows_reproduce_inserted_sequences() {
        let mut graph = Graph::from_sequence(b"AAC", &unit_weights(3));
        graph.add_alignment(&[(0, 0), (1, 1), (2, 2)], b"AGC", &unit_weights(3));
        let msa = graph.generate_msa(false);
        assert_eq!(msa.len(), 2);
        assert_eq!(msa[0], b"AAC");
        assert_eq!(msa[1], b"AGC");
    }

    #[test]
    fn msa_rows_have_equal_length_with_insertions() {
        let mut graph = Graph::from_sequence(b"ACGT", &unit_weights(4));
        // extra T between G and T
        graph.add_alignment(
            &[(0, 0), (1, 1), (2, 2), (-1, 3), (3, 4)],
            b"ACGTT",
            &unit_weights(5),
        );
        let msa = graph.generate_msa(false);
        assert_eq!(msa[0].len(), msa[1].len());
        let strip = |row: &[u8]| -> Vec<u8> { row.iter().copied().filter(|&c| c != b'-').collect() };
        assert_eq!(strip(&msa[0]), b"ACGT");
        assert_eq!(strip(&msa[1]), b"ACGTT");
    }

    #[test]
    fn msa_includes_consensus_row() {
        let mut graph = Graph::from_sequence(b"AAC", &unit_weights(3));
        graph.add_alignment(&[(0, 0), (1, 1), (2, 2)], b"AAC", &unit_weights(3));
        let msa = graph.generate_msa(true);
        assert_eq!(msa.len(), 3);
        assert_eq!(msa.last().unwrap(), b"AAC");
    }

    #[test]
    fn majority_letter_wins_consensus() {
        let mut graph = Graph::from_sequence(b"ACGTACGT", &unit_weights(8));
        let identity = vec![(0, 0), (1, 1), (2, 2), (3, 3), (4, 4), (5, 5), (6, 6), (7, 7)];
        graph.add_alignment(&identity, b"ACGTACGT", &unit_weights(8));
        graph.add_alignment(&identity, b"ACGTACGT", &unit_weights(8));
        graph.add_alignment(&identity, b"ACGAACGT", &unit_weights(8));
        assert_eq!(graph.generate_consensus(), b"ACGTACGT");
        // the minority letter still exists in the graph
        assert!(graph.nodes().iter().filter(|n| n.letter() == b'A').count() >= 3);
    }

    #[test]
    fn consensus_coverage_reports_path_weights() {
        let mut graph = Graph::from_sequence(b"ACG", &unit_weights(3));
        graph.add_alignment(&[(0, 0), (1, 1), (2, 2)], b"ACG", &unit_weights(3));
        let (consensus, coverages) = graph.generate_consensus_with_coverages();
        assert_eq!(consensus, b"ACG");
        // ends touch one path edge (weight 2), the middle touches two
        assert_eq!(coverages, vec![2, 4, 2]);
    }

    #[test]
    fn subgraph_extracts_span_and_maps_back() {
        let mut graph = Graph::from_sequence(b"ACGTAC", &unit_weights(6));
        graph.add_alignment(
            &[(0, 0), (1, 1), (2, 2), (3, 3), (4, 4), (5, 5)],
            b"ACTTAC",
            &unit_weights(6),
        );
        let (subgraph, mapping) = graph.subgraph(1, 4);
        // nodes 1..=4 plus the mismatch node aligned within the span
        assert!(subgraph.num_nodes() >= 4);
        for (sub_id, &graph_id) in mapping.iter().enumerate() {
            assert_eq!(
                subgraph.node(sub_id as u32).letter(),
                graph.node(graph_id as u32).letter()
            );
        }
        let mut alignment: Alignment = vec![(0, 0), (1, 1), (-1, 2)];
        update_alignment(&mut alignment, &mapping);
        assert_eq!(alignment[0].0, mapping[0]);
        assert_eq!(alignment[2].0, -1);
    }

    #[test]
    fn empty_graph_has_empty_consensus() {
        let mut graph = Graph::new();
        assert!(graph.generate_consensus().is_empty());
    }

    #[test]
    fn alphabet_tracks_node_letters() {
        let mut graph = Graph::from_sequence(b"AC", &unit_weights(2));
        graph.add_alignment(&[(0, 0), (1, 1)], b"AT", &unit_weights(2));
        let letters: FxHashSet<u8> = graph.nodes().iter().map(|n| n.letter()).collect();
        assert_eq!(&letters, graph.alphabet());
    }
}
