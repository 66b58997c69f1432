//! Consensus recovery from synthetic noisy reads: the heaviest bundle of
//! a graph built from independently mutated copies of a ground truth must
//! reproduce the truth.

use burnish::poa::{AlignmentEngine, Graph};

struct XorShift(u64);

impl XorShift {
    fn next(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    fn below(&mut self, bound: u64) -> u64 {
        self.next() % bound
    }
}

const BASES: [u8; 4] = [b'A', b'C', b'G', b'T'];

fn mutate(truth: &[u8], error_rate_percent: u64, rng: &mut XorShift) -> Vec<u8> {
    let mut read = Vec::with_capacity(truth.len() + 4);
    for &base in truth {
        if rng.below(100) < error_rate_percent {
            match rng.below(3) {
                0 => read.push(BASES[rng.below(4) as usize]), // substitution
                1 => {}                                       // deletion
                _ => {
                    // insertion
                    read.push(base);
                    read.push(BASES[rng.below(4) as usize]);
                }
            }
        } else {
            read.push(base);
        }
    }
    read
}

fn truth_sequence(length: usize, rng: &mut XorShift) -> Vec<u8> {
    (0..length).map(|_| BASES[rng.below(4) as usize]).collect()
}

fn consensus_of_noisy_copies(
    truth: &[u8],
    copies: usize,
    error_rate_percent: u64,
    rng: &mut XorShift,
) -> Vec<u8> {
    let first = mutate(truth, error_rate_percent, rng);
    let mut graph = Graph::from_sequence(&first, &vec![1.0; first.len()]);
    let mut engine = AlignmentEngine::new(3, -5, -4);
    for _ in 1..copies {
        let read = mutate(truth, error_rate_percent, rng);
        let alignment = engine.align(&read, &mut graph);
        graph.add_alignment(&alignment, &read, &vec![1.0; read.len()]);
    }
    graph.generate_consensus()
}

#[test]
fn ten_noisy_copies_recover_the_truth() {
    let mut rng = XorShift(0x5eed_cafe_f00d_1234);
    let truth = truth_sequence(120, &mut rng);
    let consensus = consensus_of_noisy_copies(&truth, 10, 8, &mut rng);
    assert_eq!(
        consensus,
        truth,
        "consensus {:?} diverged from truth {:?}",
        String::from_utf8_lossy(&consensus),
        String::from_utf8_lossy(&truth)
    );
}

#[test]
fn recovery_holds_across_seeds() {
    for seed in [1u64, 7, 42, 1337] {
        let mut rng = XorShift(seed.wrapping_mul(0x9e37_79b9_7f4a_7c15) | 1);
        let truth = truth_sequence(80, &mut rng);
        let consensus = consensus_of_noisy_copies(&truth, 12, 6, &mut rng);
        assert_eq!(consensus, truth, "seed {} failed", seed);
    }
}

#[test]
fn identical_copies_are_a_fixed_point() {
    let mut rng = XorShift(99);
    let truth = truth_sequence(60, &mut rng);
    let consensus = consensus_of_noisy_copies(&truth, 5, 0, &mut rng);
    assert_eq!(consensus, truth);
}
