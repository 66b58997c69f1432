//! The polishing pipeline: sequence/overlap intake, window construction,
//! parallel per-window consensus and stitching of polished targets.

use crate::fastx::FastxReader;
use crate::overlap::{Overlap, Strand};
use crate::paf::OverlapReader;
use crate::poa::AlignmentEngine;
use crate::sequence::{average_quality, Sequence};
use crate::window::{Window, WindowType};
use indicatif::ProgressBar;
use log::{info, warn};
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::io;

/// Intake batch bound, ~1 GiB of record data per pull.
pub const CHUNK_SIZE: u64 = 1024 * 1024 * 1024;

/// Polishing mode: `Contig` keeps only the longest overlap per
/// (query, target) pair, `Fragment` keeps every valid overlap.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Mode {
    Contig,
    Fragment,
}

/// Compacts `src[begin..]` in place, dropping `None` entries while
/// preserving the relative order of the rest, and truncates the vector.
/// Returns the number of dropped entries.
pub fn shrink_to_fit<T>(src: &mut Vec<Option<T>>, begin: usize) -> usize {
    let mut kept = begin;
    for i in begin..src.len() {
        if src[i].is_some() {
            src.swap(kept, i);
            kept += 1;
        }
    }
    let dropped = src.len() - kept;
    src.truncate(kept);
    dropped
}

thread_local! {
    static ALIGNMENT_ENGINE: RefCell<Option<((i8, i8, i8), AlignmentEngine)>> =
        const { RefCell::new(None) };
}

/// Executes a closure with this worker's alignment engine, creating it on
/// first use. Engines are keyed by their scoring triple so concurrent
/// polishers with different scores never share DP state.
fn with_alignment_engine<F, R>(scores: (i8, i8, i8), prealloc_len: usize, f: F) -> R
where
    F: FnOnce(&mut AlignmentEngine) -> R,
{
    ALIGNMENT_ENGINE.with(|cell| {
        let mut slot = cell.borrow_mut();
        let rebuild = match slot.as_ref() {
            Some((existing, _)) => *existing != scores,
            None => true,
        };
        if rebuild {
            let mut engine = AlignmentEngine::new(scores.0, scores.1, scores.2);
            engine.prealloc(prealloc_len, 5);
            *slot = Some((scores, engine));
        }
        let (_, engine) = slot.as_mut().unwrap();
        f(engine)
    })
}

#[derive(Debug)]
pub struct Polisher {
    sparser: FastxReader,
    oparser: OverlapReader,
    tparser: FastxReader,
    mode: Mode,
    window_length: u32,
    quality_threshold: f64,
    error_threshold: f64,
    match_score: i8,
    mismatch_score: i8,
    gap_score: i8,
    sequences: Vec<Option<Sequence>>,
    target_coverages: Vec<u32>,
    windows: Vec<Option<Window>>,
}

impl Polisher {
    /// Opens the three input files and validates the configuration.
    /// Unsupported file extensions and a zero window length are rejected
    /// here, before any data is read.
    #[allow(clippy::too_many_arguments)]
    pub fn from_paths(
        sequences_path: &str,
        overlaps_path: &str,
        target_path: &str,
        mode: Mode,
        window_length: u32,
        quality_threshold: f64,
        error_threshold: f64,
        match_score: i8,
        mismatch_score: i8,
        gap_score: i8,
    ) -> io::Result<Self> {
        if window_length == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "polisher: invalid window length",
            ));
        }
        Ok(Polisher {
            sparser: FastxReader::from_path(sequences_path)?,
            oparser: OverlapReader::from_path(overlaps_path)?,
            tparser: FastxReader::from_path(target_path)?,
            mode,
            window_length,
            quality_threshold,
            error_threshold,
            match_score,
            mismatch_score,
            gap_score,
            sequences: Vec::new(),
            target_coverages: Vec::new(),
            windows: Vec::new(),
        })
    }

    /// Loads targets, queries and overlaps, resolves ids, computes
    /// break-points in parallel and distributes read fragments into
    /// windows. Structural input errors are fatal.
    pub fn initialize(&mut self) -> io::Result<()> {
        if !self.windows.is_empty() {
            warn!("polisher already initialized");
            return Ok(());
        }

        while self.tparser.read_chunk(&mut self.sequences, CHUNK_SIZE)? {}
        let targets_size = self.sequences.len();
        if targets_size == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "polisher: empty target sequences set",
            ));
        }
        let mut name_to_id: FxHashMap<String, u64> = FxHashMap::default();
        let mut id_to_id: FxHashMap<u64, u64> = FxHashMap::default();
        for i in 0..targets_size {
            let name = self.sequences[i].as_ref().unwrap().name();
            name_to_id.insert(format!("{}t", name), i as u64);
            id_to_id.insert((i as u64) << 1 | 1, i as u64);
        }

        let mut has_name = vec![true; targets_size];
        let mut has_data = vec![true; targets_size];
        let mut has_reverse_data = vec![false; targets_size];
        info!("loaded {} target sequence(s)", targets_size);

        let mut sequences_size: u64 = 0;
        let mut total_sequences_length: u64 = 0;
        loop {
            let l = self.sequences.len();
            let more = self.sparser.read_chunk(&mut self.sequences, CHUNK_SIZE)?;

            let mut folded: u64 = 0;
            for i in l..self.sequences.len() {
                let query_index = sequences_size;
                sequences_size += 1;

                let (name_key, data_len, quality_len) = {
                    let query = self.sequences[i].as_ref().unwrap();
                    total_sequences_length =
                        total_sequences_length.saturating_add(query.data().len() as u64);
                    (
                        format!("{}t", query.name()),
                        query.data().len(),
                        query.quality().len(),
                    )
                };

                if let Some(&target_id) = name_to_id.get(&name_key) {
                    let target = self.sequences[target_id as usize].as_ref().unwrap();
                    if target.data().len() != data_len || target.quality().len() != quality_len {
                        return Err(io::Error::new(
                            io::ErrorKind::InvalidData,
                            format!(
                                "polisher: duplicate sequence {} with unequal data",
                                self.sequences[i].as_ref().unwrap().name()
                            ),
                        ));
                    }
                    let name = self.sequences[i].as_ref().unwrap().name().to_string();
                    name_to_id.insert(format!("{}q", name), target_id);
                    id_to_id.insert(query_index << 1, target_id);
                    self.sequences[i] = None;
                    folded += 1;
                } else {
                    let name = self.sequences[i].as_ref().unwrap().name().to_string();
                    name_to_id.insert(format!("{}q", name), i as u64 - folded);
                    id_to_id.insert(query_index << 1, i as u64 - folded);
                }
            }
            shrink_to_fit(&mut self.sequences, l);
            if !more {
                break;
            }
        }
        if sequences_size == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "polisher: empty sequences set",
            ));
        }

        has_name.resize(self.sequences.len(), false);
        has_data.resize(self.sequences.len(), false);
        has_reverse_data.resize(self.sequences.len(), false);

        let window_type = if total_sequences_length / sequences_size <= 1000 {
            WindowType::Short
        } else {
            WindowType::Long
        };
        info!("loaded {} sequence(s)", sequences_size);

        let mut overlaps: Vec<Option<Overlap>> = Vec::new();
        let mut l = 0usize;
        loop {
            let more = self.oparser.read_chunk(&mut overlaps, CHUNK_SIZE)?;

            let mut group_begin = l;
            for i in l..overlaps.len() {
                overlaps[i]
                    .as_mut()
                    .unwrap()
                    .transmute(&name_to_id, &id_to_id);
                if !overlaps[i].as_ref().unwrap().is_valid(self.error_threshold) {
                    overlaps[i] = None;
                    continue;
                }
                while overlaps[group_begin].is_none() {
                    group_begin += 1;
                }
                if overlaps[group_begin].as_ref().unwrap().q_id()
                    != overlaps[i].as_ref().unwrap().q_id()
                {
                    self.filter_overlap_group(&mut overlaps, group_begin, i);
                    group_begin = i;
                }
            }
            let group_end = if more {
                group_begin
            } else {
                let end = overlaps.len();
                self.filter_overlap_group(&mut overlaps, group_begin, end);
                end
            };

            for overlap in overlaps[l..group_end].iter().flatten() {
                match overlap.strand() {
                    Strand::Reverse => has_reverse_data[overlap.q_id() as usize] = true,
                    Strand::Forward => has_data[overlap.q_id() as usize] = true,
                }
            }

            // the incomplete trailing group moves to where group_end lands
            let holes_before = overlaps[l..group_end]
                .iter()
                .filter(|overlap| overlap.is_none())
                .count();
            shrink_to_fit(&mut overlaps, l);
            l = group_end - holes_before;
            if !more {
                break;
            }
        }
        if overlaps.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "polisher: empty overlap set",
            ));
        }
        drop(name_to_id);
        drop(id_to_id);
        info!("loaded {} overlap(s)", overlaps.len());

        self.sequences
            .par_iter_mut()
            .enumerate()
            .for_each(|(i, sequence)| {
                if let Some(sequence) = sequence {
                    sequence.transmute(has_name[i], has_data[i], has_reverse_data[i]);
                }
            });

        let progress = ProgressBar::new(overlaps.len() as u64);
        let sequences = &self.sequences;
        let window_length = self.window_length;
        overlaps.par_iter_mut().for_each(|overlap| {
            if let Some(overlap) = overlap {
                overlap.find_breaking_points(sequences, window_length);
            }
            progress.inc(1);
        });
        progress.finish_and_clear();
        info!("aligned overlaps against targets");

        let mut id_to_first_window_id = vec![0u64; targets_size + 1];
        for i in 0..targets_size {
            let target = self.sequences[i].as_ref().unwrap();
            let length = target.data().len() as u32;
            let mut rank = 0u32;
            let mut begin = 0u32;
            while begin < length {
                let end = (begin + self.window_length).min(length);
                let data = target.data()[begin as usize..end as usize].to_vec();
                let quality = if target.quality().is_empty() {
                    None
                } else {
                    Some(target.quality()[begin as usize..end as usize].to_vec())
                };
                self.windows
                    .push(Some(Window::new(i as u64, rank, window_type, data, quality)));
                rank += 1;
                begin += self.window_length;
            }
            id_to_first_window_id[i + 1] = id_to_first_window_id[i] + rank as u64;
        }
        self.target_coverages = vec![0; targets_size];

        let min_layer_span = (0.02 * self.window_length as f64) as u32;
        for slot in overlaps.iter_mut() {
            let overlap = slot.take().unwrap();
            self.target_coverages[overlap.t_id() as usize] += 1;

            let sequence = self.sequences[overlap.q_id() as usize].as_ref().unwrap();
            let breaking_points = overlap.breaking_points();
            for j in (0..breaking_points.len()).step_by(2) {
                let (t_start, q_start) = breaking_points[j];
                let (t_end, q_end) = breaking_points[j + 1];
                if q_end - q_start < min_layer_span {
                    continue;
                }

                let quality = match overlap.strand() {
                    Strand::Reverse => sequence.reverse_quality(),
                    Strand::Forward => sequence.quality(),
                };
                if !quality.is_empty()
                    && average_quality(&quality[q_start as usize..q_end as usize])
                        < self.quality_threshold
                {
                    continue;
                }

                let window_rank = t_start / self.window_length;
                let window_id =
                    id_to_first_window_id[overlap.t_id() as usize] + window_rank as u64;
                let window_start = window_rank * self.window_length;

                let data = match overlap.strand() {
                    Strand::Reverse => {
                        &sequence.reverse_complement()[q_start as usize..q_end as usize]
                    }
                    Strand::Forward => &sequence.data()[q_start as usize..q_end as usize],
                };
                let quality = if quality.is_empty() {
                    None
                } else {
                    Some(quality[q_start as usize..q_end as usize].to_vec())
                };
                self.windows[window_id as usize].as_mut().unwrap().add_layer(
                    data.to_vec(),
                    quality,
                    t_start - window_start,
                    t_end - window_start - 1,
                );
            }
        }
        info!("transformed data into windows");
        Ok(())
    }

    /// Mode C keeps only the longest overlap per (query, target) pair
    /// within a query's group; the later record wins a length tie.
    fn filter_overlap_group(
        &self,
        overlaps: &mut [Option<Overlap>],
        begin: usize,
        end: usize,
    ) {
        if self.mode != Mode::Contig {
            return;
        }
        for i in begin..end {
            if overlaps[i].is_none() {
                continue;
            }
            for j in i + 1..end {
                let Some(other) = overlaps[j].as_ref() else {
                    continue;
                };
                let current = overlaps[i].as_ref().unwrap();
                if other.t_id() != current.t_id() {
                    continue;
                }
                if current.length() > other.length() {
                    overlaps[j] = None;
                } else {
                    overlaps[i] = None;
                    break;
                }
            }
        }
    }

    /// Generates every window consensus on the worker pool, then stitches
    /// windows in rank order into polished targets. Emitted names carry
    /// the `LN`/`RC`/`XC` tags (and `r` in fragment mode); targets with
    /// `XC == 0` are skipped when `drop_unpolished` is set.
    pub fn polish(
        &mut self,
        drop_unpolished: bool,
        min_coverage: u32,
        allowed_gap_percent: u8,
    ) -> io::Result<Vec<Sequence>> {
        let scores = (self.match_score, self.mismatch_score, self.gap_score);
        let window_length = self.window_length as usize;

        let progress = ProgressBar::new(self.windows.len() as u64);
        let polished_windows: Vec<bool> = self
            .windows
            .par_iter_mut()
            .map(|window| {
                let polished = with_alignment_engine(scores, window_length, |engine| {
                    window
                        .as_mut()
                        .unwrap()
                        .generate_consensus(engine, min_coverage, allowed_gap_percent)
                });
                progress.inc(1);
                polished
            })
            .collect();
        progress.finish_and_clear();
        info!("generated consensus for {} window(s)", polished_windows.len());

        let mut dst = Vec::new();
        let mut polished_data: Vec<u8> = Vec::new();
        let mut num_polished_windows = 0u32;
        for i in 0..self.windows.len() {
            let window = self.windows[i].take().unwrap();
            if polished_windows[i] {
                num_polished_windows += 1;
            }
            polished_data.extend_from_slice(window.consensus());

            let target_done = i + 1 == self.windows.len()
                || self.windows[i + 1].as_ref().unwrap().rank() == 0;
            if target_done {
                let polished_ratio = num_polished_windows as f64 / (window.rank() + 1) as f64;
                if !drop_unpolished || polished_ratio > 0.0 {
                    let target = self.sequences[window.id() as usize].as_ref().unwrap();
                    let name = format!(
                        "{}{} LN:i:{} RC:i:{} XC:f:{:.6}",
                        target.name(),
                        if self.mode == Mode::Fragment { " r" } else { "" },
                        polished_data.len(),
                        self.target_coverages[window.id() as usize],
                        polished_ratio
                    );
                    dst.push(Sequence::new(name, polished_data.clone(), Vec::new()));
                }
                num_polished_windows = 0;
                polished_data.clear();
            }
        }

        self.windows.clear();
        self.sequences.clear();
        Ok(dst)
    }
}
