use burnish::polisher::{Mode, Polisher};
use clap::Parser;
use rayon::ThreadPoolBuilder;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::num::NonZeroUsize;

/// Consensus polishing of draft target sequences from noisy long reads
/// and their precomputed overlaps.
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Reads used for polishing (FASTA/FASTQ, optionally gzipped).
    sequences: String,

    /// Overlaps between the reads and the target sequences (PAF/MHAP, optionally gzipped).
    overlaps: String,

    /// Target sequences to polish (FASTA/FASTQ, optionally gzipped).
    target: String,

    /// Perform fragment correction instead of contig polishing.
    #[clap(short = 'f', long, action)]
    fragment_correction: bool,

    /// Keep target sequences for which no window could be polished.
    #[clap(short = 'u', long, action)]
    include_unpolished: bool,

    /// Length of the windows targets are split into.
    #[clap(short = 'w', long, value_parser, default_value_t = 500)]
    window_length: u32,

    /// Mean PHRED value below which read fragments are dropped.
    #[clap(short = 'q', long, value_parser, default_value_t = 10.0)]
    quality_threshold: f64,

    /// Error rate above which overlaps are dropped.
    #[clap(short = 'e', long, value_parser, default_value_t = 0.3)]
    error_threshold: f64,

    /// Score for matching bases.
    #[clap(short = 'm', long, value_parser, default_value_t = 3)]
    match_score: i8,

    /// Score for mismatching bases.
    #[clap(short = 'x', long, value_parser, default_value_t = -5, allow_hyphen_values = true)]
    mismatch_score: i8,

    /// Gap penalty.
    #[clap(short = 'g', long, value_parser, default_value_t = -4, allow_hyphen_values = true)]
    gap_score: i8,

    /// Minimum per-position coverage required to keep a consensus position.
    #[clap(long, value_parser, default_value_t = 0)]
    min_coverage: u32,

    /// Windows whose consensus path has a larger gap-column percentage are left unpolished.
    #[clap(long, value_parser = clap::value_parser!(u8).range(0..=100), default_value_t = 30)]
    allowed_gap_percent: u8,

    /// Number of threads for parallel processing.
    #[clap(short = 't', long, value_parser, default_value_t = NonZeroUsize::new(1).unwrap())]
    threads: NonZeroUsize,

    /// Output file for the polished sequences; stdout when omitted.
    #[clap(short = 'o', long, value_parser)]
    output: Option<String>,
}

fn main() -> io::Result<()> {
    env_logger::init();
    let args = Args::parse();

    ThreadPoolBuilder::new()
        .num_threads(args.threads.into())
        .build_global()
        .unwrap();

    let mode = if args.fragment_correction {
        Mode::Fragment
    } else {
        Mode::Contig
    };

    let mut polisher = Polisher::from_paths(
        &args.sequences,
        &args.overlaps,
        &args.target,
        mode,
        args.window_length,
        args.quality_threshold,
        args.error_threshold,
        args.match_score,
        args.mismatch_score,
        args.gap_score,
    )?;
    polisher.initialize()?;
    let polished = polisher.polish(
        !args.include_unpolished,
        args.min_coverage,
        args.allowed_gap_percent,
    )?;

    let mut writer: Box<dyn Write> = match args.output {
        Some(path) => Box::new(BufWriter::new(File::create(path)?)),
        None => Box::new(BufWriter::new(io::stdout().lock())),
    };
    for sequence in &polished {
        writeln!(writer, ">{}", sequence.name())?;
        writer.write_all(sequence.data())?;
        writeln!(writer)?;
    }
    writer.flush()
}
