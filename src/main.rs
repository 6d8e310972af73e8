use clap::{Parser, Subcommand};
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::PathBuf;

use ferrous_refine::correct::{estimate_params, run_correction, EcOpt};
use ferrous_refine::fm_index::ReadIndex;
use ferrous_refine::{alphabet, fm_index::FmIndex};

#[derive(Parser)]
#[command(name = "ferrous-refine")]
#[command(about = "Post-assembly refinement: unitig bubble popping and index-guided read error correction", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Correct sequencing errors in a read set
    Correct {
        /// Input FASTQ file (.fq, .fastq, optionally .gz)
        #[arg(value_name = "READS.FQ")]
        reads: PathBuf,

        /// Expected genome size (used to estimate w and T)
        #[arg(short = 'g', long, value_name = "INT", default_value = "1000000")]
        genome_size: i64,

        /// Expected coverage
        #[arg(short = 'c', long, value_name = "FLOAT", default_value = "30.0")]
        coverage: f64,

        /// Assumed uniform per-base error probability
        #[arg(short = 'e', long, value_name = "FLOAT", default_value = "0.01")]
        error_rate: f64,

        /// Window length; bypasses estimation when given together with -T
        #[arg(short = 'w', long, value_name = "INT")]
        window: Option<u32>,

        /// Solid-branch support threshold; bypasses estimation with -w
        #[arg(short = 'T', long, value_name = "INT")]
        threshold: Option<i32>,

        /// Maximum support of a branch that may still be corrected [T]
        #[arg(long, value_name = "INT")]
        max_weak: Option<i32>,

        /// Output FASTA file (default: stdout)
        #[arg(short = 'o', long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Number of threads (default: all available cores)
        #[arg(short = 't', long, value_name = "INT")]
        threads: Option<usize>,

        /// Verbose level: 1=error, 2=warning, 3=message, 4+=debugging
        #[arg(short = 'v', long, value_name = "INT", default_value = "3")]
        verbosity: i32,
    },

    /// Print estimated correction parameters (w, T) without running
    Genpar {
        /// Expected genome size
        #[arg(short = 'g', long, value_name = "INT")]
        genome_size: i64,

        /// Read length
        #[arg(short = 'l', long, value_name = "INT")]
        read_length: i32,

        /// Expected coverage
        #[arg(short = 'c', long, value_name = "FLOAT")]
        coverage: f64,

        /// Assumed uniform per-base error probability
        #[arg(short = 'e', long, value_name = "FLOAT", default_value = "0.01")]
        error_rate: f64,
    },
}

fn init_logger(verbosity: i32) {
    let log_level = match verbosity {
        v if v <= 1 => log::LevelFilter::Error,
        2 => log::LevelFilter::Warn,
        3 => log::LevelFilter::Info,
        4 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .format_timestamp(None)
        .format_target(false)
        .init();
}

/// Load a FASTQ file (gzip auto-detected by extension) into coded reads.
fn read_fastq(path: &PathBuf) -> io::Result<Vec<Vec<u8>>> {
    let file = File::open(path)?;
    let reader: Box<dyn Read> = if path.extension().and_then(|s| s.to_str()) == Some("gz") {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    };
    let fastq_reader = bio::io::fastq::Reader::new(reader);
    let mut reads = Vec::new();
    for record in fastq_reader.records() {
        match record {
            Ok(rec) => {
                if !rec.seq().is_empty() {
                    reads.push(alphabet::encode(rec.seq()));
                }
            }
            Err(e) => return Err(io::Error::new(io::ErrorKind::Other, e)),
        }
    }
    Ok(reads)
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Correct {
            reads,
            genome_size,
            coverage,
            error_rate,
            window,
            threshold,
            max_weak,
            output,
            threads,
            verbosity,
        } => {
            init_logger(verbosity);

            let num_threads = threads.unwrap_or_else(num_cpus::get).max(1);
            if let Err(e) = rayon::ThreadPoolBuilder::new()
                .num_threads(num_threads)
                .build_global()
            {
                log::warn!(
                    "Failed to configure thread pool: {} (may already be initialized)",
                    e
                );
            }
            log::info!("Using {} thread(s)", num_threads);

            let coded = match read_fastq(&reads) {
                Ok(r) => r,
                Err(e) => {
                    log::error!("Failed to read {}: {}", reads.display(), e);
                    std::process::exit(1);
                }
            };
            if coded.is_empty() {
                log::error!("No reads in {}", reads.display());
                std::process::exit(1);
            }
            let read_len = coded.iter().map(|r| r.len()).max().unwrap() as i32;
            log::info!(
                "Loaded {} reads (longest {} bp) from {}",
                coded.len(),
                read_len,
                reads.display()
            );

            let (w, t) = match (window, threshold) {
                (Some(w), Some(t)) => (w, t),
                _ => estimate_params(genome_size, read_len, coverage, error_rate),
            };
            if w as i32 >= read_len {
                log::error!(
                    "Window {} is not below the read length {}; nothing to correct",
                    w,
                    read_len
                );
                std::process::exit(1);
            }
            let mut opt = EcOpt::new(w, t.max(1));
            if let Some(mw) = max_weak {
                opt.max_weak = mw;
            }

            log::info!("Building index over both read orientations");
            let index = ReadIndex::new(&coded);
            log::info!("Indexed {} oriented sequences", index.num_seqs());

            let result = match output {
                Some(path) => match File::create(&path) {
                    Ok(f) => {
                        let mut out = BufWriter::new(f);
                        run_correction(&index, &opt, &mut out).and_then(|_| out.flush())
                    }
                    Err(e) => {
                        log::error!("Failed to create {}: {}", path.display(), e);
                        std::process::exit(1);
                    }
                },
                None => {
                    let stdout = io::stdout();
                    let mut out = BufWriter::new(stdout.lock());
                    run_correction(&index, &opt, &mut out).and_then(|_| out.flush())
                }
            };
            if let Err(e) = result {
                log::error!("Correction failed: {}", e);
                std::process::exit(1);
            }
            log::info!("Done");
        }

        Commands::Genpar {
            genome_size,
            read_length,
            coverage,
            error_rate,
        } => {
            init_logger(3);
            let (w, t) = estimate_params(genome_size, read_length, coverage, error_rate);
            println!("w={}\tT={}", w, t);
        }
    }
}
