//! pzcat - parallel decompression for gzip, BGZF, zlib, and raw deflate.
//!
//! Decompresses a single serial compressed stream on all available cores
//! by locating deflate block boundaries speculatively and decoding
//! disjoint chunks concurrently. A seek index can be exported alongside
//! the output (and re-imported later) so that repeated random reads skip
//! the discovery pass entirely.
//!
//! # Usage
//!
//! ```bash
//! # Decompress to stdout
//! pzcat input.gz > output
//!
//! # Decompress to a file with 8 workers and export a seek index
//! pzcat input.gz -o output -P 8 --export-index input.gz.index
//!
//! # Random-access-friendly re-runs via the index
//! pzcat input.gz -o output --import-index input.gz.index
//!
//! # Count decompressed bytes without writing anything
//! pzcat input.gz --count
//! ```

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};

use parallel_gzip::{GzipIndex, ParallelGzipReader, ReaderOptions};

/// Read step between progress updates.
const READ_STEP: u64 = 4 * 1024 * 1024;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input file (gzip, BGZF, zlib, or raw deflate)
    input: PathBuf,

    /// Output file (defaults to stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Number of worker threads (default = number of logical cores)
    #[arg(short = 'P', long)]
    parallelism: Option<usize>,

    /// Chunk size in KiB of compressed data per worker task
    #[arg(long, default_value_t = 4096)]
    chunk_size: usize,

    /// Skip CRC32 / Adler-32 verification
    #[arg(long)]
    no_verify: bool,

    /// Only print the decompressed size in bytes
    #[arg(long)]
    count: bool,

    /// Write a seek index here after decompressing
    #[arg(long)]
    export_index: Option<PathBuf>,

    /// Export the index in BGZF GZI format instead of the checkpoint
    /// format (requires BGZF input)
    #[arg(long)]
    gzi: bool,

    /// Load a previously exported seek index before decompressing
    #[arg(long)]
    import_index: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    if args.gzi && args.export_index.is_none() {
        bail!("--gzi only makes sense together with --export-index");
    }

    let options = ReaderOptions {
        parallelism: args.parallelism.unwrap_or(0),
        chunk_size: args.chunk_size.saturating_mul(1024),
        verify_checksums: !args.no_verify,
        ..ReaderOptions::default()
    };
    let source = parallel_gzip::shared_from_file(&args.input)
        .with_context(|| format!("failed to open {}", args.input.display()))?;
    let mut reader = ParallelGzipReader::with_options(source, options)
        .with_context(|| format!("{} is not a supported compressed file", args.input.display()))?;

    if let Some(path) = &args.import_index {
        let mut file =
            File::open(path).with_context(|| format!("failed to open index {}", path.display()))?;
        let index = GzipIndex::read_from(&mut file)
            .with_context(|| format!("failed to parse index {}", path.display()))?;
        reader
            .set_block_offsets(&index)
            .context("imported index does not match the input file")?;
    }

    if args.count {
        let size = reader.decompressed_size().context("decompression failed")?;
        println!("{size}");
        return Ok(());
    }

    // Progress reporting only when not writing to stdout: interleaving a
    // bar with piped output helps nobody.
    let progress = match (&args.output, reader.size()) {
        (Some(_), Some(total)) => {
            let bar = ProgressBar::new(total);
            bar.set_style(
                ProgressStyle::with_template(
                    "{bar:40.cyan/blue} {bytes}/{total_bytes} ({bytes_per_sec})",
                )
                .expect("static template is valid"),
            );
            Some(bar)
        }
        (Some(_), None) => Some(ProgressBar::new_spinner()),
        (None, _) => None,
    };

    let mut writer: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(BufWriter::new(
            File::create(path)
                .with_context(|| format!("failed to create {}", path.display()))?,
        )),
        None => Box::new(BufWriter::new(std::io::stdout().lock())),
    };

    let mut total = 0u64;
    loop {
        let written = reader
            .read_into(&mut writer, READ_STEP)
            .context("decompression failed")?;
        if written == 0 {
            break;
        }
        total += written;
        if let Some(bar) = &progress {
            bar.set_position(total);
        }
    }
    writer.flush().context("failed to flush output")?;
    if let Some(bar) = &progress {
        bar.finish_and_clear();
    }

    if let Some(path) = &args.export_index {
        let index = reader.gzip_index().context("failed to build seek index")?;
        let mut file = BufWriter::new(
            File::create(path)
                .with_context(|| format!("failed to create index {}", path.display()))?,
        );
        if args.gzi {
            index
                .write_gzi(&mut file)
                .context("input is not indexable as GZI")?;
        } else {
            index.write_to(&mut file).context("failed to write index")?;
        }
        file.flush().context("failed to flush index")?;
    }

    Ok(())
}
