use std::collections::HashSet;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Instant;

use anyhow::{anyhow, Context};
use clap::Parser;
use crossbeam_channel::bounded;
use indicatif::ProgressStyle;
use tracing::info_span;
use tracing_indicatif::span_ext::IndicatifSpanExt;
use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use opus_enc::collect::collect_from_config;
use opus_enc::pipeline::colliding_indices;
use opus_enc::config::{DEFAULT_FFMPEG, DEFAULT_FFPROBE};
use opus_enc::{Candidate, Config, Outcome, Pipeline, Report, SortOrder};

#[derive(Parser)]
#[command(name = "opus_enc")]
#[command(about = "Converts audio and video files to Opus audio using ffmpeg")]
struct Args {
    /// Base directory to scan for media files
    #[arg(default_value = ".")]
    base_dir: PathBuf,

    /// Write converted files here instead of next to the originals
    #[arg(short = 'o', long)]
    output_dir: Option<PathBuf>,

    /// Number of files to process in parallel (default: number of CPU cores)
    #[arg(short = 'j', long, default_value_t = num_cpus::get())]
    threads: usize,

    /// Order in which files are handed to the workers
    #[arg(long, value_enum, default_value_t = SortOrder::Name)]
    sort: SortOrder,

    /// Reverse the sort order
    #[arg(short = 'r', long)]
    reverse: bool,

    /// ffmpeg executable
    #[arg(long, default_value = DEFAULT_FFMPEG)]
    ffmpeg: PathBuf,

    /// ffprobe executable
    #[arg(long, default_value = DEFAULT_FFPROBE)]
    ffprobe: PathBuf,

    /// Do not ask before overwriting existing outputs
    #[arg(short = 'y', long)]
    force_yes: bool,

    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short = 'v', long)]
    verbose: bool,
}

impl Args {
    fn into_config(self) -> Config {
        Config {
            base_dir: self.base_dir,
            output_dir: self.output_dir,
            threads: self.threads,
            sort: self.sort,
            reverse: self.reverse,
            ffmpeg: self.ffmpeg,
            ffprobe: self.ffprobe,
        }
    }
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "opus_enc=debug" } else { "opus_enc=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let indicatif_layer = IndicatifLayer::new();
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(indicatif_layer.get_stderr_writer()))
        .with(indicatif_layer)
        .init();
}

#[derive(Default)]
struct Summary {
    converted: usize,
    recovered: usize,
    skipped: usize,
    failed: usize,
}

impl Summary {
    fn record(&mut self, report: &Report) {
        match report.outcome {
            Outcome::Converted { .. } => self.converted += 1,
            Outcome::Recovered => self.recovered += 1,
            Outcome::Skipped(_) => self.skipped += 1,
            Outcome::Failed(ref reason) => {
                self.failed += 1;
                tracing::error!(
                    path = %report.candidate.input_path.display(),
                    %reason,
                    "conversion failed, original kept"
                );
            }
        }
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(args.verbose);

    let force_yes = args.force_yes;
    let config = args.into_config();
    config.validate()?;
    config.check_tools()?;

    println!("Starting Opus conversion...");
    println!("Base directory: {}", config.base_dir.display());
    if let Some(ref output_dir) = config.output_dir {
        println!("Output directory: {}", output_dir.display());
    }
    println!("Using {} parallel workers", config.threads);

    let start_time = Instant::now();
    let candidates = collect_from_config(&config);
    if candidates.is_empty() {
        println!("No media files found in directory: {}", config.base_dir.display());
        return Ok(());
    }
    let total_files = candidates.len();
    println!("Found {} media files", total_files);

    let collisions = colliding_indices(&candidates);
    let overwrites = check_overwrites(&candidates, &collisions);
    if (!overwrites.is_empty() || !collisions.is_empty()) && !force_yes {
        if !overwrites.is_empty() {
            println!("\nThe following outputs already exist and may be replaced:");
            for path in &overwrites {
                println!("  {}", path.display());
            }
        }
        if !collisions.is_empty() {
            println!("\nThe following files share an output with another file and will be skipped:");
            for (index, candidate) in candidates.iter().enumerate() {
                if collisions.contains(&index) {
                    println!(
                        "  {} -> {}",
                        candidate.input_path.display(),
                        candidate.output_path.display()
                    );
                }
            }
        }
        println!();

        if !prompt_yes_no("Do you want to continue?")? {
            println!("Aborting.");
            return Ok(());
        }
    }

    let batch = info_span!("convert");
    batch.pb_set_style(
        &ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} files ({percent}%)",
        )
        .context("invalid progress template")?
        .progress_chars("#>-"),
    );

    let pipeline = Pipeline::from_config(&config).with_progress(batch.clone());
    let (tx, rx) = bounded::<Report>(config.threads * 2);

    let summary = {
        let _entered = batch.enter();
        thread::scope(|s| -> anyhow::Result<Summary> {
            let pipeline = &pipeline;
            let worker = s.spawn(move || pipeline.run(candidates, &tx));

            let mut summary = Summary::default();
            for report in rx.iter() {
                summary.record(&report);
            }

            worker
                .join()
                .map_err(|_| anyhow!("conversion thread panicked"))?
                .context("failed to build worker pool")?;
            Ok(summary)
        })?
    };
    drop(pipeline);
    drop(batch);

    println!("\nConversion Summary:");
    println!("Total files processed: {}", total_files);
    println!("Successfully converted: {}", summary.converted);
    if summary.recovered > 0 {
        println!("Completed from an earlier run: {}", summary.recovered);
    }
    println!("Skipped: {}", summary.skipped);
    println!("Failed conversions: {}", summary.failed);
    println!("Time taken: {:.2} seconds", start_time.elapsed().as_secs_f64());

    Ok(())
}

fn check_overwrites<'a>(candidates: &'a [Candidate], collisions: &HashSet<usize>) -> Vec<&'a Path> {
    candidates
        .iter()
        .enumerate()
        .filter(|(index, _)| !collisions.contains(index))
        .map(|(_, c)| c.output_path.as_path())
        .filter(|path| path.exists())
        .collect()
}

fn prompt_yes_no(question: &str) -> anyhow::Result<bool> {
    print!("{} [y/N] ", question);
    io::stdout().flush().context("failed to flush stdout")?;

    read_answer(io::stdin().lock())
}

fn read_answer(mut reader: impl BufRead) -> anyhow::Result<bool> {
    let mut input = String::new();
    reader
        .read_line(&mut input)
        .context("failed to read answer")?;
    Ok(input.trim().eq_ignore_ascii_case("y"))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Broken;

    impl io::Read for Broken {
        fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }
    }

    #[test]
    fn only_y_confirms() {
        assert!(read_answer(&b"y\n"[..]).unwrap());
        assert!(read_answer(&b" Y \n"[..]).unwrap());
        assert!(!read_answer(&b"yes\n"[..]).unwrap());
        assert!(!read_answer(&b"\n"[..]).unwrap());
        assert!(!read_answer(&b""[..]).unwrap());
    }

    #[test]
    fn unreadable_stdin_is_an_error() {
        let err = read_answer(io::BufReader::new(Broken)).unwrap_err();
        assert!(err.to_string().contains("failed to read answer"));
    }
}
