use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use env_logger::Env;
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use rayon::ThreadPoolBuilder;
use serde_json::json;
use vgmtok::config::{DatasetConfig, GenerateConfig, IngestConfig, DEFAULT_MIN_DURATION_TICKS};
use vgmtok::dataset::{prepare_dataset, DatasetMetadata, META_FILE};
use vgmtok::decoder::{default_prompt, generate, prime_tokens, ReplaySampler, StopReason};
use vgmtok::metrics::{ticks_to_minutes, ScanReport};
use vgmtok::vgm::{VgmFile, VgmHeader};
use vgmtok::vocab::{load_or_build, open_existing, VOCABULARY_FILE};

#[derive(Parser, Debug)]
#[command(author, version, about = "VGM capture tokenizer", long_about = None)]
struct Cli {
    /// Increase verbosity (-v, -vv)
    #[arg(short = 'v', long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Decrease verbosity (-q, -qq)
    #[arg(short = 'q', long, global = true, action = ArgAction::Count)]
    quiet: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build the vocabulary listing for a capture corpus
    Vocab(VocabArgs),
    /// Build the vocabulary and write train/val token files
    Prepare(PrepareArgs),
    /// Convert the start of a capture into prompt tokens
    Prime(PrimeArgs),
    /// Turn sampled token streams back into VGM files
    Decode(DecodeArgs),
    /// Inspect a prepared data directory
    Info(InfoArgs),
}

#[derive(Args, Debug)]
struct ScanArgs {
    /// Capture files or directories to ingest
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Captures shorter than this many ticks are skipped as sound effects
    #[arg(long, value_name = "TICKS", default_value_t = DEFAULT_MIN_DURATION_TICKS)]
    min_duration: u64,

    /// Disable recursive directory traversal
    #[arg(long)]
    no_recursive: bool,

    /// Follow symlinks during traversal
    #[arg(long)]
    follow_symlinks: bool,

    /// Limit Rayon worker threads
    #[arg(long, value_name = "N")]
    threads: Option<usize>,

    /// Disable the progress spinner
    #[arg(long)]
    no_progress: bool,
}

impl ScanArgs {
    fn ingest_config(&self) -> IngestConfig {
        IngestConfig::builder()
            .recursive(!self.no_recursive)
            .follow_symlinks(self.follow_symlinks)
            .min_duration_ticks(self.min_duration)
            .build()
    }
}

#[derive(Args, Debug)]
struct VocabArgs {
    #[command(flatten)]
    scan: ScanArgs,

    /// Data directory receiving vocabulary_list.txt
    #[arg(short, long, value_name = "DIR")]
    output: PathBuf,

    /// Emit the scan summary as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct PrepareArgs {
    #[command(flatten)]
    scan: ScanArgs,

    /// Data directory receiving the vocabulary, splits and metadata
    #[arg(short, long, value_name = "DIR")]
    output: PathBuf,

    /// Dataset identifier recorded in meta.json
    #[arg(long, value_name = "NAME")]
    dataset: Option<String>,

    /// Seed for the work unit shuffle
    #[arg(long, value_name = "SEED")]
    seed: Option<u64>,

    /// Emit the summary as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct PrimeArgs {
    /// Capture whose opening is converted to tokens
    file: PathBuf,

    /// Data directory holding vocabulary_list.txt
    #[arg(short = 'd', long = "data-dir", value_name = "DIR")]
    data_dir: PathBuf,

    /// Stop after this many ticks of the capture
    #[arg(long, value_name = "TICKS")]
    start_ticks: Option<u64>,

    /// Emit a JSON record instead of whitespace-separated ids
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct DecodeArgs {
    /// Sampled token files (`.bin` little-endian u16, otherwise decimal ids)
    #[arg(required = true)]
    tokens: Vec<PathBuf>,

    /// Data directory holding vocabulary_list.txt
    #[arg(short = 'd', long = "data-dir", value_name = "DIR")]
    data_dir: PathBuf,

    /// Directory receiving the generated captures
    #[arg(short, long, value_name = "DIR", default_value = ".")]
    output_dir: PathBuf,

    /// Prime every sample with the opening of this capture and reuse its header
    #[arg(long, value_name = "FILE")]
    prime: Option<PathBuf>,

    /// Reuse the header of this capture when no priming file is given
    #[arg(long, value_name = "FILE")]
    header_from: Option<PathBuf>,

    /// Generated files are named `{output_name}{index}.vgm`
    #[arg(long, value_name = "PREFIX")]
    output_name: Option<String>,

    /// Maximum sampled tokens per output file
    #[arg(long, value_name = "COUNT")]
    max_new_tokens: Option<usize>,

    /// Ticks imported from the priming capture
    #[arg(long, value_name = "TICKS")]
    start_ticks: Option<u64>,
}

#[derive(Args, Debug)]
struct InfoArgs {
    /// Data directory produced by `prepare`
    #[arg(short = 'd', long = "data-dir", value_name = "DIR")]
    data_dir: PathBuf,

    /// Emit JSON instead of human-readable output
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    match cli.command {
        Commands::Vocab(args) => run_vocab(args, cli.quiet),
        Commands::Prepare(args) => run_prepare(args, cli.quiet),
        Commands::Prime(args) => run_prime(args),
        Commands::Decode(args) => run_decode(args),
        Commands::Info(args) => run_info(args),
    }
}

fn init_logging(verbose: u8, quiet: u8) {
    use log::LevelFilter;

    let level = if quiet > 0 {
        match quiet {
            1 => LevelFilter::Warn,
            _ => LevelFilter::Error,
        }
    } else {
        match verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    let mut builder = env_logger::Builder::from_env(Env::default().default_filter_or("info"));
    builder.format_timestamp_millis();
    builder.filter_level(level);
    let _ = builder.try_init();
}

fn configure_threads(threads: Option<usize>) -> Result<()> {
    if let Some(threads) = threads {
        ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .context("unable to configure Rayon thread pool")?;
    }
    Ok(())
}

fn show_progress(no_progress: bool, quiet: u8) -> bool {
    !no_progress && quiet == 0
}

fn spinner(enabled: bool, message: &'static str) -> Result<Option<ProgressBar>> {
    if !enabled {
        return Ok(None);
    }
    let pb = ProgressBar::new_spinner();
    let style = ProgressStyle::with_template("{spinner} {msg} {elapsed}")
        .context("invalid progress template")?
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏");
    pb.set_style(style);
    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(80));
    Ok(Some(pb))
}

fn fail_on_skipped(report: &ScanReport) -> Result<()> {
    if report.has_failures() {
        for path in &report.failed_files {
            warn!("could not decode {}", path.display());
        }
        bail!(
            "{} capture(s) could not be decoded",
            report.failed_files.len()
        );
    }
    Ok(())
}

fn report_json(report: &ScanReport) -> serde_json::Value {
    json!({
        "files_discovered": report.files_discovered,
        "files_accepted": report.files_accepted,
        "files_skipped_short": report.files_skipped_short,
        "failed_files": report.failed_files,
        "token_count": report.token_count,
        "total_ticks": report.total_ticks,
        "total_minutes": report.total_minutes(),
    })
}

fn run_vocab(args: VocabArgs, quiet: u8) -> Result<()> {
    configure_threads(args.scan.threads)?;
    let ingest = args.scan.ingest_config();
    fs::create_dir_all(&args.output)
        .with_context(|| format!("failed to create output directory {}", args.output.display()))?;
    let path = args.output.join(VOCABULARY_FILE);

    let pb = spinner(show_progress(args.scan.no_progress, quiet), "scanning captures...")?;
    let start = Instant::now();
    let (vocab, report) = load_or_build(&path, &args.scan.inputs, &ingest)
        .with_context(|| format!("failed to build vocabulary {}", path.display()))?;
    if let Some(pb) = pb {
        pb.finish_with_message("scan complete");
    }

    if args.json {
        let summary = json!({
            "path": path.display().to_string(),
            "vocabulary_len": vocab.len(),
            "end_token": vocab.end_id(),
            "reused": report.is_none(),
            "scan": report.as_ref().map(report_json),
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        match &report {
            Some(report) => println!(
                "✅ wrote {} entries to {} ({} of {} files, {:.2?})",
                vocab.len(),
                path.display(),
                report.files_accepted,
                report.files_discovered,
                start.elapsed()
            ),
            None => println!(
                "reused existing vocabulary {} ({} entries)",
                path.display(),
                vocab.len()
            ),
        }
    }

    match report {
        Some(report) => fail_on_skipped(&report),
        None => Ok(()),
    }
}

fn run_prepare(args: PrepareArgs, quiet: u8) -> Result<()> {
    configure_threads(args.scan.threads)?;
    let ingest = args.scan.ingest_config();
    let mut builder = DatasetConfig::builder().seed(args.seed);
    if let Some(dataset) = &args.dataset {
        builder = builder.dataset(dataset.clone());
    }
    let cfg = builder.build()?;

    let pb = spinner(show_progress(args.scan.no_progress, quiet), "preparing dataset...")?;
    let start = Instant::now();
    let prepared = prepare_dataset(&args.scan.inputs, &args.output, &ingest, &cfg)
        .with_context(|| format!("failed to prepare dataset in {}", args.output.display()))?;
    if let Some(pb) = pb {
        pb.finish_with_message("dataset complete");
    }
    let elapsed = start.elapsed();
    let metadata = &prepared.metadata;
    info!("prepared {} in {elapsed:.2?}", args.output.display());

    if args.json {
        let summary = json!({
            "output": args.output.display().to_string(),
            "metadata": metadata,
            "vocabulary_scan": prepared.vocabulary_report.as_ref().map(report_json),
            "assembly": report_json(&prepared.assembly_report),
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!(
            "✅ wrote {} train / {} val tokens to {}",
            metadata.train_tokens,
            metadata.val_tokens,
            args.output.display()
        );
        println!(
            "   vocabulary {} (padded {}) | {:.2} minutes | {:.2?}",
            metadata.vocabulary_len,
            metadata.vocab_size,
            ticks_to_minutes(metadata.total_ticks),
            elapsed
        );
    }

    if let Some(report) = &prepared.vocabulary_report {
        fail_on_skipped(report)?;
    }
    fail_on_skipped(&prepared.assembly_report)
}

fn run_prime(args: PrimeArgs) -> Result<()> {
    let vocab = open_existing(&args.data_dir.join(VOCABULARY_FILE))?;
    let start_ticks = args
        .start_ticks
        .unwrap_or(GenerateConfig::default().start_ticks);
    let vgm = VgmFile::load(&args.file)
        .with_context(|| format!("failed to load capture {}", args.file.display()))?;
    let tokens = prime_tokens(&vgm, &vocab, start_ticks)
        .with_context(|| format!("failed to prime from {}", args.file.display()))?;

    if args.json {
        let record = json!({
            "path": args.file.display().to_string(),
            "start_ticks": start_ticks,
            "tokens": tokens,
        });
        println!("{}", serde_json::to_string(&record)?);
    } else {
        let line = tokens
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" ");
        println!("{line}");
    }
    Ok(())
}

fn load_header(path: &Path) -> Result<VgmHeader> {
    let vgm =
        VgmFile::load(path).with_context(|| format!("failed to load capture {}", path.display()))?;
    Ok(vgm.header().clone())
}

fn describe_stop(stop: StopReason) -> String {
    match stop {
        StopReason::Terminator => "terminator".to_string(),
        StopReason::InvalidToken(token) => format!("invalid token {token}"),
        StopReason::Exhausted => "token budget exhausted".to_string(),
    }
}

fn run_decode(args: DecodeArgs) -> Result<()> {
    let defaults = GenerateConfig::default();
    let cfg = GenerateConfig {
        max_new_tokens: args.max_new_tokens.unwrap_or(defaults.max_new_tokens),
        start_ticks: args.start_ticks.unwrap_or(defaults.start_ticks),
        output_name: args.output_name.clone().unwrap_or(defaults.output_name),
    };
    cfg.validate()?;
    let vocab = open_existing(&args.data_dir.join(VOCABULARY_FILE))?;

    let (prompt, header) = match &args.prime {
        Some(path) => {
            let vgm = VgmFile::load(path)
                .with_context(|| format!("failed to load priming capture {}", path.display()))?;
            let prompt = prime_tokens(&vgm, &vocab, cfg.start_ticks)
                .with_context(|| format!("failed to prime from {}", path.display()))?;
            info!("primed with {} tokens from {}", prompt.len(), path.display());
            (prompt, Some(vgm.header().clone()))
        }
        None => {
            let header = args.header_from.as_deref().map(load_header).transpose()?;
            (default_prompt(&vocab), header)
        }
    };

    fs::create_dir_all(&args.output_dir).with_context(|| {
        format!(
            "failed to create output directory {}",
            args.output_dir.display()
        )
    })?;

    for (index, token_path) in args.tokens.iter().enumerate() {
        let mut sampler = ReplaySampler::from_file(token_path)
            .with_context(|| format!("failed to read tokens from {}", token_path.display()))?;
        let sample = generate(&vocab, &mut sampler, &prompt, cfg.max_new_tokens)?;
        let accepted = sample.accepted();
        let ticks = sample.ticks;
        let stop = describe_stop(sample.stop);
        let out_path = args.output_dir.join(cfg.sample_file_name(index));
        sample
            .into_vgm(header.clone())
            .save(&out_path)
            .with_context(|| format!("failed to write {}", out_path.display()))?;
        println!(
            "{} => {} ({accepted} commands, {ticks} ticks ({:.2} minutes), {stop})",
            token_path.display(),
            out_path.display(),
            ticks_to_minutes(ticks)
        );
    }
    Ok(())
}

fn run_info(args: InfoArgs) -> Result<()> {
    let meta_path = args.data_dir.join(META_FILE);
    let metadata = DatasetMetadata::load(&meta_path)
        .with_context(|| format!("failed to read {}", meta_path.display()))?;
    let vocab = open_existing(&args.data_dir.join(VOCABULARY_FILE))?;
    if vocab.len() != metadata.vocabulary_len {
        warn!(
            "{} lists {} entries but metadata records {}",
            VOCABULARY_FILE,
            vocab.len(),
            metadata.vocabulary_len
        );
    }

    if args.json {
        let summary = json!({
            "path": args.data_dir.display().to_string(),
            "dataset": metadata.dataset,
            "vocab_size": metadata.vocab_size,
            "vocabulary_len": vocab.len(),
            "end_token": vocab.end_id(),
            "train_tokens": metadata.train_tokens,
            "val_tokens": metadata.val_tokens,
            "total_ticks": metadata.total_ticks,
            "total_minutes": ticks_to_minutes(metadata.total_ticks),
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("Dataset      : {}", metadata.dataset);
        println!("Vocab size   : {} (padded {})", vocab.len(), metadata.vocab_size);
        println!("End token    : {}", vocab.end_id());
        println!("Train tokens : {}", metadata.train_tokens);
        println!("Val tokens   : {}", metadata.val_tokens);
        println!(
            "Duration     : {} ticks ({:.2} minutes)",
            metadata.total_ticks,
            ticks_to_minutes(metadata.total_ticks)
        );
    }
    Ok(())
}
