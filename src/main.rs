use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::fs;
use std::path::Path;
use std::process::ExitCode;
use std::time::Instant;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;
use wikimention::checkpoint::{self, CheckpointManager, RunKey};
use wikimention::config::{self, DatasetConfig, ExtractConfig};
use wikimention::index::WikiIndex;
use wikimention::parser::PageReader;
use wikimention::store::WikiStore;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "wikimention")]
#[command(about = "Resolve Wikipedia link spans and build entity-linking datasets")]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a parsed page export (JSON lines, optionally .bz2) into the page store
    LoadPages(LoadPagesArgs),
    /// Resolve section links into mention spans and store them
    ExtractLinks(ExtractLinksArgs),
    /// Rank pages by distinct inbound mentions
    Rank(RankArgs),
    /// Build candidates, sampled mentions and train/validation/test files
    BuildDataset(BuildDatasetArgs),
}

#[derive(Args)]
struct LoadPagesArgs {
    /// Path to the page export
    #[arg(short, long)]
    input: String,

    /// SQLite database file
    #[arg(long, default_value = config::DEFAULT_DATABASE)]
    database: String,

    /// Pages written per transaction
    #[arg(long, default_value_t = config::DEFAULT_LOAD_BATCH_SIZE)]
    batch_size: usize,
}

#[derive(Args)]
struct ExtractLinksArgs {
    /// SQLite database file
    #[arg(long, default_value = config::DEFAULT_DATABASE)]
    database: String,

    /// Wiki language code
    #[arg(short, long, default_value = "en")]
    language: String,

    /// Sections at or below this many characters are skipped
    #[arg(long, default_value_t = config::DEFAULT_MIN_QUERY_SIZE)]
    min_query_size: usize,

    /// Pages pulled from the store per chunk
    #[arg(long, default_value_t = config::DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,

    /// Start strictly after this page id
    #[arg(long)]
    start_after: Option<i64>,

    /// Last page id (inclusive) of the range this worker owns
    #[arg(long)]
    end_at: Option<i64>,

    /// Limit number of pages to process (for testing)
    #[arg(long)]
    limit: Option<u64>,

    /// Dry run - resolve links without writing them
    #[arg(long)]
    dry_run: bool,

    /// Resume from last checkpoint if available
    #[arg(long)]
    resume: bool,

    /// Clear an existing checkpoint before starting
    #[arg(long)]
    clean: bool,

    /// Directory holding the checkpoint file
    #[arg(long, default_value = ".wikimention")]
    state_dir: String,

    /// Checkpoint interval in chunks processed
    #[arg(long, default_value_t = config::CHECKPOINT_INTERVAL)]
    checkpoint_interval: u32,

    /// Resolve titles against an in-memory index instead of querying the store
    #[arg(long)]
    memory_index: bool,
}

#[derive(Args)]
struct RankArgs {
    /// SQLite database file
    #[arg(long, default_value = config::DEFAULT_DATABASE)]
    database: String,
}

#[derive(Args)]
struct BuildDatasetArgs {
    /// SQLite database file
    #[arg(long, default_value = config::DEFAULT_DATABASE)]
    database: String,

    /// Output directory for dataset files
    #[arg(short, long)]
    output: String,

    /// Wiki language code
    #[arg(short, long, default_value = "en")]
    language: String,

    /// Max chars of query context (left + right)
    #[arg(long, default_value_t = 2048)]
    max_chars: usize,

    /// Max chars kept from each candidate abstract
    #[arg(long, default_value_t = 1000)]
    abstract_max_chars: usize,

    /// Candidates are pages ranked below this (0 = every ranked page)
    #[arg(long, default_value_t = 100_000)]
    max_rank: u64,

    /// Pad the candidate list with the next ranks up to this size (0 = no padding)
    #[arg(long, default_value_t = 100_000)]
    candidates_size: u64,

    #[arg(long, default_value_t = 10_000)]
    validation_size: usize,

    #[arg(long, default_value_t = 10_000)]
    test_size: usize,

    /// Mention texts kept per candidate
    #[arg(long, default_value_t = 5)]
    candidate_text_surfaces: usize,

    /// Occurrences kept per mention text
    #[arg(long, default_value_t = 10)]
    candidate_surface_appearance: usize,

    /// Links sampled from the store
    #[arg(long, default_value_t = 10_000_000)]
    sample_size: usize,

    /// RNG seed for a reproducible build
    #[arg(long)]
    seed: Option<u64>,
}

fn run_load_pages(args: LoadPagesArgs) -> Result<()> {
    let start = Instant::now();
    let store = WikiStore::open(&args.database)?;
    let mut reader = PageReader::open(&args.input)?;

    info!(input = %args.input, database = %args.database, "Loading pages");
    let loaded = store.load_pages(reader.by_ref(), args.batch_size)?;
    store.create_indexes()?;
    let duration = start.elapsed();

    println!();
    println!("=== Summary ===");
    println!("Load time:          {:.2}s", duration.as_secs_f64());
    println!("Pages loaded:       {}", loaded);
    println!("Malformed records:  {}", reader.skipped());

    Ok(())
}

fn run_extract_links(args: ExtractLinksArgs) -> Result<()> {
    let store = WikiStore::open(&args.database)?;
    store.create_indexes()?;

    let key = RunKey {
        database: args.database.clone(),
        language: args.language.clone(),
        end_at: args.end_at,
    };

    if args.clean {
        checkpoint::clear(&args.state_dir)?;
    }

    let checkpoint_mgr = if !args.dry_run {
        Some(CheckpointManager::new(
            &args.state_dir,
            key.clone(),
            args.checkpoint_interval,
        )?)
    } else {
        None
    };

    let checkpoint = if args.resume && !args.clean {
        match checkpoint::load_if_valid(&args.state_dir, &key)? {
            Some(cp) => {
                info!(
                    last_id = cp.last_processed_id,
                    pages = cp.stats.pages_processed,
                    "Resuming from checkpoint"
                );
                if let Some(ref mgr) = checkpoint_mgr {
                    mgr.set_last_id(cp.last_processed_id);
                }
                Some(cp)
            }
            None => {
                info!("No valid checkpoint found, starting fresh");
                None
            }
        }
    } else {
        None
    };

    let config = ExtractConfig {
        min_query_size: args.min_query_size,
        chunk_size: args.chunk_size,
        start_after: args.start_after,
        end_at: args.end_at,
        limit: args.limit,
        dry_run: args.dry_run,
        ..ExtractConfig::new(args.language)
    };

    let start_indexing = Instant::now();
    let index = if args.memory_index {
        let mut index = WikiIndex::new();
        store.for_each_page_header(|header| index.insert_header(header))?;
        info!(
            pages = index.len(),
            redirects = index.redirect_count(),
            "Built in-memory title index"
        );
        Some(index)
    } else {
        None
    };
    let indexing_duration = start_indexing.elapsed();

    let start_extracting = Instant::now();
    let stats = match index.as_ref() {
        Some(index) => wikimention::extract::run_extraction(
            &store,
            index,
            &config,
            checkpoint.as_ref(),
            checkpoint_mgr.as_ref(),
        )?,
        None => wikimention::extract::run_extraction(
            &store,
            &store,
            &config,
            checkpoint.as_ref(),
            checkpoint_mgr.as_ref(),
        )?,
    };
    let extraction_duration = start_extracting.elapsed();
    info!(
        duration_secs = extraction_duration.as_secs_f64(),
        "Extraction complete"
    );

    if let Some(ref mgr) = checkpoint_mgr {
        if let Err(e) = mgr.clear() {
            warn!(error = %e, "Failed to clear checkpoint");
        }
    }

    println!();
    println!("=== Summary ===");
    if args.memory_index {
        println!(
            "Indexing time:      {:.2}s",
            indexing_duration.as_secs_f64()
        );
    }
    println!(
        "Extraction time:    {:.2}s",
        extraction_duration.as_secs_f64()
    );
    println!();
    println!("Pages processed:    {}", stats.pages());
    println!("Sections skipped:   {}", stats.sections_skipped());
    println!("Links resolved:     {}", stats.resolved());
    println!("Links stored:       {}", stats.stored());
    println!("Unresolvable links: {}", stats.unresolvable());
    println!("Spans not found:    {}", stats.not_found());
    println!("Span mismatches:    {}", stats.mismatches());

    Ok(())
}

fn run_rank(args: RankArgs) -> Result<()> {
    let start = Instant::now();
    let store = WikiStore::open(&args.database)?;
    store.create_indexes()?;
    let summary = wikimention::rank::run_rank(&store)?;

    println!();
    println!("=== Summary ===");
    println!("Rank time:          {:.2}s", start.elapsed().as_secs_f64());
    println!("Linked targets:     {}", summary.targets);
    println!("Pages ranked:       {}", summary.pages_ranked);

    Ok(())
}

fn run_build_dataset(args: BuildDatasetArgs) -> Result<()> {
    if !Path::new(&args.database).exists() {
        anyhow::bail!("Database not found: {}", args.database);
    }
    fs::create_dir_all(&args.output)
        .with_context(|| format!("Failed to create output directory: {}", args.output))?;

    let start = Instant::now();
    let store = WikiStore::open(&args.database)?;
    let config = DatasetConfig {
        language: args.language,
        output_path: args.output,
        max_chars: args.max_chars,
        abstract_max_chars: args.abstract_max_chars,
        max_rank: args.max_rank,
        candidates_size: args.candidates_size,
        validation_size: args.validation_size,
        test_size: args.test_size,
        candidate_text_surfaces: args.candidate_text_surfaces,
        candidate_surface_appearance: args.candidate_surface_appearance,
        sample_size: args.sample_size,
        seed: args.seed,
    };
    let summary = wikimention::dataset::build_dataset(&store, &config)?;

    println!();
    println!("=== Summary ===");
    println!("Build time:         {:.2}s", start.elapsed().as_secs_f64());
    println!("Seed:               {}", summary.seed);
    println!();
    println!("Candidates:         {}", summary.candidates);
    println!("Padding candidates: {}", summary.padded_candidates);
    println!("Candidate lines:    {}", summary.lines);
    println!("Dataset items:      {}", summary.links.items);
    println!("Missing docs:       {}", summary.links.docs_missing);
    println!("Missing sections:   {}", summary.links.sections_missing);
    println!("Rejected windows:   {}", summary.links.windows_rejected);
    println!("Train items:        {}", summary.splits.train);
    println!("Validation items:   {}", summary.splits.validation);
    println!("Test items:         {}", summary.splits.test);

    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return ExitCode::FAILURE;
    }

    let result = match cli.command {
        Commands::LoadPages(args) => run_load_pages(args),
        Commands::ExtractLinks(args) => run_extract_links(args),
        Commands::Rank(args) => run_rank(args),
        Commands::BuildDataset(args) => run_build_dataset(args),
    };

    match result {
        Ok(()) => {
            info!("Completed successfully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Error: {:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
