//! `dga-nn` command line entry point.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use dga_nn::compare::{ComparisonHarness, JsonBaselineLoader};
use dga_nn::config::{AppConfig, CacheStorage};
use dga_nn::cross_validation::{CrossValidationRunner, METRIC_KEYS};
use dga_nn::dataset::{Dataset, DatasetSource, ParquetDatasetSource};
use dga_nn::experiment::{ExperimentDirectory, ResultAggregator, ResultsLog};
use dga_nn::model::{EstimatorFactory, Model, NetworkFactory, TrainingOptions};
use dga_nn::sampler::Sampler;

#[derive(Parser, Debug)]
#[command(
    name = "dga-nn",
    version,
    about = "Train, cross-validate and compare a neural DGA domain classifier."
)]
struct Cli {
    /// JSON configuration file; defaults apply to anything it omits
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Stratified k-fold cross-validation, recorded as a new experiment
    CrossVal(CrossValArgs),
    /// Train on a full dataset and save the model as a new experiment
    Train(TrainArgs),
    /// Compare a saved model with the baseline classifier
    Compare(CompareArgs),
    /// Print the metric summary of an experiment
    Results(ResultsArgs),
    /// Sample class indices from a JSON batch of probability vectors
    Sample(SampleArgs),
}

#[derive(Args, Debug)]
struct DataArgs {
    /// Directory holding `<dataset>.parquet` files
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    /// Keep at most this many rows, balanced across classes
    #[arg(long)]
    n_samples: Option<usize>,
}

#[derive(Args, Debug)]
struct CrossValArgs {
    #[command(flatten)]
    data: DataArgs,

    /// Number of folds
    #[arg(long)]
    folds: Option<usize>,

    /// Training epochs per fold
    #[arg(long)]
    epochs: Option<usize>,

    /// Minibatch size
    #[arg(long)]
    batch_size: Option<usize>,

    /// Worker threads (default: all cores)
    #[arg(long)]
    jobs: Option<usize>,

    /// Keep the fit cache in memory instead of a temporary directory
    #[arg(long)]
    memory_cache: bool,

    /// Seed for fold assignment (default: different every run)
    #[arg(long)]
    shuffle_seed: Option<u64>,
}

#[derive(Args, Debug)]
struct TrainArgs {
    #[command(flatten)]
    data: DataArgs,

    /// Named dataset to train on instead of legit-dga + suppobox
    #[arg(long)]
    dataset: Option<String>,

    /// Training epochs
    #[arg(long, default_value_t = 100)]
    epochs: usize,

    /// Minibatch size
    #[arg(long, default_value_t = 5)]
    batch_size: usize,
}

#[derive(Args, Debug)]
struct CompareArgs {
    /// Experiment directory of the model to compare
    experiment: PathBuf,

    /// Directory holding `<dataset>.parquet` files
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    /// Baseline classifier file (overrides the configuration)
    #[arg(long)]
    baseline: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct ResultsArgs {
    /// Experiment directory
    experiment: PathBuf,
}

#[derive(Args, Debug)]
struct SampleArgs {
    /// JSON file with a `[item][position][class]` array of probabilities
    input: PathBuf,

    /// Sampling temperature
    #[arg(long, default_value_t = 1.0)]
    temperature: f64,

    /// RNG seed (default: the configured numeric seed)
    #[arg(long)]
    seed: Option<u64>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("dga_nn=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => AppConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => AppConfig::default(),
    };

    match cli.command {
        Commands::CrossVal(args) => cross_val(config, args),
        Commands::Train(args) => train(&config, &args),
        Commands::Compare(args) => compare(config, &args),
        Commands::Results(args) => results(&args.experiment),
        Commands::Sample(args) => sample(&config, &args),
    }
}

fn cross_val(mut config: AppConfig, args: CrossValArgs) -> Result<()> {
    let cv = &mut config.cross_validation;
    if let Some(folds) = args.folds {
        cv.fold_count = folds;
    }
    if let Some(epochs) = args.epochs {
        cv.epochs = epochs;
    }
    if let Some(batch_size) = args.batch_size {
        cv.batch_size = batch_size;
    }
    if args.jobs.is_some() {
        cv.n_jobs = args.jobs;
    }
    if args.memory_cache {
        cv.cache = CacheStorage::Memory;
    }
    if args.shuffle_seed.is_some() {
        config.run.shuffle_seed = args.shuffle_seed;
    }

    let source = ParquetDatasetSource::new(&args.data.data_dir);
    let data = source
        .load_both_datasets(args.data.n_samples, true)
        .context("loading datasets")?;

    let runner = CrossValidationRunner::new(config.cross_validation, config.run, config.experiment);
    let outcome = runner
        .run(data.features(), data.labels(), Arc::new(NetworkFactory::baseline()))
        .context("cross-validation failed")?;

    for summary in outcome.record.summaries() {
        println!("{summary}");
    }
    println!(
        "cache: {} hits / {} misses",
        outcome.cache_hits, outcome.cache_misses
    );
    println!("experiment: {}", outcome.model.directory().display());
    Ok(())
}

fn train(config: &AppConfig, args: &TrainArgs) -> Result<()> {
    let source = ParquetDatasetSource::new(&args.data.data_dir);
    let data: Dataset = match &args.dataset {
        Some(name) => source.load_features_dataset(args.data.n_samples, Some(name.as_str())),
        None => source.load_both_datasets(args.data.n_samples, true),
    }
    .context("loading datasets")?;

    let estimator = NetworkFactory::baseline().build(config.run.numeric_seed)?;
    let mut model = Model::fresh(estimator, &config.experiment)
        .context("creating experiment")?
        .with_training_options(TrainingOptions {
            epochs: args.epochs,
            batch_size: args.batch_size,
        });
    model.log_summary();
    model
        .fit(data.features(), data.labels())
        .context("training failed")?;
    println!("experiment: {}", model.directory().display());
    Ok(())
}

fn compare(config: AppConfig, args: &CompareArgs) -> Result<()> {
    let mut comparison = config.comparison;
    if let Some(baseline) = &args.baseline {
        comparison = comparison.with_baseline_path(baseline);
    }
    let model = Model::reopen(&args.experiment, &NetworkFactory::baseline())
        .with_context(|| format!("reopening {}", args.experiment.display()))?;

    let source = ParquetDatasetSource::new(&args.data_dir);
    let loader = JsonBaselineLoader::new(comparison.baseline_path.clone());
    ComparisonHarness::new(&source, &loader, comparison).compare(&model)?;
    Ok(())
}

fn results(experiment: &Path) -> Result<()> {
    let directory = ExperimentDirectory::open(experiment)?;
    let log = Arc::new(ResultsLog::open(directory.path())?);
    let record = ResultAggregator::new(directory.path(), log)
        .reload()
        .context("reading metric document")?;
    record.ensure_keys(&METRIC_KEYS)?;
    println!("{} folds", record.fold_count());
    for summary in record.summaries() {
        println!("{summary}");
    }
    Ok(())
}

fn sample(config: &AppConfig, args: &SampleArgs) -> Result<()> {
    let raw = fs::read(&args.input)
        .with_context(|| format!("reading {}", args.input.display()))?;
    let batch: Vec<Vec<Vec<f64>>> =
        serde_json::from_slice(&raw).context("input must be a 3-dimensional array of numbers")?;

    let mut sampler = match args.seed {
        Some(seed) => Sampler::new(seed),
        None => Sampler::from_config(&config.run),
    }
    .with_temperature(args.temperature)?;
    let indices = sampler.sample(&batch)?;
    println!("{}", serde_json::to_string(&indices)?);
    Ok(())
}
