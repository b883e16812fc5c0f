mod data;
mod error;
mod model;
mod training;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use burn::{
    module::Module,
    optim::Optimizer,
    tensor::backend::{AutodiffBackend, Backend},
};
use clap::{Parser, ValueEnum};
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use data::{DataPipeline, Split};
use error::TrainError;
use model::{Classifier, ModelCatalog, ModelRegistry};
use training::{
    optim, train_and_evaluate, CsvScalarWriter, HeldOutEvaluator, Hyperparameters, LrSchedule,
    Metrics, OptimizerKind, Session, TrainingOutcome, PARAMS_FILE, SCALARS_FILE,
};

#[cfg(not(feature = "wgpu"))]
type TrainBackend = burn::backend::Autodiff<burn::backend::NdArray<f32>>;
#[cfg(feature = "wgpu")]
type TrainBackend = burn::backend::Autodiff<burn::backend::Wgpu>;

/// Batches per split in a `test` run
const TEST_RUN_BATCHES: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum RunMode {
    /// Run a handful of batches to check the whole flow
    Test,
    /// Train on the full dataset
    Train,
}

impl RunMode {
    fn max_batches(self) -> Option<usize> {
        match self {
            RunMode::Test => Some(TEST_RUN_BATCHES),
            RunMode::Train => None,
        }
    }
}

/// Train an image classifier on CIFAR-10
#[derive(Parser, Debug)]
#[command(name = "convnet-trainer", version, about, long_about = None)]
struct Cli {
    /// Name of the network to train, looked up in the model catalog.
    /// Built in: resnet8, resnet20, resnet32, plain20 (no DenseNet variants)
    #[arg(long, default_value = "resnet20")]
    model: String,

    /// Directory containing the dataset
    #[arg(long, default_value = "./data/")]
    data_dir: PathBuf,

    /// Directory containing params.json; checkpoints and logs are written here
    #[arg(long, default_value = "./experiments/base-model")]
    exp_dir: PathBuf,

    /// Checkpoint in the experiment directory to restore before training (e.g. "best")
    #[arg(long)]
    restore_file: Option<String>,

    /// "test" runs a few batches to check the flow, "train" runs everything
    #[arg(long, value_enum, default_value_t = RunMode::Test)]
    run_mode: RunMode,

    /// JSON file mapping model names to constructors (defaults to the built-in models)
    #[arg(long)]
    models: Option<PathBuf>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// Logs to stdout and, when the experiment directory exists, to `train.log` in it
fn init_logging(cli: &Cli) -> Option<WorkerGuard> {
    let filter = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_filter(EnvFilter::new(filter));

    let (file_layer, guard) = if cli.exp_dir.is_dir() {
        let appender = tracing_appender::rolling::never(&cli.exp_dir, "train.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(writer)
            .with_filter(EnvFilter::new("info"));
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(stdout_layer)
        .with(file_layer)
        .init();
    guard
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let _guard = init_logging(&cli);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<(), TrainError> {
    let params = Hyperparameters::load(&cli.exp_dir.join(PARAMS_FILE))?;
    let catalog = match &cli.models {
        Some(path) => ModelCatalog::load(path)?,
        None => ModelCatalog::builtin(),
    };
    let model_config = ModelRegistry::builtin().resolve(&catalog, &cli.model)?;

    let device = <TrainBackend as Backend>::Device::default();
    TrainBackend::seed(params.seed);

    let model = model_config.init::<TrainBackend>(&device);
    info!(
        "Model {} ({} layers, {} parameters)",
        cli.model,
        model_config.depth(),
        model.num_params()
    );

    info!("Loading datasets...");
    let pipeline = DataPipeline::new(&cli.data_dir, &params, cli.run_mode.max_batches());
    let train_loader = pipeline.fetch::<TrainBackend>(Split::Train)?;
    let val_loader = pipeline.fetch::<<TrainBackend as AutodiffBackend>::InnerBackend>(Split::Test)?;
    info!("- done.");

    let session = Session::<TrainBackend> {
        params: &params,
        exp_dir: &cli.exp_dir,
        restore_file: cli.restore_file.as_deref(),
        device,
    };
    let mut run = RunParts {
        train_loader,
        evaluator: HeldOutEvaluator::new(val_loader, Metrics::standard()),
        schedule: LrSchedule::from_params(&params),
        sink: CsvScalarWriter::open(&cli.exp_dir.join(SCALARS_FILE))?,
    };

    info!("Starting training for {} epoch(s)...", params.num_epochs);
    let outcome = match params.optimizer {
        OptimizerKind::Adam => {
            let optimizer = optim::adam(&params).init::<TrainBackend, Classifier<TrainBackend>>();
            run.fit(&session, model, optimizer)?
        }
        OptimizerKind::Sgd => {
            let optimizer = optim::sgd(&params).init::<TrainBackend, Classifier<TrainBackend>>();
            run.fit(&session, model, optimizer)?
        }
    };

    if let Some(epoch) = outcome.restored_epoch {
        info!("Resumed from a checkpoint saved after epoch {}", epoch);
    }
    let checkpoint_dir = canonical_display(&cli.exp_dir);
    match outcome.best_epoch {
        Some(epoch) => info!(
            "Training complete after {} epoch(s), best validation accuracy {:.4} at epoch {} (checkpoints in {})",
            outcome.history.epochs.len(),
            outcome.best_val_accuracy,
            epoch,
            checkpoint_dir
        ),
        None => info!("Training complete, no epoch was run"),
    }
    Ok(())
}

/// Collaborators shared by both optimizer variants
struct RunParts<B: AutodiffBackend> {
    train_loader: data::ImageLoader<B>,
    evaluator: HeldOutEvaluator<B>,
    schedule: LrSchedule,
    sink: CsvScalarWriter,
}

impl<B: AutodiffBackend> RunParts<B> {
    fn fit<O: Optimizer<Classifier<B>, B>>(
        &mut self,
        session: &Session<'_, B>,
        model: Classifier<B>,
        optimizer: O,
    ) -> Result<TrainingOutcome, TrainError> {
        train_and_evaluate(
            session,
            model,
            optimizer,
            &self.train_loader,
            &mut self.evaluator,
            &Metrics::standard(),
            &mut self.schedule,
            &mut self.sink,
        )
    }
}

fn canonical_display(path: &Path) -> String {
    path.canonicalize()
        .unwrap_or_else(|_| path.to_path_buf())
        .display()
        .to_string()
}
