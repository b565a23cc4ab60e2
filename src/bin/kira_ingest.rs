use std::path::PathBuf;
use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use kira_biobank_ingest::app::{App, OnFailure, UpdateOptions, init_record_set};
use kira_biobank_ingest::config::{ConfigStore, RecordSetConfig};
use kira_biobank_ingest::domain::{RecordSpec, SubjectId};
use kira_biobank_ingest::error::IngestError;
use kira_biobank_ingest::fetch::{DEFAULT_FETCH_TOOL, FetchInvoker};
use kira_biobank_ingest::layout::DEFAULT_NON_BIDS_DIR;
use kira_biobank_ingest::output::{JsonOutput, OutputMode, TextOutput};
use kira_biobank_ingest::vcs::GitRepo;

#[derive(Parser)]
#[command(name = "kira-ingest")]
#[command(about = "Incremental biobank record ingestion onto git snapshot branches")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true, default_value = ".")]
    repo: Utf8PathBuf,

    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Define the subject and the records to track")]
    Init(InitArgs),
    #[command(about = "Fetch, lay out and commit the tracked records")]
    Update(UpdateArgs),
    #[command(about = "Show the tracked records and snapshot branches")]
    Show,
}

#[derive(Args)]
struct InitArgs {
    subject: String,

    /// Record identifiers such as 20227_2_0 or 25747_2_0.adv.
    #[arg(required = true)]
    records: Vec<String>,

    /// Also maintain the BIDS-like layout on incoming-bids.
    #[arg(long)]
    bids: bool,

    #[arg(long)]
    force: bool,
}

#[derive(Args)]
struct UpdateArgs {
    #[arg(long)]
    merge: bool,

    /// Re-derive layouts even when nothing new was fetched.
    #[arg(long)]
    force: bool,

    #[arg(long, value_enum, default_value_t = OnFailure::Raise)]
    on_failure: OnFailure,

    #[arg(long, default_value = DEFAULT_FETCH_TOOL)]
    fetch_tool: String,

    #[arg(long)]
    keyfile: Option<PathBuf>,

    #[arg(long, default_value = DEFAULT_NON_BIDS_DIR)]
    non_bids_dir: String,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<IngestError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &IngestError) -> u8 {
    match error {
        IngestError::InvalidRecord(_)
        | IngestError::InvalidSubject(_)
        | IngestError::EmptyRecordSet
        | IngestError::MissingConfig(_)
        | IngestError::ConfigExists(_)
        | IngestError::ConfigRead(_)
        | IngestError::ConfigParse(_) => 2,
        IngestError::FetchToolMissing(_)
        | IngestError::FetchFailed(_)
        | IngestError::Vcs { .. } => 3,
        IngestError::CycleFailed { .. }
        | IngestError::DirtyTree { .. }
        | IngestError::DetachedHead => 4,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Text
    };

    let repo = GitRepo::open(&cli.repo)?;
    let store = ConfigStore::in_git_dir(&repo.git_dir()?);

    match cli.command {
        Commands::Init(args) => run_init(args, &store, output_mode),
        Commands::Update(args) => run_update(args, repo, &store, output_mode),
        Commands::Show => run_show(repo, &store, output_mode),
    }
}

fn run_init(args: InitArgs, store: &ConfigStore, output_mode: OutputMode) -> miette::Result<()> {
    let subject: SubjectId = args.subject.parse()?;
    let records = args
        .records
        .iter()
        .map(|raw| raw.parse())
        .collect::<Result<Vec<RecordSpec>, IngestError>>()?;
    let config = RecordSetConfig::new(subject, records, args.bids);
    let result = init_record_set(store, &config, args.force)?;
    match output_mode {
        OutputMode::Json => JsonOutput::print_init(&result).into_diagnostic()?,
        OutputMode::Text => TextOutput::print_init(&result),
    }
    Ok(())
}

fn run_update(
    args: UpdateArgs,
    repo: GitRepo,
    store: &ConfigStore,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let config = store.load()?;
    let keyfile = args
        .keyfile
        .map(|path| std::path::absolute(path).into_diagnostic())
        .transpose()?;
    let fetcher = FetchInvoker::new(args.fetch_tool).with_keyfile(keyfile);
    let app = App::new(repo, fetcher);
    let options = UpdateOptions {
        merge: args.merge,
        force: args.force,
        on_failure: args.on_failure,
        non_bids_dir: args.non_bids_dir,
    };

    match output_mode {
        OutputMode::Json => {
            let result = app.update(&config, &options, &JsonOutput)?;
            JsonOutput::print_update(&result).into_diagnostic()?;
        }
        OutputMode::Text => {
            let result = app.update(&config, &options, &TextOutput)?;
            TextOutput::print_update(&result);
        }
    }
    Ok(())
}

fn run_show(repo: GitRepo, store: &ConfigStore, output_mode: OutputMode) -> miette::Result<()> {
    let config = store.load()?;
    let app = App::new(repo, FetchInvoker::default());
    let result = app.show(&config)?;
    match output_mode {
        OutputMode::Json => JsonOutput::print_show(&result).into_diagnostic()?,
        OutputMode::Text => TextOutput::print_show(&result),
    }
    Ok(())
}
