//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};

use clap::{ArgGroup, Args, Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use sourceflow_client::HttpNotebookApi;
use sourceflow_core::{
    Completion, EmbedChoice, IngestionReport, NoteDraft, ProgressReporter, RetryPayload,
    SourceFields, Sourceflow, StageOutcome,
};
use sourceflow_shared::{
    ApiError, AppConfig, ConnectionStatus, CreateOptions, EmbeddingStatus, FileRef,
    IngestionRequest, NotebookApi, NotebookUpdate, ReconcileError, SourceKind, SourceflowError,
    Stage, init_config, load_config, validate_base_url,
};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// Sourceflow: add sources to notebooks and track their enrichment.
#[derive(Parser)]
#[command(
    name = "sourceflow",
    version,
    about = "Add links, files, and text to notebooks, then transform and embed them.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Notebook service base URL (overrides `api.base_url`).
    #[arg(long, env = "SOURCEFLOW_API_URL", global = true)]
    pub api_url: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Add a new source and run the enrichment pipeline.
    Add(AddArgs),

    /// Show a source's current enrichment state.
    Show {
        /// Source ID.
        source_id: String,
    },

    /// Re-run one failed stage for an existing source.
    Retry {
        /// Source ID.
        source_id: String,

        #[command(subcommand)]
        stage: RetryStage,
    },

    /// Save the original file of an uploaded source.
    Download {
        /// Source ID.
        source_id: String,

        /// Output path (defaults to the file's own name in the current directory).
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Delete a source.
    Delete {
        /// Source ID.
        source_id: String,
    },

    /// Change a source's title.
    Rename {
        /// Source ID.
        source_id: String,

        /// New title.
        title: String,
    },

    /// Note management.
    Note {
        #[command(subcommand)]
        action: NoteAction,
    },

    /// Notebook management.
    Notebook {
        #[command(subcommand)]
        action: NotebookAction,
    },

    /// List transformations and the embedding policy.
    Capabilities,

    /// Check that the notebook service and its database are reachable.
    Ping,

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Arguments for `add`. Exactly one of `--url`, `--text`, `--file`.
#[derive(Args)]
#[command(group(ArgGroup::new("content").required(true).args(["url", "text", "file"])))]
pub(crate) struct AddArgs {
    /// Link to ingest.
    #[arg(long)]
    pub url: Option<String>,

    /// Text to ingest as-is.
    #[arg(long)]
    pub text: Option<String>,

    /// File to upload.
    #[arg(long)]
    pub file: Option<PathBuf>,

    /// Optional title.
    #[arg(short, long)]
    pub title: Option<String>,

    /// Notebook to attach the source to (repeatable).
    #[arg(short, long = "notebook")]
    pub notebooks: Vec<String>,

    /// Transformation to apply (repeatable). Defaults to `ingest.default_transformations`.
    #[arg(short = 'x', long = "transformation")]
    pub transformations: Vec<String>,

    /// Request embedding (subject to the service's embedding policy).
    #[arg(short, long)]
    pub embed: bool,

    /// Let the service process the source in the background.
    #[arg(long = "async")]
    pub async_processing: bool,
}

/// Stages that can be retried. `create` is not one of them.
#[derive(Subcommand)]
pub(crate) enum RetryStage {
    /// Attach the source to notebooks again.
    Associate {
        /// Notebook IDs.
        #[arg(required = true)]
        notebooks: Vec<String>,
    },
    /// Apply one transformation.
    Transform {
        /// Transformation ID.
        transformation_id: String,
    },
    /// Request embedding again.
    Embed,
}

/// Note subcommands.
#[derive(Subcommand)]
pub(crate) enum NoteAction {
    /// Create a note, or update one with `--id`.
    Save {
        /// Note content.
        content: String,

        /// Existing note ID to update.
        #[arg(long)]
        id: Option<String>,

        /// Optional title.
        #[arg(short, long)]
        title: Option<String>,

        /// Notebook the note belongs to (required to create).
        #[arg(short, long)]
        notebook: Option<String>,
    },
    /// Save a question and answer as an AI note in each notebook.
    Answer {
        /// The question, used as the note title.
        question: String,

        /// The answer, used as the note content.
        answer: String,

        /// Target notebooks (repeatable, at least one).
        #[arg(short, long = "notebook", required = true)]
        notebooks: Vec<String>,
    },
    /// Delete a note.
    Delete {
        /// Note ID.
        id: String,

        /// Notebook the note belongs to.
        #[arg(short, long)]
        notebook: Option<String>,
    },
}

/// Notebook subcommands.
#[derive(Subcommand)]
pub(crate) enum NotebookAction {
    /// Edit a notebook's name, description, or archived flag.
    Update {
        /// Notebook ID.
        notebook_id: String,

        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        description: Option<String>,

        #[arg(long)]
        archived: Option<bool>,
    },
    /// Delete a notebook.
    Delete {
        /// Notebook ID.
        notebook_id: String,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "sourceflow=info",
        1 => "sourceflow=debug",
        _ => "sourceflow=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let api_url = cli.api_url.as_deref();
    match cli.command {
        Command::Add(args) => cmd_add(api_url, args).await,
        Command::Show { source_id } => cmd_show(api_url, &source_id).await,
        Command::Retry { source_id, stage } => cmd_retry(api_url, &source_id, stage).await,
        Command::Download { source_id, out } => cmd_download(api_url, &source_id, out).await,
        Command::Delete { source_id } => cmd_delete(api_url, &source_id).await,
        Command::Rename { source_id, title } => cmd_rename(api_url, &source_id, &title).await,
        Command::Note { action } => cmd_note(api_url, action).await,
        Command::Notebook { action } => cmd_notebook(api_url, action).await,
        Command::Capabilities => cmd_capabilities(api_url).await,
        Command::Ping => cmd_ping(api_url).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

/// Load config, apply the `--api-url` override, and build the core.
fn connect(api_url: Option<&str>) -> Result<(AppConfig, Sourceflow<HttpNotebookApi>)> {
    let mut config = load_config()?;
    if let Some(url) = api_url {
        config.api.base_url = url.to_string();
    }
    let base_url = validate_base_url(&config)?;
    let api = HttpNotebookApi::new(base_url, &config.api)?;
    Ok((config, Sourceflow::new(api)))
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_add(api_url: Option<&str>, args: AddArgs) -> Result<()> {
    let (config, flow) = connect(api_url)?;

    let (kind, fields) = match (args.url, args.text, args.file) {
        (Some(url), _, _) => (SourceKind::Link, SourceFields::link(url)),
        (_, Some(text), _) => (SourceKind::Text, SourceFields::text(text)),
        (_, _, Some(path)) => (SourceKind::Upload, SourceFields::upload(FileRef(path))),
        _ => return Err(eyre!("one of --url, --text, or --file is required")),
    };
    let fields = match args.title {
        Some(title) => fields.with_title(title),
        None => fields,
    };
    let draft = flow.build(kind, &fields)?;

    let notebooks = if args.notebooks.is_empty() {
        config.ingest.default_notebooks.clone()
    } else {
        args.notebooks
    };
    let transformations = if args.transformations.is_empty() {
        config.ingest.default_transformations.clone()
    } else {
        args.transformations
    };

    let request = IngestionRequest {
        notebook_ids: notebooks.into_iter().collect(),
        transformation_ids: transformations,
        embed: args.embed,
        options: CreateOptions {
            async_processing: args.async_processing || config.ingest.async_processing,
        },
        ..IngestionRequest::create_only(draft)
    };

    info!(
        %kind,
        notebooks = request.notebook_ids.len(),
        transformations = request.transformation_ids.len(),
        "adding source"
    );

    let reporter = CliProgress::new();
    let report = flow.ingest(&request, &reporter).await?;
    print_report(&report);

    Ok(())
}

async fn cmd_show(api_url: Option<&str>, source_id: &str) -> Result<()> {
    let (_, flow) = connect(api_url)?;

    let (state, outdated) = match flow.reconcile(source_id).await {
        Ok(state) => (state, false),
        Err(ReconcileError {
            stale: Some(state),
            cause,
            ..
        }) => {
            eprintln!("  warning: could not refresh ({cause}); showing last known state");
            (state, true)
        }
        Err(e) => return Err(e.into()),
    };

    let source = &state.source;
    println!();
    println!("  ID:        {}", source.id);
    println!("  Title:     {}", source.title.as_deref().unwrap_or("(untitled)"));
    println!("  Kind:      {}", source.location.kind());
    println!("  Notebooks: {}", join_or_none(source.notebooks.iter()));
    println!("  Embedding: {}", embedding_label(state.embedding_status));
    if source.location.kind() == SourceKind::Upload {
        let file = match source.file_available {
            Some(true) => "available",
            Some(false) => "no longer on the server",
            None => "unknown",
        };
        println!("  File:      {file}");
    }
    println!("  Updated:   {}", source.updated.format("%Y-%m-%d %H:%M UTC"));
    if outdated {
        println!("  (may be outdated)");
    }
    println!();
    println!("  Insights ({}):", state.insights.len());
    for insight in &state.insights {
        println!("    - [{}] {}", insight.insight_type, first_line(&insight.content));
    }
    if !state.pending_transformations.is_empty() {
        println!(
            "  Pending:   {}",
            join_or_none(state.pending_transformations.iter())
        );
    }
    println!();

    Ok(())
}

async fn cmd_download(api_url: Option<&str>, source_id: &str, out: Option<PathBuf>) -> Result<()> {
    let (_, flow) = connect(api_url)?;

    let file = match flow.download_file(source_id).await {
        Ok(file) => file,
        Err(SourceflowError::Api(ApiError::NotFound(_))) => {
            return Err(eyre!("the original file of {source_id} is not on the server"));
        }
        Err(e) => return Err(e.into()),
    };

    // Never let a server-provided name pick a directory.
    let path = out.unwrap_or_else(|| {
        file.file_name
            .as_deref()
            .and_then(|name| Path::new(name).file_name())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(format!("source-{source_id}")))
    });
    tokio::fs::write(&path, &file.bytes)
        .await
        .map_err(|e| eyre!("cannot write {}: {e}", path.display()))?;

    println!("  Saved {} bytes to {}", file.bytes.len(), path.display());
    Ok(())
}

async fn cmd_retry(api_url: Option<&str>, source_id: &str, stage: RetryStage) -> Result<()> {
    let (_, flow) = connect(api_url)?;

    let payload = match stage {
        RetryStage::Associate { notebooks } => RetryPayload::Associate {
            notebook_ids: notebooks.into_iter().collect(),
        },
        RetryStage::Transform { transformation_id } => {
            RetryPayload::Transform { transformation_id }
        }
        RetryStage::Embed => RetryPayload::Embed,
    };
    let stage = payload.stage();

    flow.retry_stage(source_id, payload).await?;
    println!("  {stage} stage succeeded for {source_id}");

    Ok(())
}

async fn cmd_delete(api_url: Option<&str>, source_id: &str) -> Result<()> {
    let (_, flow) = connect(api_url)?;
    flow.mutations().delete_source(source_id).await?;
    println!("  Deleted {source_id}");
    Ok(())
}

async fn cmd_rename(api_url: Option<&str>, source_id: &str, title: &str) -> Result<()> {
    let (_, flow) = connect(api_url)?;
    if flow.mutations().rename_source(source_id, title).await? {
        println!("  Renamed {source_id}");
    } else {
        println!("  Title unchanged");
    }
    Ok(())
}

async fn cmd_note(api_url: Option<&str>, action: NoteAction) -> Result<()> {
    let (_, flow) = connect(api_url)?;
    let mutations = flow.mutations();

    match action {
        NoteAction::Save {
            content,
            id,
            title,
            notebook,
        } => {
            let draft = NoteDraft {
                note_id: id,
                title,
                content,
                notebook_id: notebook,
            };
            let note = mutations.save_note(&draft).await?;
            println!("  Saved {}", note.id);
        }
        NoteAction::Answer {
            question,
            answer,
            notebooks,
        } => {
            let notes = mutations
                .save_to_notebooks(&question, &answer, &notebooks)
                .await?;
            println!("  Saved to {} notebook(s)", notes.len());
        }
        NoteAction::Delete { id, notebook } => {
            mutations.delete_note(&id, notebook.as_deref()).await?;
            println!("  Deleted {id}");
        }
    }
    Ok(())
}

async fn cmd_notebook(api_url: Option<&str>, action: NotebookAction) -> Result<()> {
    let (_, flow) = connect(api_url)?;

    match action {
        NotebookAction::Update {
            notebook_id,
            name,
            description,
            archived,
        } => {
            let update = NotebookUpdate {
                name,
                description,
                archived,
            };
            if update == NotebookUpdate::default() {
                return Err(eyre!("nothing to update: pass --name, --description, or --archived"));
            }
            flow.mutations().update_notebook(&notebook_id, &update).await?;
            println!("  Updated {notebook_id}");
        }
        NotebookAction::Delete { notebook_id } => {
            flow.mutations().delete_notebook(&notebook_id).await?;
            println!("  Deleted {notebook_id}");
        }
    }
    Ok(())
}

async fn cmd_capabilities(api_url: Option<&str>) -> Result<()> {
    let (_, flow) = connect(api_url)?;
    let caps = flow.capabilities().load().await;

    for err in &caps.errors {
        eprintln!("  warning: {err}");
    }

    println!();
    println!("  Transformations:");
    if caps.transformations.is_empty() {
        println!("    (none available)");
    }
    for t in &caps.transformations {
        let default = if t.apply_default { " (default)" } else { "" };
        println!("    {:<32} {}{default}", t.id, t.title);
    }
    println!();
    let embed = match caps.embed_choice() {
        EmbedChoice::UserChoice => "ask (pass --embed to request)",
        EmbedChoice::ForcedOn => "always",
        EmbedChoice::ForcedOff => "never",
    };
    println!("  Embedding: {embed}");
    println!();

    Ok(())
}

async fn cmd_ping(api_url: Option<&str>) -> Result<()> {
    let mut config = load_config()?;
    if let Some(url) = api_url {
        config.api.base_url = url.to_string();
    }
    let base_url = validate_base_url(&config)?;
    let api = HttpNotebookApi::new(base_url.clone(), &config.api)?;

    match api.check_connection().await {
        Ok(ConnectionStatus::Online) => {
            println!("  {base_url} is reachable");
            Ok(())
        }
        Ok(ConnectionStatus::DatabaseOffline) => {
            Err(eyre!("{base_url} is reachable but its database is offline"))
        }
        Err(e) => Err(eyre!("{base_url} is not reachable: {e}")),
    }
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

fn print_report(report: &IngestionReport) {
    let stages = &report.stages;

    println!();
    match report.completion {
        Completion::Complete => println!("  Source added successfully!"),
        Completion::Partial => println!("  Source added, but some stages failed."),
    }
    println!("  ID:        {}", report.source.id);
    println!("  Associate: {}", outcome_label(&stages.associate));
    if stages.transform.is_empty() {
        println!("  Transform: {}", outcome_label(&StageOutcome::Skipped));
    }
    for t in &stages.transform {
        println!("  Transform: {} {}", t.transformation_id, outcome_label(&t.outcome));
    }
    println!("  Embed:     {}", outcome_label(&stages.embed));
    println!("  Time:      {:.1}s", report.elapsed.as_secs_f64());

    let plan = report.retry_plan();
    if !plan.is_empty() {
        println!();
        println!("  Retry with:");
        for payload in plan {
            println!("    sourceflow retry {} {}", report.source.id, retry_args(&payload));
        }
    }
    println!();
}

fn retry_args(payload: &RetryPayload) -> String {
    match payload {
        RetryPayload::Associate { notebook_ids } => {
            let ids: Vec<&str> = notebook_ids.iter().map(String::as_str).collect();
            format!("associate {}", ids.join(" "))
        }
        RetryPayload::Transform { transformation_id } => format!("transform {transformation_id}"),
        RetryPayload::Embed => "embed".to_string(),
    }
}

fn outcome_label(outcome: &StageOutcome) -> String {
    match outcome {
        StageOutcome::Succeeded => "ok".to_string(),
        StageOutcome::Skipped => "skipped".to_string(),
        StageOutcome::Failed(e) => format!("FAILED ({e})"),
    }
}

fn embedding_label(status: EmbeddingStatus) -> &'static str {
    match status {
        EmbeddingStatus::NotEmbedded => "not embedded",
        EmbeddingStatus::Embedding => "in progress",
        EmbeddingStatus::Embedded => "embedded",
        EmbeddingStatus::Failed => "failed",
    }
}

fn join_or_none<'a>(items: impl Iterator<Item = &'a String>) -> String {
    let items: Vec<&str> = items.map(String::as_str).collect();
    if items.is_empty() {
        "(none)".to_string()
    } else {
        items.join(", ")
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default()
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn stage_started(&self, stage: Stage) {
        let msg = match stage {
            Stage::Create => "Creating source",
            Stage::Associate => "Attaching to notebooks",
            Stage::Transform => "Applying transformations",
            Stage::Embed => "Requesting embedding",
        };
        self.spinner.set_message(msg);
    }

    fn transformation(&self, transformation_id: &str, current: usize, total: usize) {
        self.spinner
            .set_message(format!("Transforming [{current}/{total}] {transformation_id}"));
    }

    fn stage_finished(&self, stage: Stage, outcome: &StageOutcome) {
        if let StageOutcome::Failed(e) = outcome {
            self.spinner.println(format!("  {stage} failed: {e}"));
        }
    }

    fn done(&self, _report: &IngestionReport) {
        self.spinner.finish_and_clear();
    }
}

impl Drop for CliProgress {
    fn drop(&mut self) {
        // Create failures never reach `done`.
        if !self.spinner.is_finished() {
            self.spinner.finish_and_clear();
        }
    }
}
