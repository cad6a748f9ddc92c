use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use isoprint::{
    AppRoot, AssetResolver, DirectorySandbox, FarmProfile, InspectedDocument, JobKind,
    LabelPayload, LogRecord, PrintConfig, PrintError, PrintService, ReportDocument,
    SandboxContext, SandboxDocument,
};
use serde_json::json;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Prints labels and reports through isolated spool documents.
#[derive(Parser)]
#[command(author, version, about = "Isolated label and report printing")]
struct Cli {
    /// JSON configuration file; missing keys keep their defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(flatten)]
    spool: SpoolArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct SpoolArgs {
    /// Directory receiving one HTML document per print job.
    #[arg(long, global = true, default_value = "spool")]
    spool_dir: PathBuf,

    /// Command run for every document; the document path is appended.
    #[arg(long, global = true)]
    print_command: Option<String>,

    /// Leave spooled documents on disk after teardown.
    #[arg(long, global = true)]
    keep_files: bool,

    /// Write the lifecycle journal (JSON lines) to this file.
    #[arg(long, global = true)]
    journal: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print an 80mm x 40mm product label.
    Label {
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        date: Option<String>,
        #[arg(long)]
        producer: Option<String>,
        #[arg(long)]
        code: Option<String>,
        /// Value carried by the scannable code; defaults to the code.
        #[arg(long)]
        encoded_value: Option<String>,
        #[arg(long)]
        badge: Option<String>,
        /// Label payload as a JSON file instead of flags.
        #[arg(long, conflicts_with_all = ["title", "date", "producer", "code", "encoded_value", "badge"])]
        payload: Option<PathBuf>,
        #[arg(long, default_value_t = 1)]
        copies: u32,
    },

    /// Print an ad-hoc report; `===Name` lines start sections.
    Report {
        #[arg(long)]
        title: String,
        #[arg(long, conflicts_with = "content_file")]
        content: Option<String>,
        #[arg(long)]
        content_file: Option<PathBuf>,
    },

    /// Print the work log compliance report from a JSON list of records.
    #[command(name = "portal", alias = "gap-report")]
    Portal {
        #[arg(long)]
        records: PathBuf,
        /// Farm header metadata as JSON.
        #[arg(long)]
        farm: Option<PathBuf>,
        #[arg(long)]
        no_attachments: bool,
        /// Directory relative attachment paths are read from.
        #[arg(long)]
        asset_dir: Option<PathBuf>,
    },

    /// Summarise a generated document: page setup and visible text.
    Inspect {
        path: PathBuf,
        #[arg(long)]
        selector: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err}");
            print_error_sources(&err);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(log_json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn print_error_sources(mut error: &(dyn Error + 'static)) {
    while let Some(source) = error.source() {
        eprintln!("  caused by: {source}");
        error = source;
    }
}

async fn run(cli: Cli) -> Result<ExitCode, PrintError> {
    let config = match &cli.config {
        Some(path) => PrintConfig::from_json_file(path)?,
        None => PrintConfig::default(),
    };

    match cli.command {
        Commands::Label {
            title,
            date,
            producer,
            code,
            encoded_value,
            badge,
            payload,
            copies,
        } => {
            let service = service(config, &cli.spool)?;
            let label = match payload {
                Some(path) => {
                    let record: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(path)?)
                        .map_err(|err| PrintError::Payload(err.to_string()))?;
                    LabelPayload::from_record(&record)
                }
                None => LabelPayload {
                    title,
                    date,
                    producer,
                    code,
                    encoded_value,
                    badge,
                },
            };
            let handle = service.spawn(sandbox(&cli.spool));
            let dispatcher = service.dispatcher();
            for _ in 0..copies {
                dispatcher.submit(JobKind::Label, label.to_record());
            }
            drop(dispatcher);
            drop(service);

            let metrics = handle
                .await
                .map_err(|err| PrintError::Payload(format!("lifecycle task failed: {err}")))?;
            println!("{}", json!(metrics));
            Ok(if metrics.abandoned > 0 {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            })
        }

        Commands::Report {
            title,
            content,
            content_file,
        } => {
            let content = match (content, content_file) {
                (Some(content), _) => content,
                (None, Some(path)) => std::fs::read_to_string(path)?,
                (None, None) => String::new(),
            };
            let service = service(config, &cli.spool)?;
            let id = service
                .report_renderer(sandbox(&cli.spool))
                .try_print(&title, &content)
                .await?;
            info!(sandbox = %id, "report printed");
            Ok(ExitCode::SUCCESS)
        }

        Commands::Portal {
            records,
            farm,
            no_attachments,
            asset_dir,
        } => {
            let mut config = config;
            if no_attachments {
                config.portal.include_attachments = false;
            }
            if let Some(path) = farm {
                config.portal.farm = serde_json::from_str::<FarmProfile>(&std::fs::read_to_string(path)?)
                    .map_err(|err| PrintError::Payload(format!("farm profile: {err}")))?;
            }
            let records: Vec<LogRecord> = serde_json::from_str(&std::fs::read_to_string(records)?)
                .map_err(|err| PrintError::Payload(format!("log records: {err}")))?;
            let service = service(config, &cli.spool)?;
            let mut renderer = service.portal_renderer();
            if let Some(dir) = asset_dir {
                renderer = renderer.with_resolver(AssetResolver::new().with_base_dir(dir));
            }

            let document = ReportDocument::from_records(&records, service.config().portal.farm.clone());
            let mut root = AppRoot::new();
            let html = renderer.print_with(&mut root, &document, AppRoot::render_html)?;
            let portal = &service.config().portal;
            let printable = SandboxDocument {
                kind: JobKind::Report,
                title: document.title.clone(),
                html,
                page: portal.page,
                margins: portal.margins,
            };

            let mut spool = sandbox(&cli.spool);
            let (mut context, load) = SandboxContext::open(&mut spool, &printable)?;
            let timing = service.config().timing.lifecycle_timing();
            let printed = async {
                load.wait(timing.load_timeout).await?;
                let output = context.trigger_output(&mut spool)?;
                Ok::<bool, PrintError>(output.wait(timing.teardown_grace).await)
            }
            .await;
            context.teardown(&mut spool);
            if !printed? {
                warn!("print command did not confirm the report");
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::Inspect { path, selector } => {
            let doc = InspectedDocument::parse(&std::fs::read_to_string(path)?);
            let setup = doc.page_setup();
            let summary = json!({
                "page": setup.size.map(|size| json!({
                    "width_mm": size.width.to_f32(),
                    "height_mm": size.height.to_f32(),
                })),
                "margins_mm": setup.margins().map(|m| [
                    m.top.to_f32(),
                    m.right.to_f32(),
                    m.bottom.to_f32(),
                    m.left.to_f32(),
                ]),
                "text": match &selector {
                    Some(selector) => json!(doc.texts(selector)),
                    None => json!(doc.text()),
                },
            });
            println!("{summary:#}");
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn service(config: PrintConfig, spool: &SpoolArgs) -> Result<PrintService, PrintError> {
    let builder = PrintService::builder().config(config);
    match &spool.journal {
        Some(path) => builder.journal_path(path).build(),
        None => builder.build(),
    }
}

fn sandbox(spool: &SpoolArgs) -> DirectorySandbox {
    let sandbox = DirectorySandbox::new(&spool.spool_dir).with_keep_files(spool.keep_files);
    match &spool.print_command {
        Some(line) => sandbox.with_print_command_line(line),
        None => sandbox,
    }
}
