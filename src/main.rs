use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mathroute::app::UnknownResponse;
use mathroute::feedback::InvalidRating;
use mathroute::knowledge::NewSolution;
use mathroute::utils::truncate_chars;
use mathroute::{App, AppConfig, ConfigError, EnvelopeId, EnvelopeState, ResponseEnvelope};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// mathroute - a step-by-step mathematics tutoring assistant
#[derive(Parser)]
#[command(name = "mathroute")]
#[command(about = "Answers math questions from a knowledge base, the web and a local LLM")]
#[command(version)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log routing decisions to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands
#[derive(Subcommand)]
enum Commands {
    /// Ask a math question
    Ask(AskCommand),
    /// Manage the knowledge base of solved problems
    #[command(subcommand)]
    Kb(KbCommand),
    /// Rate an answer
    Feedback(FeedbackCommand),
    /// Check configuration, storage and providers
    Doctor,
}

#[derive(Parser)]
struct AskCommand {
    /// The question to answer
    #[arg(value_name = "QUERY")]
    query: String,

    /// Print the full response envelope as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Subcommand)]
enum KbCommand {
    /// Add one solved problem
    Add {
        #[arg(long)]
        question: String,
        #[arg(long)]
        solution: String,
        #[arg(long)]
        topic: Option<String>,
        #[arg(long)]
        difficulty: Option<String>,
    },
    /// Import a JSON dataset of solved problems
    Import {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
    /// List stored problems, newest first
    List {
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
}

#[derive(Parser)]
struct FeedbackCommand {
    /// Response id printed by `ask`
    #[arg(value_name = "ENVELOPE_ID")]
    envelope_id: EnvelopeId,

    /// Rating from 1 (unhelpful) to 5 (very helpful)
    #[arg(short, long)]
    rating: u8,

    /// What was unclear or wrong
    #[arg(short, long)]
    comment: Option<String>,
}

/// Routing was interrupted with Ctrl-C.
#[derive(Debug, thiserror::Error)]
#[error("interrupted")]
struct Interrupted;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();
    init_tracing(cli.verbose);

    let result = run(cli).await;

    if let Err(e) = result {
        let exit_code = exit_code(&e);
        eprintln!("Error: {e:#}");
        std::process::exit(exit_code);
    }
}

/// Installs a stderr subscriber so stdout carries only answers.
fn init_tracing(verbose: bool) {
    let default_filter = if verbose {
        "mathroute=debug"
    } else {
        "mathroute=warn"
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .init();
}

/// Maps an error to an exit code: 1 for user errors, 130 for Ctrl-C and 2
/// for internal failures.
fn exit_code(error: &anyhow::Error) -> i32 {
    if error.downcast_ref::<Interrupted>().is_some() {
        130
    } else if is_user_error(error) {
        1
    } else {
        2
    }
}

/// User errors are bad input: invalid configuration, ratings, unknown ids or
/// empty knowledge-base entries. Database and network failures are internal.
fn is_user_error(error: &anyhow::Error) -> bool {
    error.chain().any(|cause| {
        cause.is::<ConfigError>()
            || cause.is::<InvalidRating>()
            || cause.is::<UnknownResponse>()
            || cause.to_string().contains("must not be empty")
    })
}

async fn run(cli: Cli) -> Result<()> {
    let config = AppConfig::load(cli.config.as_deref())?;
    let app = App::open(config)?;

    match cli.command {
        Commands::Ask(cmd) => handle_ask(&app, &cmd).await,
        Commands::Kb(cmd) => handle_kb(&app, cmd).await,
        Commands::Feedback(cmd) => handle_feedback(&app, cmd).await,
        Commands::Doctor => mathroute::doctor::run_health_checks(&app).await,
    }
}

async fn handle_ask(app: &App, cmd: &AskCommand) -> Result<()> {
    let envelope = tokio::select! {
        envelope = app.ask(&cmd.query) => envelope,
        _ = tokio::signal::ctrl_c() => return Err(Interrupted.into()),
    };

    if cmd.json {
        let json = serde_json::to_string_pretty(&envelope).context("Failed to encode response")?;
        println!("{json}");
    } else {
        print_envelope(&envelope);
    }
    Ok(())
}

fn print_envelope(envelope: &ResponseEnvelope) {
    match envelope.state() {
        EnvelopeState::Rejected => {
            println!(
                "Query rejected: {}",
                envelope.rejection_reason().unwrap_or("unspecified")
            );
            return;
        }
        EnvelopeState::NoAnswerAvailable => {
            println!("No answer available right now. Please try again later.");
        }
        EnvelopeState::Answered => {
            let source = envelope
                .primary_source()
                .map(|p| p.kind.to_string())
                .unwrap_or_default();
            println!(
                "Answer (confidence {:.2}, from {})",
                envelope.confidence(),
                source
            );
            if envelope.is_unvalidated() {
                println!("Note: the safety check was unavailable for this question.");
            }
            println!();
            for (i, step) in envelope.steps().iter().enumerate() {
                println!("{}. {}", i + 1, step);
            }
            println!();
            println!("Sources:");
            for entry in envelope.provenance() {
                println!(
                    "  [{}] {} {} ({:.2})",
                    entry.role, entry.kind, entry.source_id, entry.weight
                );
            }
        }
    }

    println!();
    println!("Response id: {}", envelope.id());
}

async fn handle_kb(app: &App, cmd: KbCommand) -> Result<()> {
    let store = app.solutions();
    match cmd {
        KbCommand::Add {
            question,
            solution,
            topic,
            difficulty,
        } => {
            let entry = NewSolution {
                question,
                solution,
                topic,
                difficulty,
            };
            let id = store.add(entry).await.context("Failed to add solution")?;
            println!("Solution stored (id: {id})");
        }
        KbCommand::Import { file } => {
            let summary = store.import_file(&file).await?;
            print!("Imported {} solutions", summary.imported);
            if summary.skipped > 0 {
                print!(" ({} skipped)", summary.skipped);
            }
            println!();
        }
        KbCommand::List { limit } => {
            let solutions = store.list(limit)?;
            if solutions.is_empty() {
                println!("Knowledge base is empty");
            }
            for s in solutions {
                println!(
                    "#{} [{}/{}] {}",
                    s.id,
                    s.topic,
                    s.difficulty,
                    truncate_chars(&s.question.replace('\n', " "), 70)
                );
            }
        }
    }
    Ok(())
}

async fn handle_feedback(app: &App, cmd: FeedbackCommand) -> Result<()> {
    let outcome = app
        .submit_feedback(cmd.envelope_id, cmd.rating, cmd.comment)
        .await?;
    println!("Thanks, feedback recorded ({}/5)", outcome.record.rating());

    if let Some(refined) = outcome.refined {
        println!();
        println!("Here is another explanation:");
        println!();
        println!("{refined}");
    }
    Ok(())
}
