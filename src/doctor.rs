//! Health checks for mathroute.
//!
//! Provides the `doctor` command functionality:
//! - Configuration summary (thresholds, timeout, guardrail policy)
//! - Database connectivity and applied migrations
//! - Knowledge base and feedback statistics
//! - Ollama reachability and configured search providers

use anyhow::Result;

use crate::app::App;
use crate::config::{ClassifierKind, EmbeddingProvider, RoutingPolicy};
use crate::db::{AppliedMigration, Table};

// ANSI color codes for terminal output
const GREEN: &str = "\x1b[32m";
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";

/// Health status for a component.
#[derive(Debug, Clone, PartialEq)]
pub enum HealthStatus {
    /// Component is healthy
    Ok,
    /// Component has a warning but is functional
    Warning(String),
    /// Component is not functional
    Error(String),
}

impl HealthStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, HealthStatus::Ok)
    }
}

/// Database health information.
#[derive(Debug)]
pub struct DatabaseHealth {
    pub status: HealthStatus,
    pub location: String,
}

/// Ollama connectivity information.
#[derive(Debug)]
pub struct OllamaHealth {
    pub status: HealthStatus,
    pub base_url: String,
    pub model: String,
    pub models: Vec<String>,
}

/// Web search configuration.
#[derive(Debug)]
pub struct SearchHealth {
    pub status: HealthStatus,
    pub providers: Vec<&'static str>,
}

/// Stored data statistics.
#[derive(Debug, PartialEq)]
pub struct UsageStats {
    pub solutions: i64,
    pub responses: i64,
    pub feedback: i64,
    pub average_rating: Option<f64>,
}

/// Everything the doctor report shows.
#[derive(Debug)]
pub struct HealthReport {
    pub database: DatabaseHealth,
    pub migrations: Vec<AppliedMigration>,
    pub stats: UsageStats,
    pub ollama: OllamaHealth,
    pub search: SearchHealth,
}

impl HealthReport {
    /// True when no component reported an error.
    pub fn is_healthy(&self) -> bool {
        [&self.database.status, &self.ollama.status, &self.search.status]
            .iter()
            .all(|s| !matches!(s, HealthStatus::Error(_)))
    }
}

// ============================================================================
// Health Check Functions
// ============================================================================

/// Performs all health checks and prints results.
pub async fn run_health_checks(app: &App) -> Result<()> {
    let report = collect_report(app).await?;
    print_health_report(app, &report);
    Ok(())
}

/// Gathers the report without printing it.
pub async fn collect_report(app: &App) -> Result<HealthReport> {
    Ok(HealthReport {
        database: check_database_health(app),
        migrations: app.database().applied_migrations()?,
        stats: get_usage_stats(app)?,
        ollama: check_ollama_health(app).await,
        search: check_search_health(app),
    })
}

fn check_database_health(app: &App) -> DatabaseHealth {
    let probe = app
        .database()
        .with_connection(|conn| Ok(conn.query_row("SELECT 1", [], |_| Ok(()))?));
    let status = match probe {
        Ok(()) => HealthStatus::Ok,
        Err(e) => HealthStatus::Error(format!("Connection test failed: {e}")),
    };

    DatabaseHealth {
        status,
        location: app.database_label().to_string(),
    }
}

async fn check_ollama_health(app: &App) -> OllamaHealth {
    let client = app.ollama();
    let base_url = client.base_url().to_string();
    let model = client.model().to_string();

    match client.list_models().await {
        Ok(models) => {
            let status = if models.is_empty() {
                HealthStatus::Warning("No models installed".to_string())
            } else if !models.iter().any(|m| model_matches(m, &model)) {
                HealthStatus::Warning(format!("Model '{model}' is not installed"))
            } else {
                HealthStatus::Ok
            };
            OllamaHealth {
                status,
                base_url,
                model,
                models,
            }
        }
        Err(e) => OllamaHealth {
            status: HealthStatus::Error(format!("Connection failed: {e}")),
            base_url,
            model,
            models: Vec::new(),
        },
    }
}

/// Ollama lists models with a tag, so `llama3.2` matches `llama3.2:latest`.
fn model_matches(installed: &str, wanted: &str) -> bool {
    installed == wanted
        || installed
            .split_once(':')
            .is_some_and(|(name, tag)| name == wanted && tag == "latest")
}

fn check_search_health(app: &App) -> SearchHealth {
    let providers = app.search_providers();
    let status = if providers.is_empty() {
        HealthStatus::Warning("No providers configured; web search is disabled".to_string())
    } else {
        HealthStatus::Ok
    };
    SearchHealth { status, providers }
}

fn get_usage_stats(app: &App) -> Result<UsageStats> {
    let db = app.database();
    Ok(UsageStats {
        solutions: db.count_rows(Table::Solutions)?,
        responses: db.count_rows(Table::Responses)?,
        feedback: db.count_rows(Table::Feedback)?,
        average_rating: app.feedback_store().average_rating()?,
    })
}

// ============================================================================
// Pretty Printing
// ============================================================================

fn status_symbol(status: &HealthStatus) -> &'static str {
    match status {
        HealthStatus::Ok => "\u{2713}",
        HealthStatus::Warning(_) => "!",
        HealthStatus::Error(_) => "\u{2717}",
    }
}

fn status_color(status: &HealthStatus) -> &'static str {
    match status {
        HealthStatus::Ok => GREEN,
        HealthStatus::Warning(_) => YELLOW,
        HealthStatus::Error(_) => RED,
    }
}

fn status_text(status: &HealthStatus, ok: &str) -> String {
    match status {
        HealthStatus::Ok => ok.to_string(),
        HealthStatus::Warning(w) => w.clone(),
        HealthStatus::Error(e) => e.clone(),
    }
}

fn print_status_line(label: &str, status: &HealthStatus, ok: &str) {
    println!(
        "  {}{}{} {}: {}",
        status_color(status),
        status_symbol(status),
        RESET,
        label,
        status_text(status, ok)
    );
}

fn print_routing_policy(policy: &RoutingPolicy) {
    println!(
        "    {}KB threshold: {:.2}  Web threshold: {:.2}  Penalty: {:.2}{}",
        DIM, policy.kb_threshold, policy.web_threshold, policy.generated_without_context_penalty, RESET
    );
    println!(
        "    {}Timeout: {} ms  Guardrail fallback: {}{}",
        DIM, policy.timeout_ms, policy.guardrail_fallback_policy, RESET
    );
}

fn print_health_report(app: &App, report: &HealthReport) {
    let config = app.config();

    println!("{}mathroute doctor{}", BOLD, RESET);
    println!();

    // Configuration section
    println!("{}Configuration{}", BOLD, RESET);
    print_status_line("Routing policy", &HealthStatus::Ok, "Valid");
    print_routing_policy(&config.routing);
    let classifier = match config.guardrail.classifier {
        ClassifierKind::Keyword => "keyword",
        ClassifierKind::Ollama => "ollama",
    };
    let embedder = match config.embedding.provider {
        EmbeddingProvider::Hashing => format!("hashing ({} dims)", config.embedding.dimensions),
        EmbeddingProvider::Ollama => format!("ollama ({})", config.ollama.embedding_model),
    };
    println!(
        "    {}Classifier: {}  Embedder: {}{}",
        DIM, classifier, embedder, RESET
    );
    println!();

    // Database section
    println!("{}Database{}", BOLD, RESET);
    print_status_line("Connection", &report.database.status, "OK");
    println!("    {}Path: {}{}", DIM, report.database.location, RESET);
    if report.migrations.is_empty() {
        println!("  {}No migrations applied{}", YELLOW, RESET);
    } else {
        for m in &report.migrations {
            println!(
                "  {}{}{} v{}: {}",
                GREEN,
                status_symbol(&HealthStatus::Ok),
                RESET,
                m.version,
                m.description
            );
        }
    }
    println!();

    // Ollama section
    println!("{}Ollama{}", BOLD, RESET);
    print_status_line("Status", &report.ollama.status, "Connected");
    println!("    {}URL: {}{}", DIM, report.ollama.base_url, RESET);
    println!("    {}Model: {}{}", DIM, report.ollama.model, RESET);
    if !report.ollama.models.is_empty() {
        let models = &report.ollama.models;
        let models_display = if models.len() > 3 {
            format!("{}, ... ({} more)", models[..3].join(", "), models.len() - 3)
        } else {
            models.join(", ")
        };
        println!("    {}Installed: {}{}", DIM, models_display, RESET);
    }
    println!();

    // Search section
    println!("{}Web search{}", BOLD, RESET);
    print_status_line("Providers", &report.search.status, "Configured");
    if !report.search.providers.is_empty() {
        println!(
            "    {}Order: {}{}",
            DIM,
            report.search.providers.join(" > "),
            RESET
        );
    }
    println!();

    // Statistics section
    let stats = &report.stats;
    println!("{}Statistics{}", BOLD, RESET);
    println!("  Solutions:  {:>6}", stats.solutions);
    println!("  Responses:  {:>6}", stats.responses);
    print!("  Feedback:   {:>6}", stats.feedback);
    match stats.average_rating {
        Some(avg) => println!("  (average rating {avg:.1})"),
        None => println!(),
    }
}
