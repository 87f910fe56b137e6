//! Drives one harness run: fixtures, generation, retried execution.

use crate::gemini::GeminiGenerator;
use anyhow::{Context, Result};
use qch_common::fixtures::{self, TableCounts};
use qch_common::generator::{CannedGenerator, GeneratorError, QueryGenerator, SCHEMA_DESCRIPTION};
use qch_common::{
    ChaosInjector, GeneratorKind, HarnessConfig, Metrics, MetricsLog, QueryTask, ResultSet,
    RetryController, RunSummary, SqliteDatabase, summarize,
};
use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};

/// Rows kept per successful task for display.
pub const SAMPLE_ROWS: usize = 3;

/// Either generator backend behind one type.
pub enum Generator {
    Canned(CannedGenerator),
    Gemini(GeminiGenerator),
}

impl Generator {
    pub fn from_config(config: &HarnessConfig) -> Result<Self, GeneratorError> {
        let section = &config.generator;
        match section.kind {
            GeneratorKind::Canned => {
                let canned = match &section.canned_file {
                    Some(path) => CannedGenerator::from_file(path)?,
                    None => CannedGenerator::builtin(),
                };
                Ok(Self::Canned(canned))
            }
            GeneratorKind::Gemini => Ok(Self::Gemini(GeminiGenerator::new(
                section.endpoint.clone(),
                section.model.clone(),
                section.api_key.clone(),
                &section.api_key_env,
                Duration::from_secs(section.timeout_secs),
            )?)),
        }
    }
}

impl QueryGenerator for Generator {
    fn name(&self) -> &str {
        match self {
            Self::Canned(g) => g.name(),
            Self::Gemini(g) => g.name(),
        }
    }

    async fn generate(&self, task: &str, schema: &str) -> Result<String, GeneratorError> {
        match self {
            Self::Canned(g) => g.generate(task, schema).await,
            Self::Gemini(g) => g.generate(task, schema).await,
        }
    }
}

/// Result of one executed task.
#[derive(Debug, Serialize)]
pub struct TaskReport {
    pub metrics: Metrics,
    /// First rows of the result, present on success.
    pub sample: Option<ResultSet>,
}

/// A prompt that never reached the database.
#[derive(Debug, Serialize)]
pub struct SkippedTask {
    pub prompt: String,
    pub reason: String,
}

#[derive(Debug, Serialize)]
pub struct RunReport {
    pub generator: String,
    pub seed: u64,
    pub fixtures: TableCounts,
    pub tasks: Vec<TaskReport>,
    pub skipped: Vec<SkippedTask>,
    /// Absent when every prompt was skipped.
    pub summary: Option<RunSummary>,
}

fn sample_of(results: Option<ResultSet>) -> Option<ResultSet> {
    results.map(|mut rs| {
        rs.rows.truncate(SAMPLE_ROWS);
        rs
    })
}

/// Provision a fresh database loaded with the streaming-service fixture.
pub fn provision_database(
    config: &HarnessConfig,
    seed: u64,
) -> Result<(SqliteDatabase, TableCounts)> {
    let mut db = SqliteDatabase::ephemeral().context("failed to provision database")?;
    let conn = db.connection_mut()?;
    fixtures::setup_schema(conn).context("failed to create schema")?;
    fixtures::populate(conn, config.fixtures, seed).context("failed to load fixtures")?;
    let counts = fixtures::verify(conn).context("failed to verify fixtures")?;
    info!(path = %db.path().display(), users = counts.users, "Database provisioned");
    Ok((db, counts))
}

/// Run every configured prompt once through the retry controller.
///
/// Generation failures skip the prompt; database failures are retried and
/// recorded.
pub async fn run<G: QueryGenerator>(config: &HarnessConfig, generator: &G) -> Result<RunReport> {
    let seed = config.run.seed.unwrap_or_else(|| fastrand::u64(..));
    info!(seed, generator = generator.name(), "Starting harness run");

    let (mut db, fixture_counts) = provision_database(config, seed)?;

    let chaos_config = config.chaos_config()?;
    let policy = config.retry_policy()?;
    let injector = ChaosInjector::with_seed(chaos_config, seed)?;
    // Separate stream for backoff jitter.
    let mut controller = RetryController::with_seed(injector, policy, seed.wrapping_add(1))?;

    let mut log = MetricsLog::new();
    if let Some(path) = &config.run.metrics_out {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        log = log.with_persistence(path.clone());
    }

    let prompts = config.prompts();
    let mut tasks = Vec::with_capacity(prompts.len());
    let mut skipped = Vec::new();

    for (idx, prompt) in prompts.iter().enumerate() {
        info!(task = idx + 1, total = prompts.len(), prompt = %prompt, "Processing task");
        let sql = match generator.generate(prompt, SCHEMA_DESCRIPTION).await {
            Ok(sql) => sql,
            Err(e) => {
                warn!(prompt = %prompt, error = %e, "Query generation failed; skipping task");
                skipped.push(SkippedTask {
                    prompt: prompt.clone(),
                    reason: e.to_string(),
                });
                continue;
            }
        };

        let task = QueryTask::new(prompt.as_str(), sql);
        let outcome = controller.execute_task(&mut db, &task).await;
        log.push(outcome.metrics.clone()).await;
        tasks.push(TaskReport {
            metrics: outcome.metrics,
            sample: sample_of(outcome.results),
        });
    }

    let summary = summarize(log.records()).ok();
    if summary.is_none() {
        warn!("No task reached the database; summary unavailable");
    }

    Ok(RunReport {
        generator: generator.name().to_string(),
        seed,
        fixtures: fixture_counts,
        tasks,
        skipped,
        summary,
    })
}
