use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use rusqlite::{OptionalExtension, params};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, info};

use super::embedder::{Embedder, cosine_similarity};
use crate::db::Database;
use crate::error::CapabilityError;
use crate::models::SolutionId;

/// A stored solution that matched a query embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct KnowledgeHit {
    pub id: SolutionId,
    pub question: String,
    pub content: String,
    /// Cosine similarity in [0, 1].
    pub score: f64,
}

/// Similarity search over previously solved problems.
#[async_trait]
pub trait KnowledgeBaseClient: Send + Sync {
    /// Returns at most `top_k` hits, best first.
    async fn search(
        &self,
        embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<KnowledgeHit>, CapabilityError>;
}

/// A problem/solution pair to add. Also the shape of one dataset entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSolution {
    pub question: String,
    pub solution: String,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub difficulty: Option<String>,
}

impl NewSolution {
    pub fn new(question: impl Into<String>, solution: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            solution: solution.into(),
            topic: None,
            difficulty: None,
        }
    }

    fn is_blank(&self) -> bool {
        self.question.trim().is_empty() || self.solution.trim().is_empty()
    }
}

/// A solution row as listed by `kb list`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredSolution {
    pub id: SolutionId,
    pub question: String,
    pub solution: String,
    pub topic: String,
    pub difficulty: String,
    pub embedding_model: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Result of a dataset import.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ImportSummary {
    pub imported: usize,
    pub skipped: usize,
}

/// SQLite-backed knowledge base of solved problems.
///
/// Questions are embedded on insert with the configured [`Embedder`]; search
/// only compares against rows embedded by the same model.
pub struct SolutionStore {
    db: Arc<Database>,
    embedder: Arc<dyn Embedder>,
}

impl SolutionStore {
    pub fn new(db: Arc<Database>, embedder: Arc<dyn Embedder>) -> Self {
        Self { db, embedder }
    }

    pub fn embedding_model(&self) -> &str {
        self.embedder.model_name()
    }

    /// Embeds and stores one solution.
    pub async fn add(&self, solution: NewSolution) -> Result<SolutionId> {
        if solution.is_blank() {
            bail!("question and solution must not be empty");
        }
        let embedding = self
            .embedder
            .embed(&solution.question)
            .await
            .context("Failed to embed question")?;

        let model = self.embedder.model_name().to_string();
        let id = self
            .db
            .run_blocking(move |conn| insert_solution(conn, &solution, &embedding, &model))
            .await?;
        debug!(id = %id, "stored solution");
        Ok(id)
    }

    /// Imports a JSON dataset of the form `[{question, solution, topic?, difficulty?}]`.
    ///
    /// Entries with an empty question or solution are skipped. All rows are
    /// written in one transaction.
    pub async fn import_file(&self, path: &Path) -> Result<ImportSummary> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read dataset: {}", path.display()))?;
        let entries: Vec<NewSolution> = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse dataset: {}", path.display()))?;
        self.import(entries).await
    }

    /// Imports already-parsed dataset entries.
    pub async fn import(&self, entries: Vec<NewSolution>) -> Result<ImportSummary> {
        let mut summary = ImportSummary::default();
        let mut rows = Vec::with_capacity(entries.len());

        for entry in entries {
            if entry.is_blank() {
                summary.skipped += 1;
                continue;
            }
            let embedding = self
                .embedder
                .embed(&entry.question)
                .await
                .context("Failed to embed question")?;
            rows.push((entry, embedding));
        }

        let model = self.embedder.model_name().to_string();
        summary.imported = rows.len();
        self.db
            .run_blocking(move |conn| {
                let tx = conn.transaction()?;
                for (entry, embedding) in &rows {
                    insert_solution(&tx, entry, embedding, &model)?;
                }
                tx.commit()?;
                Ok(())
            })
            .await?;

        info!(imported = summary.imported, skipped = summary.skipped, "dataset imported");
        Ok(summary)
    }

    /// Lists the most recently added solutions.
    pub fn list(&self, limit: usize) -> Result<Vec<StoredSolution>> {
        self.db.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, question, solution, topic, difficulty, embedding_model, created_at
                 FROM solutions ORDER BY id DESC LIMIT ?1",
            )?;
            let rows = stmt.query_map([i64::try_from(limit).unwrap_or(i64::MAX)], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, i64>(6)?,
                ))
            })?;

            let mut solutions = Vec::new();
            for row in rows {
                let (id, question, solution, topic, difficulty, embedding_model, created_at) =
                    row.context("Failed to read solution row")?;
                solutions.push(StoredSolution {
                    id: SolutionId::new(id),
                    question,
                    solution,
                    topic,
                    difficulty,
                    embedding_model,
                    created_at: OffsetDateTime::from_unix_timestamp(created_at)
                        .context("Invalid created_at timestamp")?,
                });
            }
            Ok(solutions)
        })
    }

    /// Fetches one solution's text by id.
    pub fn get_solution(&self, id: SolutionId) -> Result<Option<String>> {
        self.db.with_connection(|conn| {
            Ok(conn
                .query_row(
                    "SELECT solution FROM solutions WHERE id = ?1",
                    [id.get()],
                    |row| row.get(0),
                )
                .optional()?)
        })
    }

    /// Scores every row embedded by the active model. Runs on the blocking
    /// pool: the scan is proportional to the size of the knowledge base.
    async fn rank(&self, embedding: &[f32], top_k: usize) -> Result<Vec<KnowledgeHit>> {
        let model = self.embedder.model_name().to_string();
        let embedding = embedding.to_vec();
        self.db
            .run_blocking(move |conn| {
                let hits = score_rows(conn, &model, &embedding)?;
                Ok(top_hits(hits, top_k))
            })
            .await
    }
}

fn score_rows(
    conn: &rusqlite::Connection,
    model: &str,
    embedding: &[f32],
) -> Result<Vec<KnowledgeHit>> {
    let mut stmt = conn.prepare(
        "SELECT id, question, solution, embedding FROM solutions WHERE embedding_model = ?1",
    )?;
    let rows = stmt.query_map([model], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, Vec<u8>>(3)?,
        ))
    })?;

    let mut hits = Vec::new();
    for row in rows {
        let (id, question, content, blob) = row?;
        let stored = blob_to_vector(&blob);
        if stored.len() != embedding.len() {
            continue;
        }
        hits.push(KnowledgeHit {
            id: SolutionId::new(id),
            question,
            content,
            score: cosine_similarity(embedding, &stored),
        });
    }
    Ok(hits)
}

/// Best first; equal scores keep insertion order.
fn top_hits(mut hits: Vec<KnowledgeHit>, top_k: usize) -> Vec<KnowledgeHit> {
    hits.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.id.cmp(&b.id)));
    hits.truncate(top_k);
    hits
}

#[async_trait]
impl KnowledgeBaseClient for SolutionStore {
    async fn search(
        &self,
        embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<KnowledgeHit>, CapabilityError> {
        if top_k == 0 || embedding.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self.rank(embedding, top_k).await?)
    }
}

fn insert_solution(
    conn: &rusqlite::Connection,
    solution: &NewSolution,
    embedding: &[f32],
    model: &str,
) -> Result<SolutionId> {
    let topic = solution.topic.as_deref().unwrap_or("general");
    let difficulty = solution.difficulty.as_deref().unwrap_or("medium");
    conn.execute(
        "INSERT INTO solutions (question, solution, topic, difficulty, embedding, embedding_model, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            solution.question.trim(),
            solution.solution.trim(),
            topic,
            difficulty,
            vector_to_blob(embedding),
            model,
            OffsetDateTime::now_utc().unix_timestamp(),
        ],
    )
    .context("Failed to insert solution")?;
    Ok(SolutionId::new(conn.last_insert_rowid()))
}

/// Encodes a vector as little-endian f32 bytes.
fn vector_to_blob(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn blob_to_vector(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}
