//! Learner feedback and the log of routed answers it refers to.
//!
//! Feedback is recorded off the routing path: [`FeedbackRecorder`] spawns a
//! detached task per record so a slow store never delays an answer.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::{OptionalExtension, params};
use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::db::Database;
use crate::error::CapabilityError;
use crate::models::{EnvelopeId, EnvelopeState, QueryId, ResponseEnvelope};

/// A rating outside 1..=5.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("rating must be between 1 and 5, got {0}")]
pub struct InvalidRating(pub u8);

/// A learner's rating of one answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedbackRecord {
    query_id: QueryId,
    envelope_id: EnvelopeId,
    rating: u8,
    comment: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    created_at: OffsetDateTime,
}

impl FeedbackRecord {
    /// Creates a record timestamped now. Blank comments are dropped.
    pub fn new(
        query_id: QueryId,
        envelope_id: EnvelopeId,
        rating: u8,
        comment: Option<String>,
    ) -> Result<Self, InvalidRating> {
        if !(1..=5).contains(&rating) {
            return Err(InvalidRating(rating));
        }
        Ok(Self {
            query_id,
            envelope_id,
            rating,
            comment: comment
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty()),
            created_at: OffsetDateTime::now_utc(),
        })
    }

    /// Feedback about a routed envelope.
    pub fn for_envelope(
        envelope: &ResponseEnvelope,
        rating: u8,
        comment: Option<String>,
    ) -> Result<Self, InvalidRating> {
        Self::new(envelope.query_id(), envelope.id(), rating, comment)
    }

    pub fn query_id(&self) -> QueryId {
        self.query_id
    }

    pub fn envelope_id(&self) -> EnvelopeId {
        self.envelope_id
    }

    pub fn rating(&self) -> u8 {
        self.rating
    }

    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    pub fn created_at(&self) -> OffsetDateTime {
        self.created_at
    }

    /// Ratings below 3 ask for a better explanation.
    pub fn needs_refinement(&self) -> bool {
        self.rating < 3
    }
}

/// Persists feedback.
#[async_trait]
pub trait FeedbackStore: Send + Sync {
    async fn record(&self, record: FeedbackRecord) -> Result<(), CapabilityError>;
}

/// A previously routed query and its envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct LoggedResponse {
    pub query_text: String,
    pub envelope: ResponseEnvelope,
}

/// SQLite store for feedback and for the response log.
pub struct SqliteFeedbackStore {
    db: Arc<Database>,
}

impl SqliteFeedbackStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Logs a routed envelope so later feedback can refer to it.
    pub async fn log_envelope(&self, query_text: &str, envelope: &ResponseEnvelope) -> Result<()> {
        let json = serde_json::to_string(envelope).context("Failed to serialize envelope")?;
        let state = match envelope.state() {
            EnvelopeState::Answered => "answered",
            EnvelopeState::Rejected => "rejected",
            EnvelopeState::NoAnswerAvailable => "no_answer_available",
        };
        let row = (
            envelope.id().to_string(),
            envelope.query_id().to_string(),
            query_text.to_string(),
            envelope.answer().map(str::to_string),
            envelope.confidence(),
            envelope.created_at().unix_timestamp(),
        );
        self.db
            .run_blocking(move |conn| {
                let (envelope_id, query_id, query_text, answer, confidence, created_at) = row;
                conn.execute(
                    "INSERT OR REPLACE INTO responses
                     (envelope_id, query_id, query_text, state, answer, confidence, envelope_json, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        envelope_id,
                        query_id,
                        query_text,
                        state,
                        answer,
                        confidence,
                        json,
                        created_at
                    ],
                )
                .context("Failed to log response")?;
                Ok(())
            })
            .await
    }

    /// Looks up a logged envelope by id.
    pub fn get_response(&self, envelope_id: EnvelopeId) -> Result<Option<LoggedResponse>> {
        let row: Option<(String, String)> = self.db.with_connection(|conn| {
            Ok(conn
                .query_row(
                    "SELECT query_text, envelope_json FROM responses WHERE envelope_id = ?1",
                    [envelope_id.to_string()],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?)
        })?;

        row.map(|(query_text, json)| -> Result<LoggedResponse> {
            let envelope = serde_json::from_str(&json).context("Corrupt envelope in response log")?;
            Ok(LoggedResponse {
                query_text,
                envelope,
            })
        })
        .transpose()
    }

    /// Lists feedback for one envelope, oldest first.
    pub fn feedback_for(&self, envelope_id: EnvelopeId) -> Result<Vec<FeedbackRecord>> {
        self.db.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT query_id, rating, comment, created_at FROM feedback
                 WHERE envelope_id = ?1 ORDER BY id",
            )?;
            let rows = stmt.query_map([envelope_id.to_string()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, u8>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            })?;

            let mut records = Vec::new();
            for row in rows {
                let (query_id, rating, comment, created_at) = row?;
                records.push(FeedbackRecord {
                    query_id: query_id.parse().context("Invalid query id in feedback")?,
                    envelope_id,
                    rating,
                    comment,
                    created_at: OffsetDateTime::from_unix_timestamp(created_at)
                        .context("Invalid feedback timestamp")?,
                });
            }
            Ok(records)
        })
    }

    /// Average rating across all feedback, if any was given.
    pub fn average_rating(&self) -> Result<Option<f64>> {
        self.db.with_connection(|conn| {
            Ok(conn.query_row("SELECT AVG(rating) FROM feedback", [], |row| row.get(0))?)
        })
    }

    async fn insert(&self, record: &FeedbackRecord) -> Result<()> {
        let row = (
            record.query_id.to_string(),
            record.envelope_id.to_string(),
            record.rating,
            record.comment.clone(),
            record.created_at.unix_timestamp(),
        );
        self.db
            .run_blocking(move |conn| {
                conn.execute(
                    "INSERT INTO feedback (query_id, envelope_id, rating, comment, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![row.0, row.1, row.2, row.3, row.4],
                )
                .context("Failed to insert feedback")?;
                Ok(())
            })
            .await
    }
}

#[async_trait]
impl FeedbackStore for SqliteFeedbackStore {
    async fn record(&self, record: FeedbackRecord) -> Result<(), CapabilityError> {
        self.insert(&record).await?;
        debug!(envelope_id = %record.envelope_id, rating = record.rating, "feedback stored");
        Ok(())
    }
}

/// Records feedback in the background.
#[derive(Clone)]
pub struct FeedbackRecorder {
    store: Arc<dyn FeedbackStore>,
}

impl FeedbackRecorder {
    pub fn new(store: Arc<dyn FeedbackStore>) -> Self {
        Self { store }
    }

    /// Spawns a detached write. Failures are logged, never returned.
    ///
    /// The handle may be dropped; awaiting it only matters before shutdown.
    pub fn submit(&self, record: FeedbackRecord) -> JoinHandle<()> {
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            let envelope_id = record.envelope_id();
            if let Err(e) = store.record(record).await {
                warn!(envelope_id = %envelope_id, error = %e, "failed to record feedback");
            }
        })
    }
}
