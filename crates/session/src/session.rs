use chrono::{DateTime, Utc};
use query::RetrievalResult;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::info;
use uuid::Uuid;

use crate::engine::{EngineStats, IngestionSummary, RetrievalEngine};
use crate::error::Result;

/// One tutoring session over a course's lecture material.
///
/// The loaded document set lives in the session's engine rather than in
/// global state, so independent sessions never see each other's documents.
pub struct CourseSession {
    session_id: Uuid,
    course_id: String,
    started_at: DateTime<Utc>,
    cache_path: PathBuf,
    engine: Arc<RetrievalEngine>,
    queries: AtomicUsize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub session_id: Uuid,
    pub course_id: String,
    pub started_at: DateTime<Utc>,
    pub queries: usize,
    pub documents: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub session_id: Uuid,
    pub course_id: String,
    pub duration_secs: i64,
    pub queries: usize,
    pub saved_to: PathBuf,
    pub stats: EngineStats,
}

impl CourseSession {
    /// Start a session, restoring the course's saved snapshot at `cache_path` if one exists
    pub async fn start(engine: Arc<RetrievalEngine>, course_id: &str, cache_path: PathBuf) -> Result<Self> {
        let session = Self {
            session_id: Uuid::new_v4(),
            course_id: course_id.to_string(),
            started_at: Utc::now(),
            cache_path,
            engine,
            queries: AtomicUsize::new(0),
        };

        if tokio::fs::try_exists(&session.cache_path).await? {
            let blob = tokio::fs::read(&session.cache_path).await?;
            let restored = session.engine.restore(&blob).await?;
            info!(
                session = %session.session_id,
                course = %course_id,
                documents = restored.len(),
                "Restored course material"
            );
        } else {
            info!(session = %session.session_id, course = %course_id, "Starting with no saved material");
        }

        Ok(session)
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn course_id(&self) -> &str {
        &self.course_id
    }

    pub fn cache_path(&self) -> &Path {
        &self.cache_path
    }

    pub fn engine(&self) -> &Arc<RetrievalEngine> {
        &self.engine
    }

    pub async fn ingest(&self, document_text: &str, source_id: &str) -> Result<IngestionSummary> {
        self.engine.ingest(document_text, source_id).await
    }

    pub async fn query(&self, query_text: &str, top_k: usize) -> Result<RetrievalResult> {
        self.queries.fetch_add(1, Ordering::Relaxed);
        self.engine.search(query_text, top_k).await
    }

    pub async fn info(&self) -> SessionInfo {
        SessionInfo {
            session_id: self.session_id,
            course_id: self.course_id.clone(),
            started_at: self.started_at,
            queries: self.queries.load(Ordering::Relaxed),
            documents: self.engine.documents().await,
        }
    }

    /// Persist the course snapshot and close the session
    pub async fn end(self) -> Result<SessionReport> {
        self.save().await?;
        let report = SessionReport {
            session_id: self.session_id,
            course_id: self.course_id.clone(),
            duration_secs: (Utc::now() - self.started_at).num_seconds(),
            queries: self.queries.load(Ordering::Relaxed),
            saved_to: self.cache_path.clone(),
            stats: self.engine.stats().await,
        };
        info!(
            session = %report.session_id,
            course = %report.course_id,
            queries = report.queries,
            duration_secs = report.duration_secs,
            "Session ended"
        );
        Ok(report)
    }

    /// Write the snapshot without ending the session
    pub async fn save(&self) -> Result<()> {
        let blob = self.engine.snapshot().await?;
        if let Some(parent) = self.cache_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // Readers never see a partially written snapshot
        let tmp = self.cache_path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &blob).await?;
        tokio::fs::rename(&tmp, &self.cache_path).await?;
        info!(path = %self.cache_path.display(), bytes = blob.len(), "Saved course snapshot");
        Ok(())
    }
}
