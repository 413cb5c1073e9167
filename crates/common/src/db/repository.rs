//! Repository pattern for database operations
//!
//! The record store: every dedupe decision and every download status
//! transition goes through here. Each operation runs in its own transaction,
//! which is rolled back before an error is returned.

use crate::db::models::*;
use crate::db::DbPool;
use crate::errors::{AppError, Result};
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, NotSet, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Set, SqlErr, TransactionTrait,
};
use std::collections::HashMap;
use tracing::warn;

/// Partial update applied by `Repository::update_download_status`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DownloadStatusUpdate {
    pub status: Option<DownloadState>,
    pub progress: Option<f64>,
    pub download_path: Option<String>,
    /// `Some(None)` clears the stored error
    pub error_message: Option<Option<String>>,
}

impl DownloadStatusUpdate {
    /// Start of an attempt: resets progress and clears any previous error
    pub fn downloading(download_path: impl Into<String>) -> Self {
        Self {
            status: Some(DownloadState::Downloading),
            progress: Some(0.0),
            download_path: Some(download_path.into()),
            error_message: Some(None),
        }
    }

    pub fn progress(progress: f64) -> Self {
        Self {
            progress: Some(progress.clamp(0.0, 100.0)),
            ..Self::default()
        }
    }

    pub fn completed() -> Self {
        Self {
            status: Some(DownloadState::Completed),
            progress: Some(100.0),
            ..Self::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: Some(DownloadState::Failed),
            error_message: Some(Some(error.into())),
            ..Self::default()
        }
    }
}

/// Repository for data access operations
#[derive(Clone)]
pub struct Repository {
    pool: DbPool,
}

impl Repository {
    /// Create a new repository with the given connection pool
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Get the read connection
    fn read_conn(&self) -> &DatabaseConnection {
        self.pool.read()
    }

    /// Get the write connection
    fn write_conn(&self) -> &DatabaseConnection {
        self.pool.write()
    }

    // ========================================================================
    // Health Check
    // ========================================================================

    /// Ping the database
    pub async fn ping(&self) -> Result<()> {
        self.pool.ping().await
    }

    // ========================================================================
    // Paper Operations
    // ========================================================================

    /// True iff a committed paper with this external identifier exists.
    /// Always answered by the primary so concurrent crawls agree.
    pub async fn paper_exists(&self, external_id: &str) -> Result<bool> {
        let count = PaperEntity::find()
            .filter(PaperColumn::ExternalId.eq(external_id))
            .count(self.write_conn())
            .await?;

        Ok(count > 0)
    }

    /// Insert a paper unless its identifier is already stored
    pub async fn insert_paper(&self, paper: NewPaper) -> Result<InsertOutcome> {
        let external_id = paper.external_id().to_string();

        let result = self
            .write_conn()
            .transaction::<_, InsertOutcome, AppError>(|txn| {
                Box::pin(async move {
                    let existing = PaperEntity::find()
                        .filter(PaperColumn::ExternalId.eq(paper.external_id()))
                        .one(txn)
                        .await?;

                    if existing.is_some() {
                        return Ok(InsertOutcome::Duplicate {
                            external_id: paper.external_id().to_string(),
                        });
                    }

                    let model = paper.into_active_model(Utc::now()).insert(txn).await?;
                    Ok(InsertOutcome::Inserted(model))
                })
            })
            .await;

        match result {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                let err = AppError::from(err);
                // A concurrent writer won the race between our check and insert
                if let AppError::Database(ref db_err) = err {
                    if matches!(db_err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) {
                        return Ok(InsertOutcome::Duplicate { external_id });
                    }
                }
                Err(err)
            }
        }
    }

    /// Find paper by external identifier
    pub async fn find_paper_by_external_id(&self, external_id: &str) -> Result<Option<Paper>> {
        PaperEntity::find()
            .filter(PaperColumn::ExternalId.eq(external_id))
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// Papers published in `[start, end)`
    pub async fn papers_published_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Paper>> {
        PaperEntity::find()
            .filter(PaperColumn::PublishedDate.gte(start))
            .filter(PaperColumn::PublishedDate.lt(end))
            .order_by_asc(PaperColumn::PublishedDate)
            .order_by_asc(PaperColumn::Id)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// Papers whose download status is currently `state`
    pub async fn papers_with_download_state(&self, state: DownloadState) -> Result<Vec<Paper>> {
        let paper_ids: Vec<i32> = DownloadStatusEntity::find()
            .select_only()
            .column(DownloadStatusColumn::PaperId)
            .filter(DownloadStatusColumn::Status.eq(state.as_str()))
            .into_tuple()
            .all(self.read_conn())
            .await?;

        if paper_ids.is_empty() {
            return Ok(Vec::new());
        }

        PaperEntity::find()
            .filter(PaperColumn::Id.is_in(paper_ids))
            .order_by_asc(PaperColumn::Id)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    // ========================================================================
    // Download Status Operations
    // ========================================================================

    /// Existing status row for the paper, or a new one in `pending`
    pub async fn get_or_create_download_status(&self, paper: &Paper) -> Result<DownloadStatus> {
        let paper_id = paper.id;

        self.write_conn()
            .transaction::<_, DownloadStatus, AppError>(|txn| {
                Box::pin(async move {
                    let existing = DownloadStatusEntity::find()
                        .filter(DownloadStatusColumn::PaperId.eq(paper_id))
                        .order_by_asc(DownloadStatusColumn::Id)
                        .one(txn)
                        .await?;

                    if let Some(status) = existing {
                        return Ok(status);
                    }

                    let now = Utc::now();
                    let status = DownloadStatusActiveModel {
                        id: NotSet,
                        paper_id: Set(paper_id),
                        status: Set(DownloadState::Pending.into()),
                        progress: Set(0.0),
                        download_path: Set(None),
                        error_message: Set(None),
                        created_at: Set(now),
                        updated_at: Set(now),
                    };

                    Ok(status.insert(txn).await?)
                })
            })
            .await
            .map_err(Into::into)
    }

    /// Apply a partial update to a status row and commit
    pub async fn update_download_status(
        &self,
        status_id: i32,
        update: DownloadStatusUpdate,
    ) -> Result<DownloadStatus> {
        self.write_conn()
            .transaction::<_, DownloadStatus, AppError>(|txn| {
                Box::pin(async move {
                    let mut status: DownloadStatusActiveModel =
                        DownloadStatusEntity::find_by_id(status_id)
                            .one(txn)
                            .await?
                            .ok_or_else(|| AppError::DownloadStatusNotFound {
                                id: status_id.to_string(),
                            })?
                            .into();

                    if let Some(state) = update.status {
                        status.status = Set(state.into());
                    }

                    if let Some(progress) = update.progress {
                        status.progress = Set(progress);
                    }

                    if let Some(path) = update.download_path {
                        status.download_path = Set(Some(path));
                    }

                    if let Some(error) = update.error_message {
                        status.error_message = Set(error);
                    }

                    status.updated_at = Set(Utc::now());

                    Ok(status.update(txn).await?)
                })
            })
            .await
            .map_err(Into::into)
    }

    /// Status row for a paper, if a download was ever attempted
    pub async fn find_download_status(&self, paper_id: i32) -> Result<Option<DownloadStatus>> {
        DownloadStatusEntity::find()
            .filter(DownloadStatusColumn::PaperId.eq(paper_id))
            .order_by_asc(DownloadStatusColumn::Id)
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// Number of status rows per state
    pub async fn download_state_counts(&self) -> Result<HashMap<DownloadState, i64>> {
        let rows: Vec<(String, i64)> = DownloadStatusEntity::find()
            .select_only()
            .column(DownloadStatusColumn::Status)
            .column_as(DownloadStatusColumn::Id.count(), "count")
            .group_by(DownloadStatusColumn::Status)
            .into_tuple()
            .all(self.read_conn())
            .await?;

        let mut counts = HashMap::new();
        for (status, count) in rows {
            match DownloadState::parse(&status) {
                Some(state) => *counts.entry(state).or_insert(0) += count,
                None => warn!(%status, count, "Skipping unknown download status in totals"),
            }
        }

        Ok(counts)
    }
}
