//! Download status entity, one row per paper once a download was attempted

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

/// Download state enum
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadState {
    Pending,
    Downloading,
    Completed,
    Failed,
}

impl DownloadState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadState::Pending => "pending",
            DownloadState::Downloading => "downloading",
            DownloadState::Completed => "completed",
            DownloadState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DownloadState::Completed | DownloadState::Failed)
    }

    /// Parse a stored status string, `None` for anything unrecognised
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(DownloadState::Pending),
            "downloading" => Some(DownloadState::Downloading),
            "completed" => Some(DownloadState::Completed),
            "failed" => Some(DownloadState::Failed),
            _ => None,
        }
    }
}

/// Unrecognised values read as pending so the row is retried, with a warning
impl From<String> for DownloadState {
    fn from(s: String) -> Self {
        Self::parse(&s).unwrap_or_else(|| {
            warn!(status = %s, "Unknown download status, treating as pending");
            DownloadState::Pending
        })
    }
}

impl From<DownloadState> for String {
    fn from(state: DownloadState) -> Self {
        state.as_str().to_string()
    }
}

impl fmt::Display for DownloadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "download_statuses")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    pub paper_id: i32,

    #[sea_orm(column_type = "Text")]
    pub status: String,

    /// Percentage, 0 to 100
    pub progress: f64,

    #[sea_orm(column_type = "Text", nullable)]
    pub download_path: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub error_message: Option<String>,

    pub created_at: DateTimeUtc,

    pub updated_at: DateTimeUtc,
}

impl Model {
    /// Get the download status as an enum
    pub fn state(&self) -> DownloadState {
        DownloadState::from(self.status.clone())
    }

    /// Check if the download is in a terminal state
    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::paper::Entity",
        from = "Column::PaperId",
        to = "super::paper::Column::Id"
    )]
    Paper,
}

impl Related<super::paper::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Paper.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_round_trip_through_column() {
        for state in [
            DownloadState::Pending,
            DownloadState::Downloading,
            DownloadState::Completed,
            DownloadState::Failed,
        ] {
            assert_eq!(DownloadState::from(String::from(state)), state);
        }
    }

    #[test]
    fn test_unknown_status_reads_as_pending() {
        assert_eq!(DownloadState::parse("archived"), None);
        assert_eq!(DownloadState::parse("failed"), Some(DownloadState::Failed));
        assert_eq!(DownloadState::from("archived".to_string()), DownloadState::Pending);
    }

    #[test]
    fn test_terminal_states() {
        assert!(DownloadState::Completed.is_terminal());
        assert!(DownloadState::Failed.is_terminal());
        assert!(!DownloadState::Downloading.is_terminal());
    }
}
