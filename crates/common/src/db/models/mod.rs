//! SeaORM entity models
//!
//! Database entities for PaperWatch

mod download_status;
mod paper;

pub use paper::{
    Entity as PaperEntity,
    Model as Paper,
    ActiveModel as PaperActiveModel,
    Column as PaperColumn,
    InsertOutcome,
    NewPaper,
    NewPaperBuilder,
    StringList,
};

pub use download_status::{
    Entity as DownloadStatusEntity,
    Model as DownloadStatus,
    ActiveModel as DownloadStatusActiveModel,
    Column as DownloadStatusColumn,
    DownloadState,
};
