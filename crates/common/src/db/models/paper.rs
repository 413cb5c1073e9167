//! Paper entity

use sea_orm::entity::prelude::*;
use sea_orm::FromJsonQueryResult;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::errors::Result as AppResult;

/// Ordered list of strings persisted as a JSON array
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, FromJsonQueryResult)]
pub struct StringList(pub Vec<String>);

impl StringList {
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }
}

impl From<Vec<String>> for StringList {
    fn from(items: Vec<String>) -> Self {
        Self(items)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "papers")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    /// External identifier (arXiv accession number)
    #[sea_orm(unique)]
    pub external_id: String,

    #[sea_orm(column_type = "Text")]
    pub title: String,

    #[sea_orm(column_type = "Json")]
    pub authors: StringList,

    /// Never available from listing pages
    #[sea_orm(column_type = "Json")]
    pub institutions: StringList,

    #[sea_orm(column_type = "Text")]
    pub abstract_text: String,

    #[sea_orm(column_type = "Text", nullable)]
    pub pdf_url: Option<String>,

    /// Midnight UTC of the listing date
    pub published_date: DateTimeUtc,

    /// Primary category first
    #[sea_orm(column_type = "Json")]
    pub categories: StringList,

    pub created_at: DateTimeUtc,

    pub updated_at: DateTimeUtc,
}

impl Model {
    pub fn primary_category(&self) -> Option<&str> {
        self.categories.0.first().map(String::as_str)
    }

    /// Creation date bucket, `YYYY-MM-DD`
    pub fn created_day(&self) -> String {
        self.created_at.format("%Y-%m-%d").to_string()
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::download_status::Entity")]
    DownloadStatuses,
}

impl Related<super::download_status::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::DownloadStatuses.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// A validated paper ready to be inserted into the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct NewPaper {
    #[validate(length(min = 1, max = 50))]
    external_id: String,

    #[validate(length(max = 500))]
    title: String,

    authors: Vec<String>,

    institutions: Vec<String>,

    abstract_text: String,

    #[validate(url)]
    pdf_url: Option<String>,

    published_date: DateTimeUtc,

    categories: Vec<String>,
}

impl NewPaper {
    pub fn builder(external_id: impl Into<String>, published_date: DateTimeUtc) -> NewPaperBuilder {
        NewPaperBuilder {
            paper: NewPaper {
                external_id: external_id.into(),
                title: String::new(),
                authors: Vec::new(),
                institutions: Vec::new(),
                abstract_text: String::new(),
                pdf_url: None,
                published_date,
                categories: Vec::new(),
            },
        }
    }

    pub fn external_id(&self) -> &str {
        &self.external_id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn authors(&self) -> &[String] {
        &self.authors
    }

    pub fn abstract_text(&self) -> &str {
        &self.abstract_text
    }

    pub fn pdf_url(&self) -> Option<&str> {
        self.pdf_url.as_deref()
    }

    pub fn published_date(&self) -> DateTimeUtc {
        self.published_date
    }

    pub fn categories(&self) -> &[String] {
        &self.categories
    }

    /// Active model for insertion, stamped with `now`
    pub(crate) fn into_active_model(self, now: DateTimeUtc) -> ActiveModel {
        use sea_orm::{NotSet, Set};

        ActiveModel {
            id: NotSet,
            external_id: Set(self.external_id),
            title: Set(self.title),
            authors: Set(self.authors.into()),
            institutions: Set(self.institutions.into()),
            abstract_text: Set(self.abstract_text),
            pdf_url: Set(self.pdf_url),
            published_date: Set(self.published_date),
            categories: Set(self.categories.into()),
            created_at: Set(now),
            updated_at: Set(now),
        }
    }
}

/// Builder that validates the paper on `build`
#[derive(Debug, Clone)]
pub struct NewPaperBuilder {
    paper: NewPaper,
}

impl NewPaperBuilder {
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.paper.title = title.into();
        self
    }

    pub fn authors(mut self, authors: Vec<String>) -> Self {
        self.paper.authors = authors;
        self
    }

    pub fn institutions(mut self, institutions: Vec<String>) -> Self {
        self.paper.institutions = institutions;
        self
    }

    pub fn abstract_text(mut self, abstract_text: impl Into<String>) -> Self {
        self.paper.abstract_text = abstract_text.into();
        self
    }

    pub fn pdf_url(mut self, pdf_url: impl Into<String>) -> Self {
        self.paper.pdf_url = Some(pdf_url.into());
        self
    }

    pub fn categories(mut self, categories: Vec<String>) -> Self {
        self.paper.categories = categories;
        self
    }

    pub fn build(self) -> AppResult<NewPaper> {
        self.paper.validate()?;
        Ok(self.paper)
    }
}

/// Result of `Repository::insert_paper`
#[derive(Debug, Clone)]
pub enum InsertOutcome {
    Inserted(Model),
    Duplicate { external_id: String },
}

impl InsertOutcome {
    pub fn is_inserted(&self) -> bool {
        matches!(self, InsertOutcome::Inserted(_))
    }

    pub fn paper(&self) -> Option<&Model> {
        match self {
            InsertOutcome::Inserted(paper) => Some(paper),
            InsertOutcome::Duplicate { .. } => None,
        }
    }

    pub fn message(&self) -> String {
        match self {
            InsertOutcome::Inserted(paper) => format!("paper {} saved", paper.external_id),
            InsertOutcome::Duplicate { external_id } => {
                format!("paper {} already exists", external_id)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn published() -> DateTimeUtc {
        Utc.with_ymd_and_hms(2025, 3, 5, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_builder_accepts_listing_entry() {
        let paper = NewPaper::builder("2503.01234", published())
            .title("Sparse Attention at Scale")
            .authors(vec!["Ada Lovelace".into(), "Alan Turing".into()])
            .pdf_url("https://arxiv.org/pdf/2503.01234.pdf")
            .categories(vec!["cs.CL".into(), "cs.AI".into()])
            .build()
            .unwrap();

        assert_eq!(paper.external_id(), "2503.01234");
        assert_eq!(paper.authors().len(), 2);
        assert_eq!(paper.categories()[0], "cs.CL");
    }

    #[test]
    fn test_builder_rejects_empty_identifier() {
        let err = NewPaper::builder("", published()).title("x").build().unwrap_err();
        match err {
            crate::AppError::Validation { field, .. } => {
                assert_eq!(field.as_deref(), Some("external_id"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_builder_rejects_bad_pdf_url() {
        let result = NewPaper::builder("2503.01234", published())
            .pdf_url("not a url")
            .build();
        assert!(result.is_err());
    }
}
