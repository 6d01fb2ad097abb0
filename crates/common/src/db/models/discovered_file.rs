//! DiscoveredFile entity: an artifact emitted during a run
//!
//! Unique per (run, reference_code). Fingerprints are SHA-1 hex of the raw
//! bytes (`content_hash`) and of the normalized extracted text
//! (`extracted_text_hash`) when the adapter supplies text.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

/// Suffix appended to content hashes on soft delete so the row stops
/// participating in duplicate lookups without losing the original value.
pub const DELETED_HASH_MARKER: &str = "##deleted";

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "discovered_files")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub run_id: Uuid,

    /// Denormalized for per-job duplicate lookups
    pub job_id: Uuid,

    /// Denormalized connector reference
    pub connector_id: Uuid,

    #[sea_orm(column_type = "Text")]
    pub document_type: String,

    #[sea_orm(column_type = "Text")]
    pub file_format: String,

    #[sea_orm(column_type = "Text", nullable)]
    pub original_filename: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub original_download_url: Option<String>,

    /// Stable per-vendor identity within the run
    #[sea_orm(column_type = "Text")]
    pub reference_code: String,

    pub document_properties: Json,

    #[sea_orm(column_type = "Text", nullable)]
    pub content_hash: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub extracted_text_hash: Option<String>,

    pub downloaded_successfully: bool,

    pub downloaded_at: Option<DateTimeWithTimeZone>,

    /// Ephemeral path on the worker host while the run is live
    #[sea_orm(column_type = "Text", nullable)]
    pub local_filepath: Option<String>,

    /// Stable URL after upload to the object store
    #[sea_orm(column_type = "Text", nullable)]
    pub original_file: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub piq_upload_id: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub piq_url: Option<String>,

    pub piq_container_id: Option<i64>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,

    pub deleted_at: Option<DateTimeWithTimeZone>,
}

impl Model {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Already handed to the downstream document service
    pub fn has_container(&self) -> bool {
        self.piq_container_id.is_some()
    }

    pub fn document_type(&self) -> super::operation::DocumentType {
        super::operation::DocumentType::from(self.document_type.clone())
    }
}

/// SHA-1 hex fingerprint of raw bytes
pub fn content_fingerprint(bytes: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// SHA-1 hex fingerprint of extracted text, normalized by collapsing
/// whitespace so layout-only differences do not defeat deduplication.
pub fn text_fingerprint(text: &str) -> String {
    let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ");
    content_fingerprint(normalized.as_bytes())
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::run::Entity",
        from = "Column::RunId",
        to = "super::run::Column::Id"
    )]
    Run,

    #[sea_orm(
        belongs_to = "super::job::Entity",
        from = "Column::JobId",
        to = "super::job::Column::Id"
    )]
    Job,
}

impl Related<super::run::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Run.def()
    }
}

impl Related<super::job::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Job.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_fingerprint_is_sha1_hex() {
        // Known SHA-1 of "abc"
        assert_eq!(
            content_fingerprint(b"abc"),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
    }

    #[test]
    fn test_text_fingerprint_normalizes_whitespace() {
        let a = text_fingerprint("Invoice  #42\n  Total: $10");
        let b = text_fingerprint("Invoice #42 Total: $10");
        assert_eq!(a, b);
        assert_ne!(a, text_fingerprint("Invoice #43 Total: $10"));
    }
}
