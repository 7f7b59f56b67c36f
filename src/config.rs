use crate::errors::{MergeError, MergeResult};
use crate::models::SortDirection;
use crate::source::SourceDescriptor;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MergeSettings {
    pub default_page_size: i64,
    pub max_page_size: i64,
    pub default_direction: SortDirection,
    pub updated_column: String,
    pub created_column: String,
    pub dedup: bool,
    pub log_filter: String,
}

impl Default for MergeSettings {
    fn default() -> Self {
        Self {
            default_page_size: 20,
            max_page_size: 500,
            default_direction: SortDirection::Desc,
            updated_column: "updated_at".to_string(),
            created_column: "created_at".to_string(),
            dedup: false,
            log_filter: "info".to_string(),
        }
    }
}

impl MergeSettings {
    pub fn from_json(raw: &str) -> MergeResult<Self> {
        let settings: Self = serde_json::from_str(raw)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn load(path: &Path) -> MergeResult<Self> {
        let raw = fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    /// A descriptor using the configured timestamp columns.
    pub fn descriptor(&self, type_tag: &str, table_name: &str) -> SourceDescriptor {
        SourceDescriptor::new(type_tag, table_name)
            .with_timestamp_columns(self.updated_column.clone(), self.created_column.clone())
    }

    pub fn validate(&self) -> MergeResult<()> {
        if self.default_page_size <= 0 || self.max_page_size <= 0 {
            return Err(MergeError::Configuration(
                "page sizes must be positive".to_string(),
            ));
        }
        if self.default_page_size > self.max_page_size {
            return Err(MergeError::Configuration(format!(
                "defaultPageSize {} exceeds maxPageSize {}",
                self.default_page_size, self.max_page_size
            )));
        }
        Ok(())
    }
}
