//! Configuration validation.

use super::Config;
use crate::error::{MigrateError, Result};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    let migration = &config.migration;

    if migration.parallelism == 0 {
        return Err(MigrateError::Config(
            "migration.parallelism must be at least 1".into(),
        ));
    }
    if migration.fetch_page_size == 0 {
        return Err(MigrateError::Config(
            "migration.fetch_page_size must be at least 1".into(),
        ));
    }
    if migration.progress_interval == 0 {
        return Err(MigrateError::Config(
            "migration.progress_interval must be at least 1".into(),
        ));
    }
    if migration.copy_flush_rows == 0 {
        return Err(MigrateError::Config(
            "migration.copy_flush_rows must be at least 1".into(),
        ));
    }

    if let Some(path) = &config.target.search_path {
        if path.trim().is_empty() {
            return Err(MigrateError::Config(
                "target.search_path must not be blank".into(),
            ));
        }
    }

    Ok(())
}
