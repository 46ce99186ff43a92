// src/store/cache.rs

use rusqlite::{OptionalExtension, params};
use tracing::debug;

use crate::errors::Result;
use crate::store::Store;
use crate::store::models::{STAGE_COLUMNS, Stage};

impl Store {
    /// Earliest completed stage with this fingerprint and a stored result.
    ///
    /// `exclude` skips the asking stage itself.
    pub fn find_by_fingerprint(&self, fingerprint: &str, exclude: Option<i64>) -> Result<Option<Stage>> {
        if fingerprint.is_empty() {
            return Ok(None);
        }

        let conn = self.connect()?;
        let hit = conn
            .query_row(
                &format!(
                    "SELECT {STAGE_COLUMNS} FROM stages \
                     WHERE status = 'completed' AND fingerprint = ?1 AND result != '' \
                     AND id != ?2 ORDER BY id LIMIT 1"
                ),
                params![fingerprint, exclude.unwrap_or(-1)],
                Stage::from_row,
            )
            .optional()?;

        debug!(fingerprint, hit = ?hit.as_ref().map(|s| &s.name), "Fingerprint lookup");
        Ok(hit)
    }
}
