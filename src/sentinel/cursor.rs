//! Durable scan position
//!
//! The cursor is the height of the last block whose deposits have all been
//! attempted. It lives in the metadata table and only moves forward.

use std::sync::Arc;

use crate::db::schema::CURSOR_KEY;
use crate::funding::error::LedgerError;
use crate::funding::ledger::MetadataStore;

#[derive(Clone)]
pub struct CursorStore {
    store: Arc<dyn MetadataStore>,
    key: String,
}

impl CursorStore {
    pub fn new(store: Arc<dyn MetadataStore>) -> Self {
        Self {
            store,
            key: CURSOR_KEY.to_string(),
        }
    }

    /// Last processed height; absent or empty reads as 0
    pub async fn load(&self) -> Result<u64, LedgerError> {
        match self.store.get_meta(&self.key).await? {
            None => Ok(0),
            Some(value) if value.trim().is_empty() => Ok(0),
            Some(value) => value
                .trim()
                .parse::<u64>()
                .map_err(|_| LedgerError::CorruptMetadata {
                    key: self.key.clone(),
                    value,
                }),
        }
    }

    pub async fn save(&self, height: u64) -> Result<(), LedgerError> {
        self.store.set_meta(&self.key, &height.to_string()).await
    }
}
