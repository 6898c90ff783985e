//! Fingerprint dedup gate
//!
//! Exact-fingerprint lookup run right after Identify. A hit short-circuits the
//! rest of the pipeline.

use songline_common::Result;
use std::sync::Arc;

use crate::db::SongStore;
use crate::models::Song;

#[derive(Debug, Clone, PartialEq)]
pub enum DedupLookup {
    /// Audio already processed; this is its song
    Hit(Song),
    Miss,
}

#[derive(Clone)]
pub struct DedupGate {
    store: Arc<dyn SongStore>,
}

impl DedupGate {
    pub fn new(store: Arc<dyn SongStore>) -> Self {
        Self { store }
    }

    pub async fn lookup(&self, fingerprint: &str) -> Result<DedupLookup> {
        match self.store.get_by_fingerprint(fingerprint).await? {
            Some(song) => {
                tracing::debug!(song_id = %song.id, "Fingerprint already persisted");
                Ok(DedupLookup::Hit(song))
            }
            None => Ok(DedupLookup::Miss),
        }
    }
}
