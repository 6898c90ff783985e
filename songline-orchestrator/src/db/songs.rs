//! Song database operations

use async_trait::async_trait;
use chrono::SecondsFormat;
use songline_common::{time::parse_rfc3339, Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::SongStore;
use crate::models::song::fingerprint_key;
use crate::models::Song;

const SONG_COLUMNS: &str = "id, title, artist, duration_seconds, fingerprint, lyrics, \
     classification, confidence, source_artifact_ref, created_at";

/// SQLite-backed [`SongStore`]
#[derive(Clone)]
pub struct SqliteSongStore {
    pool: SqlitePool,
}

impl SqliteSongStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl SongStore for SqliteSongStore {
    async fn insert_or_get_by_fingerprint(&self, song: &Song) -> Result<Song> {
        insert_or_get_song(&self.pool, song).await
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Song>> {
        load_song_by_id(&self.pool, id).await
    }

    async fn get_by_fingerprint(&self, fingerprint: &str) -> Result<Option<Song>> {
        load_song_by_fingerprint(&self.pool, fingerprint).await
    }

    async fn get_by_title_artist(&self, title: &str, artist: &str) -> Result<Option<Song>> {
        load_song_by_title_artist(&self.pool, title, artist).await
    }

    async fn list_all(&self) -> Result<Vec<Song>> {
        list_songs(&self.pool).await
    }
}

/// Insert a song or adopt the row already holding its fingerprint
///
/// The no-op `DO UPDATE` makes `RETURNING` yield the existing row on conflict,
/// so the conflict is resolved inside one statement with no read-then-write gap.
pub async fn insert_or_get_song(pool: &SqlitePool, song: &Song) -> Result<Song> {
    let sql = format!(
        r#"
        INSERT INTO songs (
            id, title, artist, duration_seconds, fingerprint, fingerprint_hash,
            lyrics, classification, confidence, source_artifact_ref, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(fingerprint_hash) DO UPDATE SET
            fingerprint_hash = excluded.fingerprint_hash
        RETURNING {}
        "#,
        SONG_COLUMNS
    );

    let row = sqlx::query(&sql)
        .bind(song.id.to_string())
        .bind(&song.title)
        .bind(&song.artist)
        .bind(song.duration_seconds)
        .bind(&song.fingerprint)
        .bind(song.fingerprint_key())
        .bind(&song.lyrics)
        .bind(&song.classification)
        .bind(song.confidence)
        .bind(&song.source_artifact_ref)
        .bind(song.created_at.to_rfc3339_opts(SecondsFormat::Micros, true))
        .fetch_one(pool)
        .await?;

    song_from_row(&row)
}

/// Load song by id
pub async fn load_song_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<Song>> {
    let sql = format!("SELECT {} FROM songs WHERE id = ?", SONG_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(song_from_row).transpose()
}

/// Load song by exact fingerprint
pub async fn load_song_by_fingerprint(pool: &SqlitePool, fingerprint: &str) -> Result<Option<Song>> {
    let sql = format!("SELECT {} FROM songs WHERE fingerprint_hash = ?", SONG_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(fingerprint_key(fingerprint))
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(song_from_row).transpose()
}

/// Load the newest song matching title and artist (case-insensitive, trimmed)
pub async fn load_song_by_title_artist(
    pool: &SqlitePool,
    title: &str,
    artist: &str,
) -> Result<Option<Song>> {
    let sql = format!(
        "SELECT {} FROM songs \
         WHERE title = ? COLLATE NOCASE AND artist = ? COLLATE NOCASE \
         ORDER BY created_at DESC, rowid DESC LIMIT 1",
        SONG_COLUMNS
    );
    let row = sqlx::query(&sql)
        .bind(title.trim())
        .bind(artist.trim())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(song_from_row).transpose()
}

/// All songs, newest first
pub async fn list_songs(pool: &SqlitePool) -> Result<Vec<Song>> {
    let sql = format!(
        "SELECT {} FROM songs ORDER BY created_at DESC, rowid DESC",
        SONG_COLUMNS
    );
    let rows = sqlx::query(&sql).fetch_all(pool).await?;

    rows.iter().map(song_from_row).collect()
}

fn song_from_row(row: &SqliteRow) -> Result<Song> {
    let id: String = row.try_get("id")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(Song {
        id: Uuid::parse_str(&id)
            .map_err(|e| Error::Internal(format!("Invalid song id '{}': {}", id, e)))?,
        title: row.try_get("title")?,
        artist: row.try_get("artist")?,
        duration_seconds: row.try_get("duration_seconds")?,
        fingerprint: row.try_get("fingerprint")?,
        lyrics: row.try_get("lyrics")?,
        classification: row.try_get("classification")?,
        confidence: row.try_get("confidence")?,
        source_artifact_ref: row.try_get("source_artifact_ref")?,
        created_at: parse_rfc3339(&created_at)?,
    })
}
