//! Video records

use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use std::collections::HashSet;
use uuid::Uuid;

use super::{parse_timestamp, parse_uuid};
use crate::errors::{RepositoryError, RepositoryResult};
use crate::models::{Video, VideoSource};

pub struct VideoRepository {
    pool: SqlitePool,
}

impl VideoRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_video(row: &SqliteRow) -> RepositoryResult<Video> {
        let id: String = row
            .try_get("id")
            .map_err(|e| RepositoryError::query_failed("decode videos.id", e))?;
        let source: String = row
            .try_get("source")
            .map_err(|e| RepositoryError::query_failed("decode videos.source", e))?;
        let created_at: String = row
            .try_get("created_at")
            .map_err(|e| RepositoryError::query_failed("decode videos.created_at", e))?;

        Ok(Video {
            id: parse_uuid("videos", "id", &id)?,
            title: row
                .try_get("title")
                .map_err(|e| RepositoryError::query_failed("decode videos.title", e))?,
            file_path: row
                .try_get("file_path")
                .map_err(|e| RepositoryError::query_failed("decode videos.file_path", e))?,
            file_size: row
                .try_get("file_size")
                .map_err(|e| RepositoryError::query_failed("decode videos.file_size", e))?,
            source: source
                .parse::<VideoSource>()
                .map_err(|_| RepositoryError::corrupt_record("videos", "source", &source))?,
            created_at: parse_timestamp("videos", "created_at", &created_at)?,
        })
    }

    pub async fn list(&self) -> RepositoryResult<Vec<Video>> {
        let rows = sqlx::query(
            "SELECT id, title, file_path, file_size, source, created_at FROM videos \
             ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryError::query_failed("list_videos", e))?;
        rows.iter().map(Self::row_to_video).collect()
    }

    pub async fn find_by_id(&self, id: Uuid) -> RepositoryResult<Option<Video>> {
        let row = sqlx::query(
            "SELECT id, title, file_path, file_size, source, created_at FROM videos WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepositoryError::query_failed("find_video", e))?;
        row.as_ref().map(Self::row_to_video).transpose()
    }

    pub async fn insert(&self, video: &Video) -> RepositoryResult<()> {
        sqlx::query(
            "INSERT INTO videos (id, title, file_path, file_size, source, created_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(video.id.to_string())
        .bind(&video.title)
        .bind(&video.file_path)
        .bind(video.file_size)
        .bind(video.source.as_str())
        .bind(video.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::query_failed("insert_video", e))?;
        Ok(())
    }

    /// Every file path that already has a record
    pub async fn known_paths(&self) -> RepositoryResult<HashSet<String>> {
        let rows = sqlx::query("SELECT file_path FROM videos")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| RepositoryError::query_failed("known_video_paths", e))?;
        rows.iter()
            .map(|r| {
                r.try_get::<String, _>("file_path")
                    .map_err(|e| RepositoryError::query_failed("decode videos.file_path", e))
            })
            .collect()
    }
}
