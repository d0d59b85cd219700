//! SQLite-backed stream repository

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use tracing::warn;
use uuid::Uuid;

use super::{parse_optional_timestamp, parse_timestamp, parse_uuid, StreamStore};
use crate::errors::{RepositoryError, RepositoryResult};
use crate::models::{
    DailyTime, LifecycleState, LifecycleUpdate, ScheduleKind, Stream, WindowUpdate,
};

const STREAM_COLUMNS: &str = "id, title, rtmp_url, stream_key, video_id, schedule_type, \
     once_start, once_end, daily_start_time, daily_duration_minutes, \
     next_start_time, next_end_time, status, manual_override, heal_pending, \
     created_at, updated_at";

pub struct SqliteStreamRepository {
    pool: SqlitePool,
}

/// Flattened schedule columns
struct ScheduleColumns {
    schedule_type: &'static str,
    once_start: Option<String>,
    once_end: Option<String>,
    daily_start_time: Option<String>,
    daily_duration_minutes: Option<i64>,
}

impl From<&ScheduleKind> for ScheduleColumns {
    fn from(kind: &ScheduleKind) -> Self {
        let mut columns = ScheduleColumns {
            schedule_type: kind.name(),
            once_start: None,
            once_end: None,
            daily_start_time: None,
            daily_duration_minutes: None,
        };
        match kind {
            ScheduleKind::Manual => {}
            ScheduleKind::Once { start, end } => {
                columns.once_start = Some(start.to_rfc3339());
                columns.once_end = Some(end.to_rfc3339());
            }
            ScheduleKind::Daily {
                start_time,
                duration_minutes,
            } => {
                columns.daily_start_time = Some(start_time.to_string());
                columns.daily_duration_minutes = Some(*duration_minutes as i64);
            }
        }
        columns
    }
}

impl SqliteStreamRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_stream(row: &SqliteRow) -> RepositoryResult<Stream> {
        let id: String = row.try_get("id").map_err(query_err("streams.id"))?;
        let video_id: Option<String> =
            row.try_get("video_id").map_err(query_err("streams.video_id"))?;
        let status: String = row.try_get("status").map_err(query_err("streams.status"))?;
        let created_at: String =
            row.try_get("created_at").map_err(query_err("streams.created_at"))?;
        let updated_at: String =
            row.try_get("updated_at").map_err(query_err("streams.updated_at"))?;

        Ok(Stream {
            id: parse_uuid("streams", "id", &id)?,
            title: row.try_get("title").map_err(query_err("streams.title"))?,
            rtmp_url: row.try_get("rtmp_url").map_err(query_err("streams.rtmp_url"))?,
            destination_key: row.try_get("stream_key").map_err(query_err("streams.stream_key"))?,
            video_id: video_id
                .map(|v| parse_uuid("streams", "video_id", &v))
                .transpose()?,
            schedule: Self::row_to_schedule(row)?,
            next_start: parse_optional_timestamp(
                "streams",
                "next_start_time",
                row.try_get("next_start_time").map_err(query_err("streams.next_start_time"))?,
            )?,
            next_end: parse_optional_timestamp(
                "streams",
                "next_end_time",
                row.try_get("next_end_time").map_err(query_err("streams.next_end_time"))?,
            )?,
            state: status
                .parse::<LifecycleState>()
                .map_err(|_| RepositoryError::corrupt_record("streams", "status", &status))?,
            manual_override: row
                .try_get("manual_override")
                .map_err(query_err("streams.manual_override"))?,
            heal_pending: row.try_get("heal_pending").map_err(query_err("streams.heal_pending"))?,
            created_at: parse_timestamp("streams", "created_at", &created_at)?,
            updated_at: parse_timestamp("streams", "updated_at", &updated_at)?,
        })
    }

    fn row_to_schedule(row: &SqliteRow) -> RepositoryResult<ScheduleKind> {
        let schedule_type: String =
            row.try_get("schedule_type").map_err(query_err("streams.schedule_type"))?;
        match schedule_type.as_str() {
            "manual" => Ok(ScheduleKind::Manual),
            "once" => {
                let start: Option<String> =
                    row.try_get("once_start").map_err(query_err("streams.once_start"))?;
                let end: Option<String> =
                    row.try_get("once_end").map_err(query_err("streams.once_end"))?;
                match (start, end) {
                    (Some(start), Some(end)) => Ok(ScheduleKind::Once {
                        start: parse_timestamp("streams", "once_start", &start)?,
                        end: parse_timestamp("streams", "once_end", &end)?,
                    }),
                    _ => Err(RepositoryError::corrupt_record("streams", "once_start", "NULL")),
                }
            }
            "daily" => {
                let start_time: Option<String> =
                    row.try_get("daily_start_time").map_err(query_err("streams.daily_start_time"))?;
                let duration: Option<i64> = row
                    .try_get("daily_duration_minutes")
                    .map_err(query_err("streams.daily_duration_minutes"))?;
                let start_time = start_time.ok_or_else(|| {
                    RepositoryError::corrupt_record("streams", "daily_start_time", "NULL")
                })?;
                let duration = duration.ok_or_else(|| {
                    RepositoryError::corrupt_record("streams", "daily_duration_minutes", "NULL")
                })?;
                Ok(ScheduleKind::Daily {
                    start_time: start_time.parse::<DailyTime>().map_err(|_| {
                        RepositoryError::corrupt_record("streams", "daily_start_time", &start_time)
                    })?,
                    duration_minutes: u32::try_from(duration).map_err(|_| {
                        RepositoryError::corrupt_record(
                            "streams",
                            "daily_duration_minutes",
                            duration.to_string(),
                        )
                    })?,
                })
            }
            other => Err(RepositoryError::corrupt_record("streams", "schedule_type", other)),
        }
    }

    async fn fetch_streams(
        &self,
        query: &str,
        bind: Option<&str>,
    ) -> RepositoryResult<Vec<Stream>> {
        let mut q = sqlx::query(query);
        if let Some(value) = bind {
            q = q.bind(value);
        }
        let rows = q
            .fetch_all(&self.pool)
            .await
            .map_err(|e| RepositoryError::query_failed(query, e))?;
        rows.iter().map(Self::row_to_stream).collect()
    }
}

fn query_err(field: &'static str) -> impl Fn(sqlx::Error) -> RepositoryError {
    move |e| RepositoryError::query_failed(format!("decode {}", field), e)
}

#[async_trait]
impl StreamStore for SqliteStreamRepository {
    async fn list_reconcilable(&self) -> RepositoryResult<Vec<Uuid>> {
        let query = "SELECT id FROM streams \
                     WHERE status != 'offline' OR heal_pending = 1 \
                     ORDER BY created_at";
        let rows = sqlx::query(query)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| RepositoryError::query_failed(query, e))?;

        let mut ids = Vec::with_capacity(rows.len());
        for row in &rows {
            let raw: String = row.try_get("id").map_err(query_err("streams.id"))?;
            match parse_uuid("streams", "id", &raw) {
                Ok(id) => ids.push(id),
                Err(e) => warn!("Skipping stream row with unreadable id: {}", e),
            }
        }
        Ok(ids)
    }

    async fn list_all(&self) -> RepositoryResult<Vec<Stream>> {
        let query = format!("SELECT {} FROM streams ORDER BY created_at", STREAM_COLUMNS);
        self.fetch_streams(&query, None).await
    }

    async fn find_stream(&self, id: Uuid) -> RepositoryResult<Option<Stream>> {
        let query = format!("SELECT {} FROM streams WHERE id = ?", STREAM_COLUMNS);
        let id = id.to_string();
        Ok(self.fetch_streams(&query, Some(&id)).await?.into_iter().next())
    }

    async fn find_live_by_destination(
        &self,
        destination_key: &str,
    ) -> RepositoryResult<Vec<Stream>> {
        let query = format!(
            "SELECT {} FROM streams WHERE stream_key = ? AND status = 'live'",
            STREAM_COLUMNS
        );
        self.fetch_streams(&query, Some(destination_key)).await
    }

    async fn insert_stream(&self, stream: &Stream) -> RepositoryResult<()> {
        let schedule = ScheduleColumns::from(&stream.schedule);
        sqlx::query(
            r#"
            INSERT INTO streams (
                id, title, rtmp_url, stream_key, video_id, schedule_type,
                once_start, once_end, daily_start_time, daily_duration_minutes,
                next_start_time, next_end_time, status, manual_override, heal_pending,
                created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(stream.id.to_string())
        .bind(&stream.title)
        .bind(&stream.rtmp_url)
        .bind(&stream.destination_key)
        .bind(stream.video_id.map(|v| v.to_string()))
        .bind(schedule.schedule_type)
        .bind(schedule.once_start)
        .bind(schedule.once_end)
        .bind(schedule.daily_start_time)
        .bind(schedule.daily_duration_minutes)
        .bind(stream.next_start.map(|t| t.to_rfc3339()))
        .bind(stream.next_end.map(|t| t.to_rfc3339()))
        .bind(stream.state.as_str())
        .bind(stream.manual_override)
        .bind(stream.heal_pending)
        .bind(stream.created_at.to_rfc3339())
        .bind(stream.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::query_failed("insert_stream", e))?;
        Ok(())
    }

    async fn update_config(&self, stream: &Stream) -> RepositoryResult<()> {
        let schedule = ScheduleColumns::from(&stream.schedule);
        let result = sqlx::query(
            r#"
            UPDATE streams SET
                title = ?, rtmp_url = ?, stream_key = ?, video_id = ?, schedule_type = ?,
                once_start = ?, once_end = ?, daily_start_time = ?, daily_duration_minutes = ?,
                next_start_time = ?, next_end_time = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&stream.title)
        .bind(&stream.rtmp_url)
        .bind(&stream.destination_key)
        .bind(stream.video_id.map(|v| v.to_string()))
        .bind(schedule.schedule_type)
        .bind(schedule.once_start)
        .bind(schedule.once_end)
        .bind(schedule.daily_start_time)
        .bind(schedule.daily_duration_minutes)
        .bind(stream.next_start.map(|t| t.to_rfc3339()))
        .bind(stream.next_end.map(|t| t.to_rfc3339()))
        .bind(Utc::now().to_rfc3339())
        .bind(stream.id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::query_failed("update_config", e))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::record_not_found("streams", "id", stream.id.to_string()));
        }
        Ok(())
    }

    async fn update_lifecycle(&self, id: Uuid, update: LifecycleUpdate) -> RepositoryResult<bool> {
        let now = Utc::now().to_rfc3339();
        let query = match update.window {
            WindowUpdate::Keep => sqlx::query(
                "UPDATE streams SET status = ?, manual_override = COALESCE(?, manual_override), \
                 heal_pending = ?, updated_at = ? WHERE id = ?",
            )
            .bind(update.state.as_str())
            .bind(update.manual_override)
            .bind(update.heal_pending)
            .bind(now)
            .bind(id.to_string()),
            WindowUpdate::Set(window) => sqlx::query(
                "UPDATE streams SET status = ?, manual_override = COALESCE(?, manual_override), \
                 heal_pending = ?, next_start_time = ?, next_end_time = ?, updated_at = ? \
                 WHERE id = ?",
            )
            .bind(update.state.as_str())
            .bind(update.manual_override)
            .bind(update.heal_pending)
            .bind(window.map(|w| w.start.to_rfc3339()))
            .bind(window.map(|w| w.end.to_rfc3339()))
            .bind(now)
            .bind(id.to_string()),
        };

        let result = query
            .execute(&self.pool)
            .await
            .map_err(|e| RepositoryError::query_failed("update_lifecycle", e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_stream(&self, id: Uuid) -> RepositoryResult<bool> {
        let result = sqlx::query("DELETE FROM streams WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| RepositoryError::query_failed("delete_stream", e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn video_file_path(&self, video_id: Uuid) -> RepositoryResult<Option<String>> {
        let row = sqlx::query("SELECT file_path FROM videos WHERE id = ?")
            .bind(video_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RepositoryError::query_failed("video_file_path", e))?;
        row.map(|r| r.try_get::<String, _>("file_path"))
            .transpose()
            .map_err(query_err("videos.file_path"))
    }
}
