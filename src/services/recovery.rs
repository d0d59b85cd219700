//! Rebuild video records from files left in the upload directory
//!
//! Files can outlive their database rows (a lost database, a manual copy into
//! the directory). Recovery registers any recognised video file that no
//! record points at yet.

use chrono::Utc;
use std::path::Path;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::errors::{AppError, AppResult};
use crate::models::{Video, VideoSource};
use crate::repositories::VideoRepository;

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "mov", "avi", "flv"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub scanned: usize,
    pub recovered: usize,
    pub skipped: usize,
}

fn is_video_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| VIDEO_EXTENSIONS.iter().any(|known| known.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

pub async fn recover_videos(
    videos: &VideoRepository,
    video_dir: &Path,
) -> AppResult<RecoveryReport> {
    let video_dir = tokio::fs::canonicalize(video_dir).await.map_err(|e| {
        AppError::configuration(format!("video directory {}: {}", video_dir.display(), e))
    })?;
    let known = videos.known_paths().await?;
    let mut report = RecoveryReport::default();

    let mut entries = tokio::fs::read_dir(&video_dir)
        .await
        .map_err(|e| AppError::internal(format!("reading {}: {}", video_dir.display(), e)))?;

    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| AppError::internal(format!("reading {}: {}", video_dir.display(), e)))?
    {
        let path = entry.path();
        if !is_video_file(&path) {
            continue;
        }
        let metadata = match entry.metadata().await {
            Ok(m) if m.is_file() => m,
            Ok(_) => continue,
            Err(e) => {
                warn!("Skipping {}: {}", path.display(), e);
                continue;
            }
        };
        report.scanned += 1;

        let file_path = path.to_string_lossy().into_owned();
        if known.contains(&file_path) {
            debug!("Already registered: {}", file_path);
            report.skipped += 1;
            continue;
        }

        let title = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| file_path.clone());
        let video = Video {
            id: Uuid::new_v4(),
            title,
            file_path,
            file_size: i64::try_from(metadata.len()).unwrap_or(i64::MAX),
            source: VideoSource::Recovered,
            created_at: Utc::now(),
        };
        videos.insert(&video).await?;
        info!("Recovered video '{}' from {}", video.title, video.file_path);
        report.recovered += 1;
    }

    info!(
        "Video recovery finished: scanned={} recovered={} skipped={}",
        report.scanned, report.recovered, report.skipped
    );
    Ok(report)
}
