use crate::config::StorageConfig;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::fs;
use tracing::{debug, error, info, warn};

/// Timestamp format embedded in media file names
pub const FILE_DATE_FORMAT: &str = "%Y%m%d_%H_%M_%S";

/// Kind of media the bot produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Photo,
    Video,
}

impl MediaKind {
    pub const ALL: [MediaKind; 2] = [MediaKind::Photo, MediaKind::Video];

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Photo => "jpg",
            Self::Video => "mp4",
        }
    }

    /// Marker appended to the timestamp in file names
    fn name_suffix(&self) -> &'static str {
        match self {
            Self::Photo => "",
            Self::Video => "_now",
        }
    }

    pub fn matches(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case(self.extension()))
            .unwrap_or(false)
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Photo => write!(f, "photo"),
            Self::Video => write!(f, "video"),
        }
    }
}

/// A captured file on disk
#[derive(Debug, Clone, Serialize)]
pub struct MediaFile {
    pub path: PathBuf,
    pub kind: MediaKind,
    pub size: u64,
    pub created: SystemTime,
    pub modified: SystemTime,
}

impl MediaFile {
    async fn from_path(path: PathBuf, kind: MediaKind) -> io::Result<Self> {
        let metadata = fs::metadata(&path).await?;
        if !metadata.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a regular file", path.display()),
            ));
        }

        let modified = metadata.modified().unwrap_or(UNIX_EPOCH);
        // Birth time is not reported by every filesystem
        let created = metadata.created().unwrap_or(modified);

        Ok(Self {
            path,
            kind,
            size: metadata.len(),
            created,
            modified,
        })
    }

    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    pub fn created_display(&self) -> String {
        DateTime::<Local>::from(self.created)
            .format(FILE_DATE_FORMAT)
            .to_string()
    }

    pub fn modified_display(&self) -> String {
        DateTime::<Local>::from(self.modified)
            .format(FILE_DATE_FORMAT)
            .to_string()
    }
}

/// Newest first; equal creation times fall back to reverse natural path order,
/// so `_10` ranks above `_9`
fn recency_order(a: &MediaFile, b: &MediaFile) -> Ordering {
    b.created
        .cmp(&a.created)
        .then_with(|| natural_cmp(&b.path.to_string_lossy(), &a.path.to_string_lossy()))
}

/// Compare strings with runs of ASCII digits compared by numeric value
fn natural_cmp(a: &str, b: &str) -> Ordering {
    let (mut a, mut b) = (a, b);
    loop {
        match (a.chars().next(), b.chars().next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) if x.is_ascii_digit() && y.is_ascii_digit() => {
                let (digits_a, rest_a) = split_digits(a);
                let (digits_b, rest_b) = split_digits(b);
                let value_a = digits_a.trim_start_matches('0');
                let value_b = digits_b.trim_start_matches('0');

                let ord = value_a
                    .len()
                    .cmp(&value_b.len())
                    .then_with(|| value_a.cmp(value_b))
                    .then_with(|| digits_a.len().cmp(&digits_b.len()));
                if ord != Ordering::Equal {
                    return ord;
                }
                a = rest_a;
                b = rest_b;
            }
            (Some(x), Some(y)) => {
                if x != y {
                    return x.cmp(&y);
                }
                a = &a[x.len_utf8()..];
                b = &b[y.len_utf8()..];
            }
        }
    }
}

fn split_digits(s: &str) -> (&str, &str) {
    let end = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    s.split_at(end)
}

/// Outcome of a retention pass
#[derive(Debug, Clone, Default)]
pub struct CleanupResult {
    pub files_deleted: usize,
    pub bytes_freed: u64,
    pub errors: Vec<String>,
    pub duration: Duration,
}

impl CleanupResult {
    fn merge(&mut self, other: CleanupResult) {
        self.files_deleted += other.files_deleted;
        self.bytes_freed += other.bytes_freed;
        self.errors.extend(other.errors);
        self.duration += other.duration;
    }
}

/// All files of `kind` in `directory`, most recently created first.
///
/// A missing directory yields an empty list.
pub async fn list_by_recency(directory: &Path, kind: MediaKind) -> io::Result<Vec<MediaFile>> {
    let mut entries = match fs::read_dir(directory).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!("Media directory {} does not exist", directory.display());
            return Ok(Vec::new());
        }
        Err(e) => return Err(e),
    };

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !kind.matches(&path) {
            continue;
        }

        match MediaFile::from_path(path, kind).await {
            Ok(file) => files.push(file),
            // Removed between listing and stat, or not a regular file
            Err(e) => debug!("Skipping {}: {}", entry.path().display(), e),
        }
    }

    files.sort_by(recency_order);
    Ok(files)
}

/// The `limit` most recent files of `kind`
pub async fn latest(directory: &Path, kind: MediaKind, limit: usize) -> io::Result<Vec<MediaFile>> {
    let mut files = list_by_recency(directory, kind).await?;
    files.truncate(limit);
    Ok(files)
}

/// Delete every file of `kind` beyond the `limit` most recent ones.
///
/// Individual deletion failures are logged and collected; the pass always
/// visits every candidate.
pub async fn cleanup(directory: &Path, kind: MediaKind, limit: usize) -> io::Result<CleanupResult> {
    let start_time = Instant::now();
    let files = list_by_recency(directory, kind).await?;

    let mut result = if files.len() > limit {
        debug!(
            "Found {} {} files in {}, keeping {}",
            files.len(),
            kind,
            directory.display(),
            limit
        );
        prune(&files[limit..]).await
    } else {
        CleanupResult::default()
    };

    result.duration = start_time.elapsed();
    Ok(result)
}

async fn prune(candidates: &[MediaFile]) -> CleanupResult {
    let mut result = CleanupResult::default();

    for file in candidates {
        match fs::remove_file(&file.path).await {
            Ok(()) => {
                result.files_deleted += 1;
                result.bytes_freed += file.size;
                debug!("Deleted old file: {}", file.path.display());
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("Old file already removed: {}", file.path.display());
            }
            Err(e) => {
                let error_msg = format!("Failed to delete {}: {}", file.path.display(), e);
                error!("{}", error_msg);
                result.errors.push(error_msg);
            }
        }
    }

    result
}

/// Remove the output of a capture that failed part way.
///
/// A file that was never created is fine; other failures are logged.
pub async fn discard(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => warn!("Removed incomplete file: {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!("No output left behind at {}", path.display());
        }
        Err(e) => error!("Failed to remove incomplete file {}: {}", path.display(), e),
    }
}

/// Photo and video directories with their retention limits
#[derive(Debug, Clone)]
pub struct RetentionStore {
    config: StorageConfig,
}

impl RetentionStore {
    pub fn new(config: StorageConfig) -> Self {
        Self { config }
    }

    /// Create the media directories if they do not exist
    pub async fn ensure_directories(&self) -> io::Result<()> {
        for kind in MediaKind::ALL {
            let dir = self.directory(kind);
            if !fs::try_exists(dir).await.unwrap_or(false) {
                fs::create_dir_all(dir).await?;
                info!("Created {} directory: {}", kind, dir.display());
            }
        }
        Ok(())
    }

    pub fn directory(&self, kind: MediaKind) -> &Path {
        match kind {
            MediaKind::Photo => &self.config.image_dir,
            MediaKind::Video => &self.config.video_dir,
        }
    }

    pub fn limit(&self, kind: MediaKind) -> usize {
        match kind {
            MediaKind::Photo => self.config.photo_limit,
            MediaKind::Video => self.config.video_limit,
        }
    }

    pub async fn list(&self, kind: MediaKind) -> io::Result<Vec<MediaFile>> {
        list_by_recency(self.directory(kind), kind).await
    }

    /// Most recent files, `limit` defaulting to the kind's retention limit
    pub async fn latest(&self, kind: MediaKind, limit: Option<usize>) -> io::Result<Vec<MediaFile>> {
        latest(
            self.directory(kind),
            kind,
            limit.unwrap_or_else(|| self.limit(kind)),
        )
        .await
    }

    /// Look up a file by bare name; `None` when it does not exist
    pub async fn stat(&self, kind: MediaKind, name: &str) -> io::Result<Option<MediaFile>> {
        let path = self.directory(kind).join(name);
        match MediaFile::from_path(path, kind).await {
            Ok(file) => Ok(Some(file)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn cleanup_kind(&self, kind: MediaKind) -> CleanupResult {
        match cleanup(self.directory(kind), kind, self.limit(kind)).await {
            Ok(result) => result,
            Err(e) => {
                let error_msg = format!(
                    "Failed to scan {} directory {}: {}",
                    kind,
                    self.directory(kind).display(),
                    e
                );
                error!("{}", error_msg);
                CleanupResult {
                    errors: vec![error_msg],
                    ..CleanupResult::default()
                }
            }
        }
    }

    /// Apply the retention limit to both directories. Never fails.
    pub async fn cleanup_all(&self) -> CleanupResult {
        let mut total = CleanupResult::default();
        for kind in [MediaKind::Video, MediaKind::Photo] {
            total.merge(self.cleanup_kind(kind).await);
        }

        if total.files_deleted > 0 || !total.errors.is_empty() {
            info!(
                "Cleanup completed: {} files deleted, {} bytes freed, {} errors",
                total.files_deleted,
                total.bytes_freed,
                total.errors.len()
            );
        }
        if !total.errors.is_empty() {
            warn!("Cleanup errors: {:?}", total.errors);
        }

        total
    }

    /// Fresh output path for a capture taken at `at`.
    ///
    /// Names are `YYYYMMDD_HH_MM_SS[_now].ext`; a `_N` suffix is added when a
    /// capture in the same second already produced that name.
    pub async fn new_media_path(&self, kind: MediaKind, at: DateTime<Local>) -> PathBuf {
        let dir = self.directory(kind);
        let stem = format!("{}{}", at.format(FILE_DATE_FORMAT), kind.name_suffix());

        let mut candidate = dir.join(format!("{}.{}", stem, kind.extension()));
        let mut counter = 1;
        while fs::try_exists(&candidate).await.unwrap_or(false) {
            candidate = dir.join(format!("{}_{}.{}", stem, counter, kind.extension()));
            counter += 1;
        }
        candidate
    }
}
