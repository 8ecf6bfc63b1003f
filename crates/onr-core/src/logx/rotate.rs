//! Size/day rotating access-log writer.
//!
//! A `write` checks, under the internal lock, whether the local day changed
//! since the active file opened or whether the incoming bytes would exceed
//! the size limit; if so it renames the active file to
//! `<base>.<YYYYMMDD-HHMMSS.nnnnnnnnn>`, optionally gzips the archive, then
//! reopens a fresh active file and prunes old archives. A line is never
//! split across files. The time source is injectable for tests.

use chrono::{DateTime, Local};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const ARCHIVE_TIME_FORMAT: &str = "%Y%m%d-%H%M%S.%9f";

pub type Clock = Box<dyn Fn() -> DateTime<Local> + Send + Sync>;

pub struct AccessLogRotateOptions {
    pub path: String,
    pub max_size_mb: u64,
    pub max_backups: usize,
    pub max_age_days: i64,
    pub compress: bool,
    /// Injectable time source; `None` uses `Local::now`.
    pub now: Option<Clock>,
}

struct Inner {
    file: Option<File>,
    current_size: u64,
    current_day: String,
    closed: bool,
}

pub struct AccessRotateWriter {
    path: PathBuf,
    dir: PathBuf,
    base: String,
    max_size_bytes: u64,
    max_backups: usize,
    max_age_days: i64,
    compress: bool,
    now: Clock,
    inner: Mutex<Inner>,
}

struct ArchiveFile {
    path: PathBuf,
    when: DateTime<Local>,
}

impl AccessRotateWriter {
    pub fn new(opts: AccessLogRotateOptions) -> io::Result<Self> {
        let path_str = opts.path.trim();
        if path_str.is_empty() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "access log rotate path is empty"));
        }
        if opts.max_size_mb == 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "max_size_mb must be > 0"));
        }
        if opts.max_backups == 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "max_backups must be > 0"));
        }
        if opts.max_age_days < 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "max_age_days must be >= 0"));
        }

        let path = PathBuf::from(path_str);
        let dir = path.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."));
        if dir != Path::new(".") {
            std::fs::create_dir_all(&dir)?;
        }
        let base = path
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "invalid log path"))?;

        let now: Clock = opts.now.unwrap_or_else(|| Box::new(Local::now));
        let (file, size) = open_active_log_file(&path)?;
        let current_day = day_key(&now());

        Ok(Self {
            path,
            dir,
            base,
            max_size_bytes: opts.max_size_mb * 1024 * 1024,
            max_backups: opts.max_backups,
            max_age_days: opts.max_age_days,
            compress: opts.compress,
            now,
            inner: Mutex::new(Inner { file: Some(file), current_size: size, current_day, closed: false }),
        })
    }

    /// Write one buffer. Rotation, when needed, happens before the write so
    /// the buffer lands whole in exactly one file.
    pub fn write(&self, p: &[u8]) -> io::Result<usize> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.closed {
            return Err(io::Error::new(io::ErrorKind::Other, "writer is closed"));
        }
        self.rotate_if_needed_locked(&mut inner, p.len())?;
        let Some(file) = inner.file.as_mut() else {
            return Err(io::Error::new(io::ErrorKind::Other, "access log writer is not initialized"));
        };
        let n = file.write(p)?;
        inner.current_size += n as u64;
        Ok(n)
    }

    pub fn close(&self) -> io::Result<()> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.closed {
            return Ok(());
        }
        inner.closed = true;
        inner.file = None;
        Ok(())
    }

    fn rotate_if_needed_locked(&self, inner: &mut Inner, incoming: usize) -> io::Result<()> {
        let now = (self.now)();
        let need_day = day_key(&now) != inner.current_day;
        let need_size =
            inner.current_size > 0 && inner.current_size + incoming as u64 > self.max_size_bytes;
        if !need_day && !need_size {
            return Ok(());
        }
        self.rotate_locked(inner, now)
    }

    fn rotate_locked(&self, inner: &mut Inner, now: DateTime<Local>) -> io::Result<()> {
        inner.file = None;

        let archive_path = self
            .dir
            .join(format!("{}.{}", self.base, now.format(ARCHIVE_TIME_FORMAT)));
        let mut renamed = false;
        match std::fs::rename(&self.path, &archive_path) {
            Ok(()) => renamed = true,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                self.reopen_active_locked(inner, now)?;
                return Err(e);
            }
        }

        if renamed && self.compress {
            compress_archive_file(&archive_path)?;
        }

        self.reopen_active_locked(inner, now)?;
        let _ = self.cleanup_archives_locked(now);
        Ok(())
    }

    fn reopen_active_locked(&self, inner: &mut Inner, now: DateTime<Local>) -> io::Result<()> {
        let (file, size) = open_active_log_file(&self.path)?;
        inner.file = Some(file);
        inner.current_size = size;
        inner.current_day = day_key(&now);
        Ok(())
    }

    fn cleanup_archives_locked(&self, now: DateTime<Local>) -> io::Result<()> {
        let files = self.list_archive_files()?;
        if files.is_empty() {
            return Ok(());
        }

        let mut to_delete: Vec<&PathBuf> = files.iter().skip(self.max_backups).map(|f| &f.path).collect();
        if self.max_age_days > 0 {
            let cutoff = now - chrono::Duration::days(self.max_age_days);
            for f in &files {
                if f.when < cutoff && !to_delete.contains(&&f.path) {
                    to_delete.push(&f.path);
                }
            }
        }
        for p in to_delete {
            let _ = std::fs::remove_file(p);
        }
        Ok(())
    }

    /// Archives sorted newest first.
    fn list_archive_files(&self) -> io::Result<Vec<ArchiveFile>> {
        let prefix = format!("{}.", self.base);
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            if entry.path().is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(ts) = name.strip_prefix(&prefix) else {
                continue;
            };
            let ts = ts.strip_suffix(".gz").unwrap_or(ts);
            let Ok(naive) = chrono::NaiveDateTime::parse_from_str(ts, ARCHIVE_TIME_FORMAT) else {
                continue;
            };
            let Some(when) = naive.and_local_timezone(Local).single() else {
                continue;
            };
            files.push(ArchiveFile { path: entry.path(), when });
        }
        files.sort_by(|a, b| b.when.cmp(&a.when));
        Ok(files)
    }
}

fn open_active_log_file(path: &Path) -> io::Result<(File, u64)> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let size = file.metadata()?.len();
    Ok((file, size))
}

fn compress_archive_file(path: &Path) -> io::Result<()> {
    let tmp = PathBuf::from(format!("{}.gz.tmp", path.display()));
    {
        let mut src = File::open(path)?;
        let dst = File::create(&tmp)?;
        let mut gz = GzEncoder::new(dst, Compression::default());
        if let Err(e) = io::copy(&mut src, &mut gz).and_then(|_| gz.finish().map(|_| ())) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e);
        }
    }
    let final_path = PathBuf::from(format!("{}.gz", path.display()));
    if let Err(e) = std::fs::rename(&tmp, &final_path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e);
    }
    std::fs::remove_file(path)
}

fn day_key(ts: &DateTime<Local>) -> String {
    ts.format("%Y%m%d").to_string()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Arc;

    fn fixed_clock(epochs: Arc<AtomicI64>) -> Clock {
        Box::new(move || {
            Local
                .timestamp_millis_opt(epochs.load(Ordering::SeqCst))
                .single()
                .unwrap()
        })
    }

    fn list_files(dir: &Path) -> Vec<String> {
        let mut out: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        out.sort();
        out
    }

    #[test]
    fn test_size_rotation_never_splits_a_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("access.log");
        let clock_ms = Arc::new(AtomicI64::new(
            Local.with_ymd_and_hms(2026, 2, 1, 10, 0, 0).unwrap().timestamp_millis(),
        ));
        let w = AccessRotateWriter::new(AccessLogRotateOptions {
            path: path.to_string_lossy().into_owned(),
            max_size_mb: 1,
            max_backups: 5,
            max_age_days: 0,
            compress: false,
            now: Some(fixed_clock(clock_ms.clone())),
        })
        .unwrap();

        // fill just under the limit, then force a rotation with one line
        let big = vec![b'x'; 1024 * 1024 - 10];
        w.write(&big).unwrap();
        clock_ms.fetch_add(1500, Ordering::SeqCst);
        w.write(b"line-after-rotation\n").unwrap();

        let active = std::fs::read(&path).unwrap();
        assert_eq!(active, b"line-after-rotation\n");
        let files = list_files(dir.path());
        assert_eq!(files.len(), 2, "one active + one archive: {files:?}");
    }

    #[test]
    fn test_day_rotation_at_local_midnight() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("access.log");
        let clock_ms = Arc::new(AtomicI64::new(
            Local
                .with_ymd_and_hms(2026, 2, 1, 23, 59, 59)
                .unwrap()
                .timestamp_millis()
                + 999,
        ));
        let w = AccessRotateWriter::new(AccessLogRotateOptions {
            path: path.to_string_lossy().into_owned(),
            max_size_mb: 100,
            max_backups: 5,
            max_age_days: 0,
            compress: false,
            now: Some(fixed_clock(clock_ms.clone())),
        })
        .unwrap();

        w.write(b"L1\n").unwrap();
        // cross the local-day boundary
        clock_ms.store(
            Local.with_ymd_and_hms(2026, 2, 2, 0, 0, 0).unwrap().timestamp_millis() + 1,
            Ordering::SeqCst,
        );
        w.write(b"L2\n").unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"L2\n");
        let archives: Vec<String> = list_files(dir.path())
            .into_iter()
            .filter(|f| f.starts_with("access.log.20260201-"))
            .collect();
        assert_eq!(archives.len(), 1, "expected one archive: {archives:?}");
        let archived = std::fs::read(dir.path().join(&archives[0])).unwrap();
        assert_eq!(archived, b"L1\n");
    }

    #[test]
    fn test_max_backups_prunes_old_archives() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("access.log");
        let clock_ms = Arc::new(AtomicI64::new(
            Local.with_ymd_and_hms(2026, 2, 1, 10, 0, 0).unwrap().timestamp_millis(),
        ));
        let w = AccessRotateWriter::new(AccessLogRotateOptions {
            path: path.to_string_lossy().into_owned(),
            max_size_mb: 1,
            max_backups: 2,
            max_age_days: 0,
            compress: false,
            now: Some(fixed_clock(clock_ms.clone())),
        })
        .unwrap();

        let big = vec![b'y'; 700 * 1024];
        for _ in 0..5 {
            w.write(&big).unwrap();
            clock_ms.fetch_add(1100, Ordering::SeqCst);
            w.write(&big).unwrap(); // triggers size rotation
            clock_ms.fetch_add(1100, Ordering::SeqCst);
        }
        let archives: Vec<String> = list_files(dir.path())
            .into_iter()
            .filter(|f| f != "access.log")
            .collect();
        assert!(archives.len() <= 2, "max_backups=2 violated: {archives:?}");
    }

    #[test]
    fn test_compress_renames_to_gz() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("access.log");
        let clock_ms = Arc::new(AtomicI64::new(
            Local.with_ymd_and_hms(2026, 2, 1, 10, 0, 0).unwrap().timestamp_millis(),
        ));
        let w = AccessRotateWriter::new(AccessLogRotateOptions {
            path: path.to_string_lossy().into_owned(),
            max_size_mb: 1,
            max_backups: 5,
            max_age_days: 0,
            compress: true,
            now: Some(fixed_clock(clock_ms.clone())),
        })
        .unwrap();

        w.write(&vec![b'z'; 1024 * 1024]).unwrap();
        clock_ms.fetch_add(1100, Ordering::SeqCst);
        w.write(b"next\n").unwrap();

        let files = list_files(dir.path());
        assert!(files.iter().any(|f| f.ends_with(".gz")), "{files:?}");
        assert!(!files.iter().any(|f| f.ends_with(".tmp")), "{files:?}");
    }

    #[test]
    fn test_write_after_close_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("access.log");
        let w = AccessRotateWriter::new(AccessLogRotateOptions {
            path: path.to_string_lossy().into_owned(),
            max_size_mb: 1,
            max_backups: 1,
            max_age_days: 0,
            compress: false,
            now: None,
        })
        .unwrap();
        w.close().unwrap();
        assert!(w.write(b"x").is_err());
    }

    #[test]
    fn test_rejects_bad_options() {
        let opts = |path: String, size, backups| AccessLogRotateOptions {
            path,
            max_size_mb: size,
            max_backups: backups,
            max_age_days: 0,
            compress: false,
            now: None,
        };
        assert!(AccessRotateWriter::new(opts(String::new(), 1, 1)).is_err());
        assert!(AccessRotateWriter::new(opts("/tmp/x.log".to_string(), 0, 1)).is_err());
        assert!(AccessRotateWriter::new(opts("/tmp/x.log".to_string(), 1, 0)).is_err());
    }
}
