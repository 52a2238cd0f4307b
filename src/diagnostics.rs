// Persisted failure reports
// One text file per failure, oldest pruned past a limit

use chrono::Local;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::Result;
use crate::settings::DiagnosticsSettings;

const REPORT_PREFIX: &str = "tailwind-";
const REPORT_SUFFIX: &str = ".log";

#[derive(Debug, Clone)]
pub struct DiagnosticLog {
    directory: PathBuf,
    max_reports: usize,
    enabled: bool,
}

impl DiagnosticLog {
    pub fn new(directory: PathBuf, max_reports: usize) -> Self {
        Self {
            directory,
            max_reports: max_reports.max(1),
            enabled: true,
        }
    }

    pub fn from_settings(settings: &DiagnosticsSettings, directory: PathBuf) -> Self {
        Self {
            enabled: settings.enabled,
            ..Self::new(directory, settings.max_reports)
        }
    }

    /// A log that records nothing
    pub fn disabled() -> Self {
        Self {
            directory: PathBuf::new(),
            max_reports: 1,
            enabled: false,
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Write a report for `error`. Returns the report path, or None when
    /// the log is disabled.
    pub fn write_report(
        &self,
        context: &str,
        error: &(dyn std::error::Error + 'static),
        state: &str,
    ) -> Result<Option<PathBuf>> {
        if !self.enabled {
            return Ok(None);
        }
        fs::create_dir_all(&self.directory)?;

        let now = Local::now();
        let mut report = String::new();
        let _ = writeln!(report, "time: {}", now.to_rfc3339());
        let _ = writeln!(report, "context: {}", context);
        let _ = writeln!(report, "error: {}", error);
        let mut source = error.source();
        while let Some(cause) = source {
            let _ = writeln!(report, "caused by: {}", cause);
            source = cause.source();
        }
        let _ = writeln!(report, "state: {}", state);

        let stamp = now.format("%Y%m%d-%H%M%S%.3f").to_string();
        let mut path = self.report_path(&stamp, 0);
        let mut attempt = 1;
        while path.exists() {
            path = self.report_path(&stamp, attempt);
            attempt += 1;
        }
        fs::write(&path, report)?;

        if let Err(e) = self.prune() {
            warn!("Failed to prune diagnostic reports: {}", e);
        }
        Ok(Some(path))
    }

    fn report_path(&self, stamp: &str, attempt: u32) -> PathBuf {
        self.directory
            .join(format!("{}{}-{:03}{}", REPORT_PREFIX, stamp, attempt, REPORT_SUFFIX))
    }

    /// Report files, oldest first
    pub fn reports(&self) -> Result<Vec<PathBuf>> {
        if !self.directory.exists() {
            return Ok(Vec::new());
        }
        let mut reports: Vec<PathBuf> = fs::read_dir(&self.directory)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with(REPORT_PREFIX) && n.ends_with(REPORT_SUFFIX))
                    .unwrap_or(false)
            })
            .collect();
        reports.sort();
        Ok(reports)
    }

    fn prune(&self) -> Result<()> {
        let reports = self.reports()?;
        if reports.len() > self.max_reports {
            for old in &reports[..reports.len() - self.max_reports] {
                fs::remove_file(old)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TailwindError;

    #[test]
    fn test_report_contains_error_and_state() {
        let dir = tempfile::tempdir().unwrap();
        let log = DiagnosticLog::new(dir.path().to_path_buf(), 5);
        let err = TailwindError::Decode("bad packet".to_string());

        let path = log.write_report("read", &err, "status=Playing").unwrap().unwrap();
        let text = fs::read_to_string(path).unwrap();
        assert!(text.contains("context: read"));
        assert!(text.contains("bad packet"));
        assert!(text.contains("status=Playing"));
    }

    #[test]
    fn test_old_reports_are_pruned() {
        let dir = tempfile::tempdir().unwrap();
        let log = DiagnosticLog::new(dir.path().to_path_buf(), 3);
        let err = TailwindError::NotOpen;
        for _ in 0..6 {
            log.write_report("open", &err, "").unwrap();
        }
        assert_eq!(log.reports().unwrap().len(), 3);
    }

    #[test]
    fn test_disabled_log_writes_nothing() {
        let log = DiagnosticLog::disabled();
        let err = TailwindError::NotOpen;
        assert_eq!(log.write_report("open", &err, "").unwrap(), None);
    }
}
