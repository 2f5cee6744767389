//! ClamAV command-line scanner adapter.

use async_trait::async_trait;
use backup_engine::{MalwareScanner, ScanOutcome};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub struct ClamScanner {
    binary: PathBuf,
    timeout: Duration,
}

impl ClamScanner {
    pub fn new(binary: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }
}

#[async_trait]
impl MalwareScanner for ClamScanner {
    async fn scan_file(&self, path: &Path) -> ScanOutcome {
        let mut command = tokio::process::Command::new(&self.binary);
        command.arg("--no-summary").arg(path).kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Err(_) => {
                tracing::warn!("[ClamAV] Scan of {} timed out", path.display());
                return ScanOutcome::failed(format!(
                    "scan timed out after {}s",
                    self.timeout.as_secs()
                ));
            }
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("[ClamAV] {} not installed, skipping scan", self.binary.display());
                return ScanOutcome::skipped();
            }
            Ok(Err(e)) => return ScanOutcome::failed(e.to_string()),
            Ok(Ok(output)) => output,
        };

        interpret(
            output.status.code(),
            &String::from_utf8_lossy(&output.stdout),
            &String::from_utf8_lossy(&output.stderr),
        )
    }
}

/// Map clamscan's exit code and output to an outcome
pub fn interpret(code: Option<i32>, stdout: &str, stderr: &str) -> ScanOutcome {
    match code {
        Some(0) => ScanOutcome::clean(),
        Some(1) => ScanOutcome::infected(parse_threat(stdout).unwrap_or_else(|| "unknown".to_string())),
        Some(code) => ScanOutcome::failed(format!("clamscan exited with {}: {}", code, stderr.trim())),
        None => ScanOutcome::failed("clamscan terminated by signal"),
    }
}

/// Threat name from a `<path>: <name> FOUND` line
fn parse_threat(stdout: &str) -> Option<String> {
    stdout.lines().find_map(|line| {
        let (_, name) = line.trim().strip_suffix(" FOUND")?.rsplit_once(": ")?;
        Some(name.trim().to_string())
    })
}
