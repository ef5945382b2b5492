//! External document-analysis process: spawn, capture output, enforce a wall-clock limit.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    pub program: String,
    pub script: Option<String>,
    pub working_dir: PathBuf,
    pub timeout: Duration,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            program: "python3".to_string(),
            script: Some("run_analysis_background.py".to_string()),
            working_dir: PathBuf::from(".."),
            timeout: Duration::from_secs(600),
        }
    }
}

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("no startup ids provided")]
    NoStartups,
    #[error("failed to start analysis process: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("failed waiting for analysis process: {0}")]
    Wait(#[source] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRun {
    pub startup_ids: Vec<String>,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

impl AnalysisRun {
    /// Timeout counts as failure, same as a non-zero exit.
    pub fn succeeded(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

async fn drain<R: AsyncRead + Unpin>(reader: Option<R>) -> String {
    let Some(mut reader) = reader else {
        return String::new();
    };
    let mut buf = Vec::new();
    if let Err(err) = reader.read_to_end(&mut buf).await {
        warn!(error = %err, "reading analysis output failed");
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// How long output readers may linger after the process exits or is killed. A
/// grandchild that inherited the pipes can keep them open indefinitely.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

async fn collect_output(mut task: JoinHandle<String>, stream: &'static str) -> String {
    match timeout(DRAIN_GRACE, &mut task).await {
        Ok(joined) => joined.unwrap_or_default(),
        Err(_) => {
            task.abort();
            warn!(stream, "analysis output still open after exit; abandoning reader");
            String::new()
        }
    }
}

/// Runs `program [script] <ids...>` in `working_dir`.
pub async fn run_analysis(
    config: &AnalysisConfig,
    startup_ids: &[String],
) -> Result<AnalysisRun, AnalysisError> {
    if startup_ids.is_empty() {
        return Err(AnalysisError::NoStartups);
    }

    let mut command = Command::new(&config.program);
    if let Some(script) = &config.script {
        command.arg(script);
    }
    command
        .args(startup_ids)
        .current_dir(&config.working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let started = Instant::now();
    let mut child = command.spawn().map_err(AnalysisError::Spawn)?;
    info!(program = %config.program, startups = startup_ids.len(), "analysis process started");

    let stdout_task = tokio::spawn(drain(child.stdout.take()));
    let stderr_task = tokio::spawn(drain(child.stderr.take()));

    let (exit_code, timed_out) = match timeout(config.timeout, child.wait()).await {
        Ok(status) => (status.map_err(AnalysisError::Wait)?.code(), false),
        Err(_) => {
            warn!(timeout_secs = config.timeout.as_secs(), "analysis process timed out; killing");
            let _ = child.start_kill();
            let _ = timeout(Duration::from_secs(5), child.wait()).await;
            (None, true)
        }
    };

    let (stdout, stderr) = tokio::join!(
        collect_output(stdout_task, "stdout"),
        collect_output(stderr_task, "stderr"),
    );
    let run = AnalysisRun {
        startup_ids: startup_ids.to_vec(),
        exit_code,
        timed_out,
        stdout,
        stderr,
        duration_ms: started.elapsed().as_millis() as u64,
    };
    if run.succeeded() {
        info!(duration_ms = run.duration_ms, "analysis process finished");
    } else {
        warn!(exit_code = ?run.exit_code, timed_out, "analysis process failed");
    }
    Ok(run)
}
