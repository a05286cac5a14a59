//! Starts, stops and reports on the bidder process for the control service
//!
//! The supervisor owns at most one child. Status also recognises a bidder
//! started outside the service, first by scanning the process table and then
//! by how recently the shared log file was written.

use crate::config::Config;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, SystemTime};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Log lines that show the bidder doing work
const ACTIVITY_MARKERS: [&str; 6] = [
    "AUTOBIDDER STARTED",
    "Scanning for new projects",
    "MATCHING PROJECT",
    "BID SUCCESS",
    "Attempting to bid",
    "Sleeping for",
];

/// Written when a stop completes; overrides the freshness heuristic
const STOPPED_MARKER: &str = "AUTOBIDDER STOPPED";

/// A log written this recently counts as running if its last line shows activity
const ACTIVE_LOG_WINDOW: Duration = Duration::from_secs(60);

/// A log written this recently counts as running regardless of content
const FRESH_LOG_WINDOW: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("Autobidder already running")]
    AlreadyRunning,
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to prepare {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessStatus {
    pub running: bool,
    pub message: String,
}

impl ProcessStatus {
    fn new(running: bool) -> Self {
        Self {
            running,
            message: if running { "Running" } else { "Stopped" }.to_string(),
        }
    }
}

pub struct ProcessSupervisor {
    program: PathBuf,
    args: Vec<String>,
    /// Executable name looked for in other processes' command lines
    process_name: String,
    log_file: PathBuf,
    stop_file: PathBuf,
    stop_timeout: Duration,
    child: Mutex<Option<Child>>,
}

impl ProcessSupervisor {
    pub fn new(program: impl Into<PathBuf>, log_file: impl Into<PathBuf>, stop_file: impl Into<PathBuf>) -> Self {
        let program = program.into();
        let process_name = program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "autobidder".to_string());

        Self {
            program,
            args: Vec::new(),
            process_name,
            log_file: log_file.into(),
            stop_file: stop_file.into(),
            stop_timeout: Duration::from_secs(5),
            child: Mutex::new(None),
        }
    }

    /// Supervise the configured bidder binary, defaulting to `autobidder` next
    /// to the running executable
    pub fn from_config(config: &Config) -> Self {
        let program = config
            .autobidder_bin
            .as_ref()
            .map(PathBuf::from)
            .or_else(|| {
                std::env::current_exe()
                    .ok()
                    .and_then(|exe| exe.parent().map(|dir| dir.join("autobidder")))
            })
            .unwrap_or_else(|| PathBuf::from("autobidder"));

        Self::new(program, &config.log_file, &config.stop_file)
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_process_name(mut self, name: impl Into<String>) -> Self {
        self.process_name = name.into();
        self
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// Launch the bidder with a fresh log
    pub async fn start(&self) -> Result<String, SupervisorError> {
        let mut slot = self.child.lock().await;
        if let Some(child) = slot.as_mut() {
            if matches!(child.try_wait(), Ok(None)) {
                return Err(SupervisorError::AlreadyRunning);
            }
        }

        tokio::fs::write(&self.log_file, "")
            .await
            .map_err(|source| SupervisorError::Io {
                path: self.log_file.display().to_string(),
                source,
            })?;

        match tokio::fs::remove_file(&self.stop_file).await {
            Ok(()) => info!("[Supervisor] Removed stale stop file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(SupervisorError::Io {
                    path: self.stop_file.display().to_string(),
                    source,
                })
            }
        }

        let child = Command::new(&self.program)
            .args(&self.args)
            .env("LOG_FILE", &self.log_file)
            .env("STOP_FILE", &self.stop_file)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| SupervisorError::Spawn {
                program: self.program.display().to_string(),
                source,
            })?;

        info!("[Supervisor] Started {} (pid {:?})", self.program.display(), child.id());
        *slot = Some(child);
        Ok("Autobidder started".to_string())
    }

    /// Ask any running bidder to stop via the stop file; kill our own child if
    /// it has not exited within the timeout
    pub async fn stop(&self) -> String {
        if let Err(e) = tokio::fs::write(&self.stop_file, "stop").await {
            warn!("[Supervisor] Could not write stop file {}: {}", self.stop_file.display(), e);
        }

        let mut slot = self.child.lock().await;
        if let Some(mut child) = slot.take() {
            match tokio::time::timeout(self.stop_timeout, child.wait()).await {
                Ok(Ok(status)) => info!("[Supervisor] Bidder exited with {}", status),
                Ok(Err(e)) => warn!("[Supervisor] Wait failed: {}", e),
                Err(_) => {
                    warn!("[Supervisor] Bidder did not stop in {:?}, killing", self.stop_timeout);
                    if let Err(e) = child.kill().await {
                        warn!("[Supervisor] Kill failed: {}", e);
                    }
                }
            }
        }

        self.append_log_line(&format!("{} via API", STOPPED_MARKER)).await;
        "Autobidder stopped".to_string()
    }

    pub async fn status(&self) -> ProcessStatus {
        {
            let mut slot = self.child.lock().await;
            if let Some(child) = slot.as_mut() {
                if matches!(child.try_wait(), Ok(None)) {
                    return ProcessStatus::new(true);
                }
                *slot = None;
            }
        }

        if find_process(&self.process_name).is_some() {
            return ProcessStatus::new(true);
        }

        ProcessStatus::new(self.log_activity().await)
    }

    /// Last `n` lines of the log; empty if there is no log yet
    pub async fn tail_logs(&self, n: usize) -> Vec<String> {
        match tokio::fs::read_to_string(&self.log_file).await {
            Ok(contents) => tail_lines(&contents, n),
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("[Supervisor] Error reading logs: {}", e);
                }
                Vec::new()
            }
        }
    }

    async fn log_activity(&self) -> bool {
        let Ok(metadata) = tokio::fs::metadata(&self.log_file).await else {
            return false;
        };
        let age = metadata
            .modified()
            .ok()
            .and_then(|m| SystemTime::now().duration_since(m).ok())
            .unwrap_or(Duration::ZERO);

        if age >= ACTIVE_LOG_WINDOW {
            return false;
        }
        let last = self.tail_logs(1).await;
        log_suggests_running(age, last.first().map(String::as_str))
    }

    async fn append_log_line(&self, message: &str) {
        use tokio::io::AsyncWriteExt;

        let line = format!("{} | {}\n", chrono::Local::now().format("%Y-%m-%d %H:%M:%S"), message);
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_file)
            .await;
        match file {
            Ok(mut file) => {
                if let Err(e) = file.write_all(line.as_bytes()).await {
                    warn!("[Supervisor] Could not append to log: {}", e);
                }
            }
            Err(e) => warn!("[Supervisor] Could not open log: {}", e),
        }
    }
}

/// Freshness heuristic over the log's age and last line
pub fn log_suggests_running(age: Duration, last_line: Option<&str>) -> bool {
    if age >= ACTIVE_LOG_WINDOW {
        return false;
    }
    let last_line = last_line.unwrap_or("");
    if last_line.contains(STOPPED_MARKER) {
        return false;
    }
    ACTIVITY_MARKERS.iter().any(|m| last_line.contains(m)) || age < FRESH_LOG_WINDOW
}

fn tail_lines(contents: &str, n: usize) -> Vec<String> {
    let lines: Vec<&str> = contents.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].iter().map(|l| l.trim_end().to_string()).collect()
}

/// Pid of another process whose executable name is `name` (Linux only)
fn find_process(name: &str) -> Option<u32> {
    let own_pid = std::process::id();
    let entries = std::fs::read_dir("/proc").ok()?;

    entries.flatten().find_map(|entry| {
        let pid: u32 = entry.file_name().to_str()?.parse().ok()?;
        if pid == own_pid {
            return None;
        }
        let cmdline = std::fs::read(entry.path().join("cmdline")).ok()?;
        cmdline_runs(&cmdline, name).then_some(pid)
    })
}

/// Whether a NUL-separated command line runs an executable called `name`
fn cmdline_runs(cmdline: &[u8], name: &str) -> bool {
    cmdline
        .split(|b| *b == 0)
        .next()
        .map(|argv0| String::from_utf8_lossy(argv0).into_owned())
        .map(|argv0| {
            Path::new(&argv0)
                .file_name()
                .map(|f| f.to_string_lossy() == name)
                .unwrap_or(false)
        })
        .unwrap_or(false)
}
