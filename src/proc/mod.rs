//! Background process registry.
//!
//! Owns every detached command the dispatcher launches: an auto-incrementing
//! id maps to the captured output, status, and timestamps of one child
//! process. The registry's lifetime is independent of conversation turns —
//! clearing chat history never touches it, and a running child keeps
//! accumulating output after its owning turn is abandoned.
//!
//! All failures here degrade to text: a spawn error resolves the record (or
//! the foreground call) with the error message, and polling an id that was
//! never issued returns a descriptive line, not a fault.

use std::fmt::Write as _;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

use crate::util::unix_now_secs;

/// One detached command and everything captured from it so far.
#[derive(Debug)]
pub struct BackgroundProcess {
    pub id: u64,
    pub command: String,
    pub explanation: String,
    /// Append-only; mutated solely by the owning child's reader task.
    pub stdout: String,
    pub stderr: String,
    pub is_running: bool,
    pub exit_code: Option<i32>,
    pub started_unix_secs: u64,
    pub ended_unix_secs: Option<u64>,
}

type ProcessHandle = Arc<Mutex<BackgroundProcess>>;

/// Registry of background processes, keyed by monotonically assigned id.
///
/// Ids start at 1 and are never reused within the registry's lifetime.
pub struct ProcessRegistry {
    shell: String,
    next_id: AtomicU64,
    entries: Mutex<FxHashMap<u64, ProcessHandle>>,
}

impl ProcessRegistry {
    #[must_use]
    pub fn new(shell: &str) -> Self {
        Self {
            shell: shell.to_string(),
            next_id: AtomicU64::new(1),
            entries: Mutex::new(FxHashMap::default()),
        }
    }

    /// Launch `command` detached and return its id immediately.
    ///
    /// Output streams are wired to append into the record as they produce
    /// data; completion records the exit code and end time. Never blocks on
    /// the child.
    pub fn start(&self, command: &str, explanation: &str) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let handle: ProcessHandle = Arc::new(Mutex::new(BackgroundProcess {
            id,
            command: command.to_string(),
            explanation: explanation.to_string(),
            stdout: String::new(),
            stderr: String::new(),
            is_running: true,
            exit_code: None,
            started_unix_secs: unix_now_secs(),
            ended_unix_secs: None,
        }));
        self.entries.lock().insert(id, Arc::clone(&handle));

        let spawned = Command::new(&self.shell)
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn();

        match spawned {
            Ok(mut child) => {
                let stdout = child.stdout.take();
                let stderr = child.stderr.take();
                let task_handle = Arc::clone(&handle);
                tokio::spawn(async move {
                    let out_handle = Arc::clone(&task_handle);
                    let err_handle = Arc::clone(&task_handle);
                    tokio::join!(
                        drain_into(stdout, move |text| {
                            out_handle.lock().stdout.push_str(text);
                        }),
                        drain_into(stderr, move |text| {
                            err_handle.lock().stderr.push_str(text);
                        }),
                    );
                    let status = child.wait().await;
                    let mut record = task_handle.lock();
                    record.is_running = false;
                    record.ended_unix_secs = Some(unix_now_secs());
                    match status {
                        Ok(status) => record.exit_code = status.code(),
                        Err(err) => {
                            let _ = writeln!(record.stderr, "wait failed: {err}");
                        }
                    }
                });
            }
            Err(err) => {
                let mut record = handle.lock();
                record.is_running = false;
                record.ended_unix_secs = Some(unix_now_secs());
                record.stderr = format!("failed to spawn '{}': {err}", self.shell);
            }
        }

        id
    }

    /// Formatted snapshot of one background process, or a descriptive
    /// not-found line for an id that was never issued.
    #[must_use]
    pub fn poll(&self, id: u64) -> String {
        let Some(handle) = self.entries.lock().get(&id).map(Arc::clone) else {
            return format!("No background terminal with id {id}.");
        };
        let record = handle.lock();
        let mut out = String::with_capacity(64 + record.stdout.len() + record.stderr.len());
        if record.is_running {
            let elapsed = unix_now_secs().saturating_sub(record.started_unix_secs);
            let _ = writeln!(
                out,
                "Terminal {id}: running for {elapsed}s\ncommand: {}",
                record.command
            );
        } else {
            let _ = writeln!(
                out,
                "Terminal {id}: completed with exit code {}\ncommand: {}",
                record
                    .exit_code
                    .map_or_else(|| "unknown".to_string(), |code| code.to_string()),
                record.command
            );
        }
        if record.stdout.is_empty() && record.stderr.is_empty() {
            out.push_str("(no output yet)");
            return out;
        }
        if !record.stdout.is_empty() {
            out.push_str(&record.stdout);
        }
        if !record.stderr.is_empty() {
            if !record.stdout.is_empty() {
                out.push_str("\n--- stderr ---\n");
            }
            out.push_str(&record.stderr);
        }
        out
    }

    /// Run `command` in the foreground and return its combined output once
    /// it exits. No registry entry is created.
    pub async fn run_foreground(&self, command: &str) -> String {
        let output = Command::new(&self.shell)
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .output()
            .await;

        let output = match output {
            Ok(output) => output,
            Err(err) => return format!("failed to spawn '{}': {err}", self.shell),
        };

        let mut combined = String::new();
        combined.push_str(&String::from_utf8_lossy(&output.stdout));
        if !output.stderr.is_empty() {
            if !combined.is_empty() {
                combined.push_str("\n--- stderr ---\n");
            }
            combined.push_str(&String::from_utf8_lossy(&output.stderr));
        }
        if combined.is_empty() {
            combined.push_str("(no output)");
        }
        if !output.status.success() {
            let _ = write!(
                combined,
                "\nExit code: {}",
                output
                    .status
                    .code()
                    .map_or_else(|| "unknown".to_string(), |code| code.to_string())
            );
        }
        combined
    }

    /// Drop a completed record. Returns false for unknown ids and for
    /// processes that are still running (those stay queryable).
    pub fn dispose(&self, id: u64) -> bool {
        let mut entries = self.entries.lock();
        let Some(handle) = entries.get(&id) else {
            return false;
        };
        if handle.lock().is_running {
            return false;
        }
        entries.remove(&id);
        true
    }

    /// One-line summaries of every tracked process, ordered by id.
    #[must_use]
    pub fn list(&self) -> Vec<String> {
        let entries = self.entries.lock();
        let mut ids: Vec<u64> = entries.keys().copied().collect();
        ids.sort_unstable();
        ids.into_iter()
            .map(|id| {
                let record = entries[&id].lock();
                let state = if record.is_running {
                    "running".to_string()
                } else {
                    format!(
                        "exit {}",
                        record
                            .exit_code
                            .map_or_else(|| "?".to_string(), |code| code.to_string())
                    )
                };
                format!("{id}: [{state}] {}", record.command)
            })
            .collect()
    }
}

async fn drain_into<F>(source: Option<impl tokio::io::AsyncRead + Unpin>, mut append: F)
where
    F: FnMut(&str),
{
    let Some(mut source) = source else {
        return;
    };
    let mut buf = vec![0u8; 4096];
    loop {
        match source.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => append(&String::from_utf8_lossy(&buf[..n])),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
