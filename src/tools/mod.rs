//! Tool dispatcher.
//!
//! Maps an extracted call's name through a fixed table to one of the
//! supported operations, executes it, and renders the textual result inside
//! a `<function_results>` block for re-injection into the conversation.
//!
//! Unknown names are silently ignored — no call, no error — so future or
//! misspelled tool names never abort a turn. Within one block, calls run
//! strictly sequentially in document order; a later call never starts before
//! an earlier one's result is in hand.

pub mod fs;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::fc::FunctionCall;
use crate::proc::ProcessRegistry;
use crate::util::truncate_output;

pub const RESULT_OPEN: &str = "<function_results>";
pub const RESULT_CLOSE: &str = "</function_results>";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ToolOp {
    RunInTerminal,
    GetTerminalOutput,
    ListDir,
    FileSearch,
    GrepSearch,
    ReadFile,
    CreateFile,
    ReplaceStringInFile,
}

fn lookup(name: &str) -> Option<ToolOp> {
    match name {
        "run_in_terminal" => Some(ToolOp::RunInTerminal),
        "get_terminal_output" => Some(ToolOp::GetTerminalOutput),
        "list_dir" => Some(ToolOp::ListDir),
        "file_search" => Some(ToolOp::FileSearch),
        "grep_search" => Some(ToolOp::GrepSearch),
        "read_file" => Some(ToolOp::ReadFile),
        "create_file" => Some(ToolOp::CreateFile),
        "replace_string_in_file" => Some(ToolOp::ReplaceStringInFile),
        _ => None,
    }
}

/// Executes extracted invocations against the registry and the filesystem.
pub struct Dispatcher {
    registry: Arc<ProcessRegistry>,
    root: PathBuf,
    max_output_bytes: usize,
}

impl Dispatcher {
    #[must_use]
    pub fn new(registry: Arc<ProcessRegistry>, root: PathBuf, max_output_bytes: usize) -> Self {
        Self {
            registry,
            root,
            max_output_bytes,
        }
    }

    /// Execute every recognized call in document order and concatenate the
    /// wrapped result blocks. Returns an empty string when nothing in the
    /// block was recognized.
    pub async fn dispatch_block(&self, calls: &[FunctionCall]) -> String {
        let mut out = String::new();
        for call in calls {
            if let Some(result) = self.dispatch(call).await {
                out.push_str(RESULT_OPEN);
                out.push('\n');
                out.push_str(&truncate_output(&result, self.max_output_bytes));
                if !out.ends_with('\n') {
                    out.push('\n');
                }
                out.push_str(RESULT_CLOSE);
                out.push('\n');
            }
        }
        out
    }

    /// Execute one call; `None` means the name was not in the table.
    pub async fn dispatch(&self, call: &FunctionCall) -> Option<String> {
        let op = lookup(&call.name)?;
        tracing::debug!(tool = %call.name, "dispatching");
        let result = match op {
            ToolOp::RunInTerminal => self.run_in_terminal(call).await,
            ToolOp::GetTerminalOutput => self.get_terminal_output(call),
            ToolOp::ListDir => {
                fs::list_dir(&self.resolve(call.param_or("path", ".")))
                    .unwrap_or_else(|err| err.to_string())
            }
            ToolOp::FileSearch => fs::file_search(
                &self.root,
                call.param_or("query", ""),
                call.param_usize("maxResults", 50),
            )
            .unwrap_or_else(|err| err.to_string()),
            ToolOp::GrepSearch => fs::grep_search(
                &self.root,
                call.param_or("query", ""),
                call.param_bool("isRegexp", false),
                call.parameters.get("includePattern").map(String::as_str),
                call.param_usize("maxResults", 50),
            )
            .unwrap_or_else(|err| err.to_string()),
            ToolOp::ReadFile => {
                let Some(path) = call.parameters.get("filePath") else {
                    return Some("read_file: missing 'filePath' parameter".to_string());
                };
                fs::read_file(
                    &self.resolve(path),
                    call.parameters
                        .get("startLine")
                        .and_then(|v| v.trim().parse().ok()),
                    call.parameters
                        .get("lineCount")
                        .and_then(|v| v.trim().parse().ok()),
                )
                .unwrap_or_else(|err| err.to_string())
            }
            ToolOp::CreateFile => {
                let Some(path) = call.parameters.get("filePath") else {
                    return Some("create_file: missing 'filePath' parameter".to_string());
                };
                fs::create_file(&self.resolve(path), call.param_or("content", ""))
                    .unwrap_or_else(|err| err.to_string())
            }
            ToolOp::ReplaceStringInFile => {
                let Some(path) = call.parameters.get("filePath") else {
                    return Some("replace_string_in_file: missing 'filePath' parameter".to_string());
                };
                let Some(old) = call.parameters.get("oldString") else {
                    return Some(
                        "replace_string_in_file: missing 'oldString' parameter".to_string(),
                    );
                };
                fs::replace_string_in_file(
                    &self.resolve(path),
                    old,
                    call.param_or("newString", ""),
                )
                .unwrap_or_else(|err| err.to_string())
            }
        };
        Some(result)
    }

    async fn run_in_terminal(&self, call: &FunctionCall) -> String {
        let Some(command) = call.parameters.get("command") else {
            return "run_in_terminal: missing 'command' parameter".to_string();
        };
        if call.param_bool("isBackground", false) {
            let id = self
                .registry
                .start(command, call.param_or("explanation", ""));
            format!(
                "Command started in background terminal {id}. \
                 Use get_terminal_output with id={id} to check on it."
            )
        } else {
            self.registry.run_foreground(command).await
        }
    }

    fn get_terminal_output(&self, call: &FunctionCall) -> String {
        let Some(raw_id) = call.parameters.get("id") else {
            return "get_terminal_output: missing 'id' parameter".to_string();
        };
        match raw_id.trim().parse::<u64>() {
            Ok(id) => self.registry.poll(id),
            Err(_) => format!("get_terminal_output: '{raw_id}' is not a valid terminal id"),
        }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let candidate = Path::new(path);
        if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.root.join(candidate)
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rustc_hash::FxHashMap;

    fn call(name: &str, params: &[(&str, &str)]) -> FunctionCall {
        let mut parameters = FxHashMap::default();
        for (key, value) in params {
            parameters.insert((*key).to_string(), (*value).to_string());
        }
        FunctionCall {
            name: name.to_string(),
            parameters,
        }
    }

    fn dispatcher(root: &Path) -> Dispatcher {
        Dispatcher::new(
            Arc::new(ProcessRegistry::new("/bin/sh")),
            root.to_path_buf(),
            30_000,
        )
    }

    #[tokio::test]
    async fn unknown_tool_is_silently_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = dispatcher(dir.path());
        assert!(dispatcher.dispatch(&call("make_coffee", &[])).await.is_none());
        let block = dispatcher.dispatch_block(&[call("make_coffee", &[])]).await;
        assert!(block.is_empty());
    }

    #[tokio::test]
    async fn run_in_terminal_foreground_returns_output() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = dispatcher(dir.path());
        let result = dispatcher
            .dispatch(&call(
                "run_in_terminal",
                &[("command", "echo hi"), ("isBackground", "false")],
            ))
            .await
            .expect("recognized");
        assert_eq!(result, "hi\n");
    }

    #[tokio::test]
    async fn run_in_terminal_background_reports_id() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = dispatcher(dir.path());
        let result = dispatcher
            .dispatch(&call(
                "run_in_terminal",
                &[
                    ("command", "sleep 5"),
                    ("isBackground", "true"),
                    ("explanation", "wait"),
                ],
            ))
            .await
            .expect("recognized");
        assert!(result.contains("background terminal 1"), "{result}");

        let poll = dispatcher
            .dispatch(&call("get_terminal_output", &[("id", "1")]))
            .await
            .expect("recognized");
        assert!(poll.contains("running"), "{poll}");
    }

    #[tokio::test]
    async fn get_terminal_output_unknown_id_is_text() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = dispatcher(dir.path());
        let result = dispatcher
            .dispatch(&call("get_terminal_output", &[("id", "99")]))
            .await
            .expect("recognized");
        assert!(result.contains("99"));
    }

    #[tokio::test]
    async fn block_results_are_wrapped_and_ordered() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = dispatcher(dir.path());
        let calls = [
            call("run_in_terminal", &[("command", "echo first")]),
            call("unknown_tool", &[]),
            call("run_in_terminal", &[("command", "echo second")]),
        ];
        let block = dispatcher.dispatch_block(&calls).await;
        let first = block.find("first").expect("first present");
        let second = block.find("second").expect("second present");
        assert!(first < second);
        assert_eq!(block.matches(RESULT_OPEN).count(), 2);
        assert_eq!(block.matches(RESULT_CLOSE).count(), 2);
    }

    #[tokio::test]
    async fn missing_required_parameter_degrades_to_text() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = dispatcher(dir.path());
        let result = dispatcher
            .dispatch(&call("run_in_terminal", &[]))
            .await
            .expect("recognized");
        assert!(result.contains("missing 'command'"));
    }

    #[tokio::test]
    async fn fs_tool_errors_degrade_to_text() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = dispatcher(dir.path());
        let result = dispatcher
            .dispatch(&call("read_file", &[("filePath", "missing.txt")]))
            .await
            .expect("recognized");
        assert!(result.contains("not found"), "{result}");
    }

    #[tokio::test]
    async fn create_and_read_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = dispatcher(dir.path());
        let created = dispatcher
            .dispatch(&call(
                "create_file",
                &[("filePath", "notes.txt"), ("content", "remember")],
            ))
            .await
            .expect("recognized");
        assert!(created.contains("Created"));

        let read = dispatcher
            .dispatch(&call("read_file", &[("filePath", "notes.txt")]))
            .await
            .expect("recognized");
        assert_eq!(read, "remember");
    }
}
