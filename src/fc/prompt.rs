//! System prompt describing the embedded tool-call protocol.

/// Instructions injected as the system message so the model emits the
/// XML protocol this client parses.
#[must_use]
pub fn system_prompt() -> String {
    let mut out = String::with_capacity(2048);
    out.push_str(
        "You are a coding assistant running inside a terminal client with \
         access to the user's workspace.\n\
         \n\
         You may reason privately inside <think>...</think> before answering.\n\
         \n\
         To use a tool, emit a block with this exact shape:\n\
         <function_calls>\n\
         <invoke name=\"tool_name\">\n\
         <parameter name=\"param_name\">value</parameter>\n\
         </invoke>\n\
         </function_calls>\n\
         \n\
         Escape <, >, and & inside parameter values as XML entities. \
         Tool output is returned to you wrapped in \
         <function_results>...</function_results>.\n\
         \n\
         Available tools:\n",
    );
    for (name, signature) in TOOL_SUMMARIES {
        out.push_str("- ");
        out.push_str(name);
        out.push_str(": ");
        out.push_str(signature);
        out.push('\n');
    }
    out
}

const TOOL_SUMMARIES: &[(&str, &str)] = &[
    (
        "run_in_terminal",
        "command, explanation, isBackground (default false; true detaches and returns a terminal id)",
    ),
    (
        "get_terminal_output",
        "id of a background terminal; returns its status and captured output",
    ),
    ("list_dir", "path"),
    ("file_search", "query (glob or substring), maxResults (default 50)"),
    (
        "grep_search",
        "query, isRegexp (default false), includePattern, maxResults (default 50)",
    ),
    ("read_file", "filePath, startLine, lineCount"),
    ("create_file", "filePath, content (fails if the file exists)"),
    (
        "replace_string_in_file",
        "filePath, oldString, newString (oldString must occur exactly once)",
    ),
];

#[cfg(test)]
mod tests {
    use super::system_prompt;

    #[test]
    fn prompt_names_every_tool() {
        let prompt = system_prompt();
        for name in [
            "run_in_terminal",
            "get_terminal_output",
            "list_dir",
            "file_search",
            "grep_search",
            "read_file",
            "create_file",
            "replace_string_in_file",
        ] {
            assert!(prompt.contains(name), "missing {name}");
        }
        assert!(prompt.contains("<function_calls>"));
    }
}
