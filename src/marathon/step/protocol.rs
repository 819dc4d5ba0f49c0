// SPDX-License-Identifier: MIT

//! Line protocol spoken by step subprocesses
//!
//! Steps write plain text to stdout. Two kinds of line are structured:
//!
//! ```text
//! MARATHON_CONTEXT_SET|MARATHON_SEP|<key>|MARATHON_SEP|<value>
//! MARATHON_STATUS_CODE|MARATHON_SEP|<exit code>
//! ```
//!
//! The shell wrapper appends a status line once the step exits. A step may
//! print marker text itself, so the last status line read wins.

use std::path::Path;

/// Environment variable carrying the serialized run context
pub const CONTEXT_ENV: &str = "MARATHON_CONTEXT";
/// Prefix of the per-key context variables, see [`context_key_env`]
pub const CONTEXT_KEY_ENV_PREFIX: &str = "MARATHON_CTX_";
/// Separator token between protocol fields
pub const SEPARATOR: &str = "|MARATHON_SEP|";
pub const CONTEXT_SET_MARKER: &str = "MARATHON_CONTEXT_SET";
pub const STATUS_CODE_MARKER: &str = "MARATHON_STATUS_CODE";

/// Classified line of step output
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    /// Ordinary output text (without the trailing newline)
    Output(String),
    /// Stage a context mutation for the current run
    ContextSet { key: String, value: String },
    /// The wrapper reported the step's exit code
    Status(String),
}

impl Signal {
    /// Only an exit code of exactly "0" is success
    pub fn is_success_code(code: &str) -> bool {
        code == "0"
    }
}

/// Classify one complete line of output
///
/// Markers count only at the start of a line. Context keys end at the first
/// separator and the value is everything after it, so values may contain
/// the separator themselves.
pub fn classify(line: &str) -> Signal {
    if let Some(code) = line.strip_prefix(status_prefix().as_str()) {
        return Signal::Status(code.trim().to_string());
    }

    if let Some(rest) = line
        .strip_prefix(CONTEXT_SET_MARKER)
        .and_then(|r| r.strip_prefix(SEPARATOR))
    {
        if let Some((key, value)) = rest.split_once(SEPARATOR) {
            return Signal::ContextSet {
                key: key.to_string(),
                value: value.to_string(),
            };
        }
        log::warn!("Malformed context line treated as output: {}", line);
    }

    Signal::Output(line.to_string())
}

/// Split a status marker off the end of `line`
///
/// Returns the text before the marker and the code after it when the marker
/// appears past the start of the line. This only means something for the
/// last line of a step, where the wrapper's status line was glued onto
/// output the step left without a newline.
pub fn split_trailing_status(line: &str) -> Option<(&str, &str)> {
    let prefix = status_prefix();
    match line.rfind(prefix.as_str()) {
        Some(idx) if idx > 0 => Some((&line[..idx], line[idx + prefix.len()..].trim())),
        _ => None,
    }
}

/// Classify the last line a step produced
pub fn classify_final(line: &str) -> Vec<Signal> {
    match split_trailing_status(line) {
        Some((text, code)) => vec![classify(text), Signal::Status(code.to_string())],
        None => vec![classify(line)],
    }
}

fn status_prefix() -> String {
    format!("{}{}", STATUS_CODE_MARKER, SEPARATOR)
}

/// Render a context mutation the way a step announces it
pub fn encode_context_set(key: &str, value: &str) -> String {
    format!("{}{}{}{}{}", CONTEXT_SET_MARKER, SEPARATOR, key, SEPARATOR, value)
}

/// Environment variable carrying the value of one context key
///
/// Keys are hex-encoded so any string makes a valid variable name.
pub fn context_key_env(key: &str) -> String {
    let mut name = String::with_capacity(CONTEXT_KEY_ENV_PREFIX.len() + key.len() * 2);
    name.push_str(CONTEXT_KEY_ENV_PREFIX);
    for byte in key.bytes() {
        name.push_str(&format!("{:02x}", byte));
    }
    name
}

/// Shell snippet that runs an artifact and appends its status line
///
/// stderr is folded into stdout first so line order survives.
pub fn wrapper_command(artifact: &Path) -> String {
    format!(
        "exec 2>&1; {}; echo \"{}$?\"",
        shell_quote(&artifact.to_string_lossy()),
        status_prefix()
    )
}

fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_plain_line_is_output() {
        assert_eq!(
            classify("Hello, Foobar!"),
            Signal::Output("Hello, Foobar!".to_string())
        );
        assert_eq!(classify(""), Signal::Output(String::new()));
    }

    #[test]
    fn test_status_line() {
        assert_eq!(
            classify("MARATHON_STATUS_CODE|MARATHON_SEP|0"),
            Signal::Status("0".to_string())
        );
        assert_eq!(
            classify("MARATHON_STATUS_CODE|MARATHON_SEP|2"),
            Signal::Status("2".to_string())
        );
        assert!(Signal::is_success_code("0"));
        assert!(!Signal::is_success_code("1"));
        assert!(!Signal::is_success_code(""));
    }

    #[test]
    fn test_marker_inside_line_is_output() {
        let line = "log: MARATHON_STATUS_CODE|MARATHON_SEP|0";
        assert_eq!(classify(line), Signal::Output(line.to_string()));

        let line = "note MARATHON_CONTEXT_SET|MARATHON_SEP|k|MARATHON_SEP|v";
        assert_eq!(classify(line), Signal::Output(line.to_string()));
    }

    #[test]
    fn test_final_line_splits_trailing_status() {
        assert_eq!(
            classify_final("no newlineMARATHON_STATUS_CODE|MARATHON_SEP|1"),
            vec![
                Signal::Output("no newline".to_string()),
                Signal::Status("1".to_string())
            ]
        );
        assert_eq!(
            classify_final("MARATHON_STATUS_CODE|MARATHON_SEP|0"),
            vec![Signal::Status("0".to_string())]
        );
        assert_eq!(
            classify_final("plain"),
            vec![Signal::Output("plain".to_string())]
        );
    }

    #[test]
    fn test_final_line_after_unterminated_context_set() {
        assert_eq!(
            classify_final("MARATHON_CONTEXT_SET|MARATHON_SEP|k|MARATHON_SEP|vMARATHON_STATUS_CODE|MARATHON_SEP|0"),
            vec![
                Signal::ContextSet {
                    key: "k".to_string(),
                    value: "v".to_string()
                },
                Signal::Status("0".to_string())
            ]
        );
    }

    #[test]
    fn test_split_trailing_status_ignores_line_start() {
        assert_eq!(split_trailing_status("MARATHON_STATUS_CODE|MARATHON_SEP|0"), None);
        assert_eq!(
            split_trailing_status("xMARATHON_STATUS_CODE|MARATHON_SEP|0MARATHON_STATUS_CODE|MARATHON_SEP|3"),
            Some(("xMARATHON_STATUS_CODE|MARATHON_SEP|0", "3"))
        );
    }

    #[test]
    fn test_context_set_line() {
        assert_eq!(
            classify("MARATHON_CONTEXT_SET|MARATHON_SEP|foo|MARATHON_SEP|bar"),
            Signal::ContextSet {
                key: "foo".to_string(),
                value: "bar".to_string()
            }
        );
    }

    #[test]
    fn test_context_value_may_contain_separator() {
        let value = "left|MARATHON_SEP|right";
        let line = encode_context_set("k", value);
        assert_eq!(
            classify(&line),
            Signal::ContextSet {
                key: "k".to_string(),
                value: value.to_string()
            }
        );
    }

    #[test]
    fn test_context_empty_value() {
        assert_eq!(
            classify(&encode_context_set("empty", "")),
            Signal::ContextSet {
                key: "empty".to_string(),
                value: String::new()
            }
        );
    }

    #[test]
    fn test_malformed_context_line_is_output() {
        let line = "MARATHON_CONTEXT_SET|MARATHON_SEP|only-key";
        assert_eq!(classify(line), Signal::Output(line.to_string()));
    }

    #[test]
    fn test_context_key_env_is_hex() {
        assert_eq!(context_key_env("foo"), "MARATHON_CTX_666f6f");
        assert_eq!(context_key_env("a b"), "MARATHON_CTX_612062");
        assert_eq!(context_key_env(""), "MARATHON_CTX_");
    }

    #[test]
    fn test_wrapper_command_quotes_path() {
        let cmd = wrapper_command(&PathBuf::from("/tmp/it's here/step"));
        assert_eq!(
            cmd,
            r#"exec 2>&1; '/tmp/it'\''s here/step'; echo "MARATHON_STATUS_CODE|MARATHON_SEP|$?""#
        );
    }
}
