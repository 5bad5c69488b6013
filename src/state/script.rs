//! Extraction and parsing of AI-emitted mutation scripts.
//!
//! The generation output may contain a single `<mutate>…</mutate>` block
//! holding a straight-line list of state operations, one call per line:
//!
//! ```text
//! <mutate>
//! set(player.hp, 15)
//! add(gold, 5)
//! push(inventory, "rope")
//! assign(stats, "strength", 12)
//! log("picked up rope")
//! </mutate>
//! ```
//!
//! The block is parsed into an explicit instruction list with a fixed,
//! enumerable operation set; there is no expression language, and no
//! host capability is reachable from a script.

use serde_json::Value;
use thiserror::Error;

/// Opening delimiter of the mutation block.
pub const MUTATION_OPEN: &str = "<mutate>";

/// Closing delimiter of the mutation block.
pub const MUTATION_CLOSE: &str = "</mutate>";

/// Noise sub-blocks stripped from the script before parsing.
const NOISE_BLOCKS: [(&str, &str); 2] = [
    ("<analysis>", "</analysis>"),
    ("<commentary>", "</commentary>"),
];

/// Bare language labels the model sometimes emits around fenced code.
const LABEL_LINES: [&str; 5] = ["js", "javascript", "json", "text", "script"];

/// Errors from script parsing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScriptParseError {
    #[error("line {line}: expected `op(args…)`, got `{text}`")]
    Malformed { line: usize, text: String },

    #[error("line {line}: unknown operation `{name}`")]
    UnknownOp { line: usize, name: String },

    #[error("line {line}: `{name}` takes {expected} argument(s), got {got}")]
    BadArity {
        line: usize,
        name: String,
        expected: &'static str,
        got: usize,
    },

    #[error("line {line}: bad argument `{text}`")]
    BadArgument { line: usize, text: String },
}

/// One parsed operation.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptOp {
    /// Write `value` at `path` (Tuple-preserving).
    Set { path: String, value: Value },
    /// Read-modify-write arithmetic at `path`.
    Add { path: String, value: Value },
    Sub { path: String, value: Value },
    Mul { path: String, value: Value },
    Div { path: String, value: Value },
    /// Append `value` to the array at `path`.
    Push { path: String, value: Value },
    /// Delete the first element of the array at `path` deep-equal to
    /// `value`.
    Remove { path: String, value: Value },
    /// Write `value` at `path.key`.
    AssignKey {
        path: String,
        key: String,
        value: Value,
    },
    /// Append a message to the operation log.
    Log { message: String },
}

/// Result of locating the mutation block in raw generation text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedScript {
    /// The cleaned script body, if a block was present.
    pub script: Option<String>,
    /// The raw text with the mutation block removed.
    pub cleaned_text: String,
}

/// Locate the mutation block and strip it from the narrative text.
///
/// Without an opening delimiter this is a no-op: the input comes back
/// unchanged and there is no script. An unterminated block is treated as
/// running to the end of the text (models drop closing tags often enough
/// that discarding the script would lose real mutations).
pub fn extract_script(raw: &str) -> ExtractedScript {
    let Some(open) = raw.find(MUTATION_OPEN) else {
        return ExtractedScript {
            script: None,
            cleaned_text: raw.to_string(),
        };
    };

    let body_start = open + MUTATION_OPEN.len();
    let (body, after) = match raw[body_start..].find(MUTATION_CLOSE) {
        Some(close) => (
            &raw[body_start..body_start + close],
            &raw[body_start + close + MUTATION_CLOSE.len()..],
        ),
        None => (&raw[body_start..], ""),
    };

    let mut cleaned_text = String::with_capacity(raw.len());
    cleaned_text.push_str(raw[..open].trim_end());
    let after = after.trim_start();
    if !after.is_empty() {
        if !cleaned_text.is_empty() {
            cleaned_text.push_str("\n\n");
        }
        cleaned_text.push_str(after);
    }

    ExtractedScript {
        script: Some(clean_script(body)),
        cleaned_text,
    }
}

/// Strip noise sub-blocks, fence/label lines, and encoded characters.
fn clean_script(body: &str) -> String {
    let mut text = body.to_string();

    for (open, close) in NOISE_BLOCKS {
        while let Some(start) = text.find(open) {
            match text[start..].find(close) {
                Some(rel_end) => {
                    text.replace_range(start..start + rel_end + close.len(), "");
                }
                None => {
                    text.truncate(start);
                    break;
                }
            }
        }
    }

    let text = decode_entities(&text);

    text.lines()
        .map(str::trim)
        .filter(|line| !line.starts_with("```"))
        .filter(|line| !LABEL_LINES.contains(&line.to_lowercase().as_str()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Decode the small fixed set of HTML entities and smart-quote variants
/// models substitute into code.
pub fn decode_entities(text: &str) -> String {
    text.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace(['\u{2018}', '\u{2019}', '\u{201A}'], "'")
        .replace(['\u{201C}', '\u{201D}', '\u{201E}'], "\"")
}

/// Parse a cleaned script into an instruction list.
pub fn parse_script(script: &str) -> Result<Vec<ScriptOp>, ScriptParseError> {
    let mut ops = Vec::new();

    for (idx, raw_line) in script.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw_line.trim().trim_end_matches(';').trim();
        if line.is_empty() || line.starts_with("//") || line.starts_with('#') {
            continue;
        }

        let (name, args) = split_call(line).ok_or_else(|| ScriptParseError::Malformed {
            line: line_no,
            text: line.to_string(),
        })?;
        let args = split_args(args);
        ops.push(build_op(line_no, &name.to_lowercase(), &args)?);
    }

    Ok(ops)
}

/// Split `name(inner)` into its parts.
fn split_call(line: &str) -> Option<(&str, &str)> {
    let open = line.find('(')?;
    let name = line[..open].trim();
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return None;
    }
    let rest = line[open + 1..].trim_end();
    let inner = rest.strip_suffix(')')?;
    Some((name, inner))
}

/// Split an argument list on top-level commas, respecting strings,
/// brackets, and braces.
fn split_args(inner: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut in_string: Option<char> = None;
    let mut escaped = false;

    for c in inner.chars() {
        if let Some(quote) = in_string {
            current.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == quote {
                in_string = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => {
                in_string = Some(c);
                current.push(c);
            }
            '[' | '{' | '(' => {
                depth += 1;
                current.push(c);
            }
            ']' | '}' | ')' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            ',' if depth == 0 => {
                args.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(c),
        }
    }
    let last = current.trim();
    if !last.is_empty() || !args.is_empty() {
        args.push(last.to_string());
    }
    args.retain(|a| !a.is_empty());
    args
}

fn build_op(line: usize, name: &str, args: &[String]) -> Result<ScriptOp, ScriptParseError> {
    let arity = |expected: &'static str| ScriptParseError::BadArity {
        line,
        name: name.to_string(),
        expected,
        got: args.len(),
    };

    match name {
        "set" | "add" | "sub" | "subtract" | "mul" | "multiply" | "div" | "divide" | "push"
        | "insert" | "remove" => {
            if args.len() != 2 {
                return Err(arity("2"));
            }
            let path = parse_path_arg(line, &args[0])?;
            let value = parse_value_arg(line, &args[1])?;
            Ok(match name {
                "set" => ScriptOp::Set { path, value },
                "add" => ScriptOp::Add { path, value },
                "sub" | "subtract" => ScriptOp::Sub { path, value },
                "mul" | "multiply" => ScriptOp::Mul { path, value },
                "div" | "divide" => ScriptOp::Div { path, value },
                "push" | "insert" => ScriptOp::Push { path, value },
                _ => ScriptOp::Remove { path, value },
            })
        }
        "assign" => match args.len() {
            // One extra argument appends to the array at `path`.
            2 => Ok(ScriptOp::Push {
                path: parse_path_arg(line, &args[0])?,
                value: parse_value_arg(line, &args[1])?,
            }),
            // Two extra arguments write `value` at `path.key`.
            3 => {
                let key = match parse_value_arg(line, &args[1])? {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                Ok(ScriptOp::AssignKey {
                    path: parse_path_arg(line, &args[0])?,
                    key,
                    value: parse_value_arg(line, &args[2])?,
                })
            }
            _ => Err(arity("2 or 3")),
        },
        "log" => {
            if args.len() != 1 {
                return Err(arity("1"));
            }
            let message = match parse_value_arg(line, &args[0])? {
                Value::String(s) => s,
                other => other.to_string(),
            };
            Ok(ScriptOp::Log { message })
        }
        _ => Err(ScriptParseError::UnknownOp {
            line,
            name: name.to_string(),
        }),
    }
}

/// Paths may be bare (`player.hp`) or quoted (`"player.hp"`).
fn parse_path_arg(line: usize, arg: &str) -> Result<String, ScriptParseError> {
    let path = match parse_value_arg(line, arg) {
        Ok(Value::String(s)) => s,
        _ => arg.to_string(),
    };
    if path.is_empty() {
        return Err(ScriptParseError::BadArgument {
            line,
            text: arg.to_string(),
        });
    }
    Ok(path)
}

/// Values are JSON literals; single-quoted strings and bare words are
/// accepted leniently (models are inconsistent quoters).
fn parse_value_arg(line: usize, arg: &str) -> Result<Value, ScriptParseError> {
    if let Ok(value) = serde_json::from_str(arg) {
        return Ok(value);
    }
    if let Some(inner) = arg
        .strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
    {
        return Ok(Value::String(inner.to_string()));
    }
    if arg.starts_with(['[', '{', '"']) {
        // Structured literal that failed to parse: a real error.
        return Err(ScriptParseError::BadArgument {
            line,
            text: arg.to_string(),
        });
    }
    Ok(Value::String(arg.to_string()))
}
