//! The state mutation interpreter.
//!
//! [`apply`] extracts the mutation block from raw generation text,
//! parses it into an instruction list, and evaluates it against a
//! working copy of the state tree. Evaluation is all-or-nothing: any
//! error returns the original tree untouched, with an error line in the
//! operation log. The cleaned narrative text is returned regardless.

use super::script::{extract_script, parse_script, ScriptOp};
use super::tree::{coerce_number, is_tuple, number_value, StateTree};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors that abort a script (whole-script rollback).
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("parse error: {0}")]
    Parse(#[from] super::script::ScriptParseError),

    #[error("path error: {0}")]
    Path(#[from] super::tree::PathError),

    #[error("`{path}` is not an array")]
    NotAnArray { path: String },
}

/// Result of applying raw generation text to a state tree.
#[derive(Debug)]
pub struct MutationOutcome {
    /// The new tree on success, or the untouched original on failure.
    pub tree: StateTree,

    /// The raw text with the mutation block removed.
    pub cleaned_text: String,

    /// Messages from `log(...)` ops, skipped-op notes, and any error.
    pub log: Vec<String>,
}

/// Extract, parse, and run the mutation script in `raw_text` against
/// `tree`.
///
/// Synchronous and single-pass; never panics on script content and never
/// returns a partially mutated tree.
pub fn apply(raw_text: &str, tree: &StateTree) -> MutationOutcome {
    let extracted = extract_script(raw_text);
    let Some(script) = extracted.script else {
        return MutationOutcome {
            tree: tree.clone(),
            cleaned_text: extracted.cleaned_text,
            log: Vec::new(),
        };
    };

    let mut log = Vec::new();
    match run_script(&script, tree, &mut log) {
        Ok(new_tree) => MutationOutcome {
            tree: new_tree,
            cleaned_text: extracted.cleaned_text,
            log,
        },
        Err(err) => {
            warn!(%err, "mutation script aborted, state rolled back");
            log.push(format!("script error: {err}"));
            MutationOutcome {
                tree: tree.clone(),
                cleaned_text: extracted.cleaned_text,
                log,
            }
        }
    }
}

fn run_script(
    script: &str,
    tree: &StateTree,
    log: &mut Vec<String>,
) -> Result<StateTree, ScriptError> {
    let ops = parse_script(script)?;
    let mut working = tree.clone();
    for op in ops {
        eval_op(&mut working, op, log)?;
    }
    Ok(working)
}

fn eval_op(tree: &mut StateTree, op: ScriptOp, log: &mut Vec<String>) -> Result<(), ScriptError> {
    match op {
        ScriptOp::Set { path, value } => {
            tree.set(&path, value)?;
        }
        ScriptOp::Add { path, value } => arithmetic(tree, &path, value, log, "add", |a, b| {
            Some(a + b)
        })?,
        ScriptOp::Sub { path, value } => arithmetic(tree, &path, value, log, "sub", |a, b| {
            Some(a - b)
        })?,
        ScriptOp::Mul { path, value } => arithmetic(tree, &path, value, log, "mul", |a, b| {
            Some(a * b)
        })?,
        ScriptOp::Div { path, value } => arithmetic(tree, &path, value, log, "div", |a, b| {
            // Division by zero is a no-op, not an error.
            if b == 0.0 {
                None
            } else {
                Some(a / b)
            }
        })?,
        ScriptOp::Push { path, value } => {
            push_element(tree, &path, value)?;
        }
        ScriptOp::Remove { path, value } => {
            remove_element(tree, &path, &value, log);
        }
        ScriptOp::AssignKey { path, key, value } => {
            tree.set(&format!("{path}.{key}"), value)?;
        }
        ScriptOp::Log { message } => {
            log.push(message);
        }
    }
    Ok(())
}

/// Read-modify-write with numeric coercion. A non-numeric operand on
/// either side skips the op; Tuple targets keep their label.
fn arithmetic(
    tree: &mut StateTree,
    path: &str,
    operand: Value,
    log: &mut Vec<String>,
    name: &str,
    combine: impl Fn(f64, f64) -> Option<f64>,
) -> Result<(), ScriptError> {
    let Some(current) = tree.get(path) else {
        debug!(path, name, "arithmetic target missing, op skipped");
        log.push(format!("{name}({path}): target missing, skipped"));
        return Ok(());
    };
    let (Some(lhs), Some(rhs)) = (coerce_number(&current), coerce_number(&operand)) else {
        debug!(path, name, "non-numeric operand, op skipped");
        log.push(format!("{name}({path}): non-numeric operand, skipped"));
        return Ok(());
    };
    let Some(result) = combine(lhs, rhs) else {
        log.push(format!("{name}({path}): division by zero, skipped"));
        return Ok(());
    };
    tree.set(path, number_value(result))?;
    Ok(())
}

/// Append to the array at `path`, creating it if absent. Pushing through
/// a Tuple whose value slot is an array appends inside the Tuple.
fn push_element(tree: &mut StateTree, path: &str, value: Value) -> Result<(), ScriptError> {
    match tree.get_raw_mut(path) {
        None => {
            tree.set(path, Value::Array(vec![value]))?;
            Ok(())
        }
        Some(slot) => {
            let target = if is_tuple(slot) { &mut slot[0] } else { slot };
            match target {
                Value::Array(items) => {
                    items.push(value);
                    Ok(())
                }
                _ => Err(ScriptError::NotAnArray {
                    path: path.to_string(),
                }),
            }
        }
    }
}

/// Delete the first deep-equal element from the array at `path`. A
/// missing path, non-array target, or absent element is a soft skip.
fn remove_element(tree: &mut StateTree, path: &str, value: &Value, log: &mut Vec<String>) {
    let Some(slot) = tree.get_raw_mut(path) else {
        log.push(format!("remove({path}): target missing, skipped"));
        return;
    };
    let target = if is_tuple(slot) { &mut slot[0] } else { slot };
    let Value::Array(items) = target else {
        log.push(format!("remove({path}): not an array, skipped"));
        return;
    };
    match items.iter().position(|item| item == value) {
        Some(idx) => {
            items.remove(idx);
        }
        None => log.push(format!("remove({path}): element not found, skipped")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tree(value: Value) -> StateTree {
        StateTree::from_value(value)
    }

    #[test]
    fn test_no_block_returns_input_unchanged() {
        let original = tree(json!({ "hp": 10 }));
        let out = apply("Just a story beat.", &original);
        assert_eq!(out.tree, original);
        assert_eq!(out.cleaned_text, "Just a story beat.");
        assert!(out.log.is_empty());
    }

    #[test]
    fn test_set_and_cleaned_text() {
        let original = tree(json!({ "hp": 10 }));
        let out = apply("You rest.\n<mutate>\nset(hp, 20)\n</mutate>", &original);
        assert_eq!(out.tree.get("hp"), Some(json!(20)));
        assert_eq!(out.cleaned_text, "You rest.");
    }

    #[test]
    fn test_tuple_label_survives_set() {
        let original = tree(json!({ "hp": [10, "Health"] }));
        let out = apply("<mutate>set(hp, 15)</mutate>", &original);
        assert_eq!(out.tree.as_value(), &json!({ "hp": [15, "Health"] }));
    }

    #[test]
    fn test_tuple_label_survives_arithmetic() {
        let original = tree(json!({ "hp": [10, "Health"] }));
        let out = apply("<mutate>add(hp, 5)</mutate>", &original);
        assert_eq!(out.tree.as_value(), &json!({ "hp": [15, "Health"] }));
    }

    #[test]
    fn test_arithmetic_ops() {
        let original = tree(json!({ "a": 10, "b": 10, "c": 10, "d": 10 }));
        let out = apply(
            "<mutate>\nadd(a, 5)\nsub(b, 3)\nmul(c, 2)\ndiv(d, 4)\n</mutate>",
            &original,
        );
        assert_eq!(out.tree.get("a"), Some(json!(15)));
        assert_eq!(out.tree.get("b"), Some(json!(7)));
        assert_eq!(out.tree.get("c"), Some(json!(20)));
        assert_eq!(out.tree.get("d"), Some(json!(2.5)));
    }

    #[test]
    fn test_numeric_string_coercion() {
        let original = tree(json!({ "gold": "12" }));
        let out = apply("<mutate>add(gold, 3)</mutate>", &original);
        assert_eq!(out.tree.get("gold"), Some(json!(15)));
    }

    #[test]
    fn test_non_numeric_operand_skips_op() {
        let original = tree(json!({ "name": "Mira", "hp": 10 }));
        let out = apply("<mutate>\nadd(name, 5)\nadd(hp, 1)\n</mutate>", &original);
        // The bad op is skipped, the rest of the script still runs.
        assert_eq!(out.tree.get("name"), Some(json!("Mira")));
        assert_eq!(out.tree.get("hp"), Some(json!(11)));
        assert!(out.log.iter().any(|l| l.contains("non-numeric")));
    }

    #[test]
    fn test_division_by_zero_is_noop() {
        let original = tree(json!({ "hp": 10 }));
        let out = apply("<mutate>div(hp, 0)</mutate>", &original);
        assert_eq!(out.tree.get("hp"), Some(json!(10)));
        assert!(out.log.iter().any(|l| l.contains("division by zero")));
    }

    #[test]
    fn test_push_and_remove() {
        let original = tree(json!({ "inventory": ["sword"] }));
        let out = apply(
            "<mutate>\npush(inventory, \"rope\")\nremove(inventory, \"sword\")\n</mutate>",
            &original,
        );
        assert_eq!(out.tree.get("inventory"), Some(json!(["rope"])));
    }

    #[test]
    fn test_push_creates_missing_array() {
        let original = tree(json!({}));
        let out = apply("<mutate>push(inventory, \"rope\")</mutate>", &original);
        assert_eq!(out.tree.get("inventory"), Some(json!(["rope"])));
    }

    #[test]
    fn test_remove_deep_equality() {
        let original = tree(json!({ "quests": [{ "name": "rescue", "done": false }] }));
        let out = apply(
            r#"<mutate>remove(quests, {"name": "rescue", "done": false})</mutate>"#,
            &original,
        );
        assert_eq!(out.tree.get("quests"), Some(json!([])));
    }

    #[test]
    fn test_remove_missing_element_skipped() {
        let original = tree(json!({ "inventory": ["sword"] }));
        let out = apply("<mutate>remove(inventory, \"shield\")</mutate>", &original);
        assert_eq!(out.tree.get("inventory"), Some(json!(["sword"])));
        assert!(out.log.iter().any(|l| l.contains("not found")));
    }

    #[test]
    fn test_assign_forms() {
        let original = tree(json!({ "inventory": [], "stats": {} }));
        let out = apply(
            "<mutate>\nassign(inventory, \"torch\")\nassign(stats, \"strength\", 12)\n</mutate>",
            &original,
        );
        assert_eq!(out.tree.get("inventory"), Some(json!(["torch"])));
        assert_eq!(out.tree.get("stats.strength"), Some(json!(12)));
    }

    #[test]
    fn test_log_sink() {
        let original = tree(json!({}));
        let out = apply("<mutate>log(\"the troll fell\")</mutate>", &original);
        assert_eq!(out.log, vec!["the troll fell"]);
    }

    #[test]
    fn test_error_rolls_back_whole_script() {
        let original = tree(json!({ "hp": 10, "inventory": ["sword"] }));
        // First op succeeds, second pushes into a scalar: whole script
        // aborts and earlier mutations are discarded.
        let out = apply(
            "<mutate>\nset(hp, 99)\npush(hp, \"oops\")\n</mutate>",
            &original,
        );
        assert_eq!(out.tree, original);
        assert!(out.log.iter().any(|l| l.contains("script error")));
        // Cleaned text still comes back.
        assert_eq!(out.cleaned_text, "");
    }

    #[test]
    fn test_parse_error_rolls_back() {
        let original = tree(json!({ "hp": 10 }));
        let out = apply("<mutate>\nset(hp, 99)\nfireball(hp)\n</mutate>", &original);
        assert_eq!(out.tree, original);
        assert!(out.log.iter().any(|l| l.contains("script error")));
    }

    #[test]
    fn test_entities_decoded_before_parsing() {
        let original = tree(json!({}));
        let out = apply("<mutate>set(name, &quot;Mira&quot;)</mutate>", &original);
        assert_eq!(out.tree.get("name"), Some(json!("Mira")));
    }
}
