//! QA tests for realistic mutation-script handling.
//!
//! These tests feed full, messy generation outputs through the public
//! mutation pipeline:
//! - Narrative with fenced, labelled, entity-encoded script blocks
//! - Character-sheet style trees with Tuple leaves and bracket paths
//! - Rollback behavior observed through the whole pipeline
//!
//! Run with: `cargo test --test qa_state_script`

use loreweaver::state::{apply, StateTree};
use serde_json::json;

fn sheet() -> StateTree {
    StateTree::from_value(json!({
        "player": {
            "hp": [20, "Health"],
            "mp": [8, "Mana"],
            "gold": 15,
            "inventory": ["sword", "torch"],
            "stats": { "strength": 10, "wits": 12 }
        },
        "party": [
            { "name": "Mira", "hp": [9, "Health"] }
        ],
        "quests": []
    }))
}

#[test]
fn test_messy_generation_output_end_to_end() {
    let tree = sheet();
    let raw = concat!(
        "The troll's club slams into your shoulder. You stagger back,\n",
        "fumbling for a healing draught.\n",
        "<mutate>\n",
        "```js\n",
        "<analysis>hp should drop by 7, then the potion heals 4</analysis>\n",
        "sub(player.hp, 7)\n",
        "add(player.hp, 4)\n",
        "remove(player.inventory, &quot;torch&quot;)\n",
        "log(\u{201C}drank a potion\u{201D})\n",
        "```\n",
        "</mutate>\n",
        "You feel the draught's warmth spread through you."
    );

    let out = apply(raw, &tree);

    assert_eq!(out.tree.get("player.hp"), Some(json!(17)));
    assert_eq!(
        out.tree.get_raw("player.hp"),
        Some(&json!([17, "Health"]))
    );
    assert_eq!(out.tree.get("player.inventory"), Some(json!(["sword"])));
    assert_eq!(out.log, vec!["drank a potion"]);

    assert!(out.cleaned_text.starts_with("The troll's club"));
    assert!(out.cleaned_text.ends_with("spread through you."));
    assert!(!out.cleaned_text.contains("<mutate>"));
    assert!(!out.cleaned_text.contains("sub(player.hp"));
}

#[test]
fn test_bracket_paths_into_arrays_and_objects() {
    let tree = sheet();
    let raw = concat!(
        "<mutate>\n",
        "sub(party[0].hp, 4)\n",
        "set(player[\"stats\"].wits, 13)\n",
        "</mutate>"
    );

    let out = apply(raw, &tree);

    assert_eq!(out.tree.get("party[0].hp"), Some(json!(5)));
    assert_eq!(
        out.tree.get_raw("party[0].hp"),
        Some(&json!([5, "Health"]))
    );
    assert_eq!(out.tree.get("player.stats.wits"), Some(json!(13)));
}

#[test]
fn test_quest_bookkeeping_scenario() {
    let tree = sheet();
    let raw = concat!(
        "\"Find my daughter,\" the miller pleads.\n",
        "<mutate>\n",
        "push(quests, {\"name\": \"missing daughter\", \"done\": false})\n",
        "assign(player.stats, \"resolve\", 1)\n",
        "sub(player.gold, 5)\n",
        "</mutate>"
    );

    let out = apply(raw, &tree);

    assert_eq!(
        out.tree.get("quests"),
        Some(json!([{ "name": "missing daughter", "done": false }]))
    );
    assert_eq!(out.tree.get("player.stats.resolve"), Some(json!(1)));
    assert_eq!(out.tree.get("player.gold"), Some(json!(10)));
}

#[test]
fn test_soft_skips_do_not_poison_the_script() {
    let tree = sheet();
    let raw = concat!(
        "<mutate>\n",
        "add(player.missing_stat, 3)\n", // missing target: skipped
        "div(player.gold, 0)\n",         // division by zero: skipped
        "add(player.gold, 1)\n",         // still applies
        "</mutate>"
    );

    let out = apply(raw, &tree);

    assert_eq!(out.tree.get("player.gold"), Some(json!(16)));
    assert!(out.log.iter().any(|l| l.contains("target missing")));
    assert!(out.log.iter().any(|l| l.contains("division by zero")));
}

#[test]
fn test_hard_error_rolls_back_but_keeps_narrative() {
    let tree = sheet();
    let raw = concat!(
        "The ledger bursts into flames.\n",
        "<mutate>\n",
        "set(player.gold, 0)\n",
        "push(player.gold, \"ash\")\n", // scalar push: hard error
        "</mutate>\n",
        "Only cinders remain."
    );

    let out = apply(raw, &tree);

    // Whole-script rollback: the earlier set is discarded too.
    assert_eq!(out.tree, tree);
    assert!(out.log.iter().any(|l| l.contains("script error")));
    assert_eq!(
        out.cleaned_text,
        "The ledger bursts into flames.\n\nOnly cinders remain."
    );
}

#[test]
fn test_unterminated_block_still_applies() {
    let tree = sheet();
    let raw = "A crossbow bolt finds its mark.\n<mutate>\nsub(player.hp, 6)";

    let out = apply(raw, &tree);

    assert_eq!(out.tree.get("player.hp"), Some(json!(14)));
    assert_eq!(out.cleaned_text, "A crossbow bolt finds its mark.");
}
