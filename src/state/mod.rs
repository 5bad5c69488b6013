//! The typed game-state tree and the mutation interpreter that AI
//! generations drive.
//!
//! - [`tree`]: the nested state tree with labeled Tuple leaves.
//! - [`script`]: mutation-block extraction and instruction parsing.
//! - [`interpreter`]: atomic, all-or-nothing script evaluation.

pub mod interpreter;
pub mod script;
pub mod tree;

pub use interpreter::{apply, MutationOutcome, ScriptError};
pub use script::{
    decode_entities, extract_script, parse_script, ExtractedScript, ScriptOp, ScriptParseError,
    MUTATION_CLOSE, MUTATION_OPEN,
};
pub use tree::{canonical_path, is_tuple, parse_path, PathError, StateTree};
