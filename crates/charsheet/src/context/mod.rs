//! Context management: checkpoints, budgets, and bounded prompt assembly.
//!
//! The generation budget is the scarcest resource of every update. This
//! module provides the pieces that keep a summarization request inside it:
//!
//! 1. **[`checkpoint`]** locates the current checkpoint in a history
//!    snapshot. Pure, O(n), shared by every other stage.
//!
//! 2. **[`budget`]** derives the per-cycle budget ([`ContextBudget`]) and
//!    measures text ([`TextMeasure`], with a chars-per-token
//!    [`CharEstimate`] fallback).
//!
//! 3. **[`assembler`]** greedily fills the window after the checkpoint,
//!    measuring the full trial payload after every candidate and stopping
//!    just before the budget would be exceeded.
//!
//! 4. **[`template`]** does `{{placeholder}}` substitution and reasoning-block
//!    stripping.
//!
//! 5. **[`tuning`]** advisory heuristics that recommend trigger thresholds
//!    from corpus statistics. Never called on the live path.

pub mod assembler;
pub mod budget;
pub mod checkpoint;
pub mod template;
pub mod tuning;

// Re-export commonly used items at the module level.
pub use assembler::{Assembly, PromptAssembler};
pub use budget::{CharEstimate, ContextBudget, ContextUsage, DEFAULT_CHARS_PER_TOKEN, TextMeasure};
pub use checkpoint::{Checkpoint, find_checkpoint};
pub use tuning::{TuningParams, TuningReport};
