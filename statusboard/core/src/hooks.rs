//! Post-resolution hooks
//!
//! Hooks run in the poller after [`resolve`](crate::resolver::resolve) and
//! may rewrite the resolved status. They never influence which rule matches.

use crate::status::CombinedStatus;

/// Emoji shown for a rewritten out-of-office status
pub const PTO_EMOJI: &str = "🌴";

/// Text shown for a rewritten out-of-office status
pub const PTO_TEXT: &str = "PTO";

const OUT_OF_OFFICE: &str = "out of office";

/// A rewrite applied to every resolved status
pub trait StatusHook: Send + Sync {
    /// Hook name for logging
    fn name(&self) -> &str;

    /// Rewrite the freshly resolved status
    fn apply(&self, status: CombinedStatus) -> CombinedStatus;
}

/// Collapses any "out of office" status into a short PTO badge
#[derive(Debug, Clone, Copy, Default)]
pub struct PtoRewrite;

impl StatusHook for PtoRewrite {
    fn name(&self) -> &'static str {
        "pto-rewrite"
    }

    fn apply(&self, mut status: CombinedStatus) -> CombinedStatus {
        if status.text.to_lowercase().contains(OUT_OF_OFFICE) {
            tracing::debug!(text = %status.text, "Rewriting out-of-office status");
            status.emoji = PTO_EMOJI.to_string();
            status.text = PTO_TEXT.to_string();
        }
        status
    }
}

/// Apply hooks in order
#[must_use]
pub fn apply_hooks(hooks: &[Box<dyn StatusHook>], status: CombinedStatus) -> CombinedStatus {
    hooks.iter().fold(status, |status, hook| hook.apply(status))
}
