use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use amx_core::FailUnexpected;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CompilerOptions {
    /// Default policy for condition failures of `begin if` / `else if` rows.
    pub continue_on_failure: bool,
    /// Syntax-check arbitrary expressions with the rhai parser.
    pub check_expressions: bool,
    pub deduplicate_alerts: bool,
    pub default_fail_unexpected: FailUnexpected,
    #[serde(skip)]
    pub cancel: Option<Arc<AtomicBool>>,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            continue_on_failure: false,
            check_expressions: true,
            deduplicate_alerts: true,
            default_fail_unexpected: FailUnexpected::None,
            cancel: None,
        }
    }
}

impl CompilerOptions {
    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }
}
