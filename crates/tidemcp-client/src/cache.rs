//! Local copies of the server's tool list and the session's context.
//!
//! Both are replaced wholesale on refresh so readers never observe a
//! half-updated value.

use std::sync::Arc;

use arc_swap::{ArcSwap, ArcSwapOption};
use tidemcp_core::{ContextRecord, Tool};

#[derive(Debug)]
pub(crate) struct Caches {
    tools: ArcSwap<Vec<Tool>>,
    context: ArcSwapOption<ContextRecord>,
}

impl Default for Caches {
    fn default() -> Self {
        Self {
            tools: ArcSwap::from_pointee(Vec::new()),
            context: ArcSwapOption::empty(),
        }
    }
}

impl Caches {
    pub(crate) fn tools(&self) -> Arc<Vec<Tool>> {
        self.tools.load_full()
    }

    pub(crate) fn has_tool(&self, name: &str) -> bool {
        self.tools.load().iter().any(|t| t.name == name)
    }

    pub(crate) fn set_tools(&self, tools: Vec<Tool>) {
        self.tools.store(Arc::new(tools));
    }

    pub(crate) fn context(&self) -> Option<Arc<ContextRecord>> {
        self.context.load_full()
    }

    pub(crate) fn set_context(&self, context: ContextRecord) {
        self.context.store(Some(Arc::new(context)));
    }

    pub(crate) fn clear(&self) {
        self.tools.store(Arc::new(Vec::new()));
        self.context.store(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replace_and_clear() {
        let caches = Caches::default();
        assert!(!caches.has_tool("echo"));
        assert!(caches.context().is_none());

        let before = caches.tools();
        caches.set_tools(vec![Tool::new("echo", "echo")]);
        caches.set_context(ContextRecord::new(vec!["tools".into()]));
        assert!(caches.has_tool("echo"));
        assert!(before.is_empty(), "earlier snapshots are not mutated");
        assert_eq!(caches.context().unwrap().name, "default");

        caches.clear();
        assert!(caches.tools().is_empty());
        assert!(caches.context().is_none());
    }
}
