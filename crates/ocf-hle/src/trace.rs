//! Kernel trace filters
//!
//! Filters select which HLE functions log their calls. Each filter is
//! `+target` or `-target` where target is `module::function`, either
//! part ending in `*` to match a prefix. Filters apply in order, so
//! `+coreinit::*` followed by `-coreinit::OSGetTime` traces everything
//! in coreinit except OSGetTime.

use crate::library::{Library, LibrarySymbol};
use ocf_core::error::{EmulatorError, Result};
use std::sync::atomic::Ordering;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Pattern {
    Exact(String),
    Prefix(String),
}

impl Pattern {
    fn parse(text: &str) -> Self {
        match text.strip_suffix('*') {
            Some(prefix) => Pattern::Prefix(prefix.to_string()),
            None => Pattern::Exact(text.to_string()),
        }
    }

    fn matches(&self, name: &str) -> bool {
        match self {
            Pattern::Exact(exact) => name == exact,
            Pattern::Prefix(prefix) => name.starts_with(prefix.as_str()),
        }
    }
}

/// One parsed `+module::function` / `-module::function` filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceFilter {
    pub enable: bool,
    module: Pattern,
    function: Pattern,
}

impl TraceFilter {
    pub fn parse(text: &str) -> Result<Self> {
        let (enable, rest) = match text.as_bytes().first() {
            Some(b'+') => (true, &text[1..]),
            Some(b'-') => (false, &text[1..]),
            _ => {
                return Err(EmulatorError::Config(format!(
                    "trace filter \"{}\" must start with + or -",
                    text
                )))
            }
        };

        let (module, function) = match rest.split_once("::") {
            Some((module, function)) => (Pattern::parse(module), Pattern::parse(function)),
            None => (Pattern::parse(rest), Pattern::Prefix(String::new())),
        };

        Ok(Self {
            enable,
            module,
            function,
        })
    }

    pub fn matches(&self, module: &str, function: &str) -> bool {
        self.module.matches(module) && self.function.matches(function)
    }
}

/// Parse a filter list, rejecting the first malformed entry
pub fn parse_filters(texts: &[String]) -> Result<Vec<TraceFilter>> {
    texts.iter().map(|t| TraceFilter::parse(t)).collect()
}

/// Apply filters to every function of `library`, last match wins
pub fn apply_filters(library: &mut Library, filters: &[TraceFilter]) {
    let module = library.module_name().to_string();
    let mut enabled_count = 0usize;

    for symbol in library.symbols_mut() {
        let LibrarySymbol::Function(func) = symbol else {
            continue;
        };

        let mut enabled = false;
        for filter in filters {
            if filter.matches(&module, &func.name) {
                enabled = filter.enable;
            }
        }

        func.trace_enabled.store(enabled, Ordering::Relaxed);
        if enabled {
            enabled_count += 1;
        }
    }

    if enabled_count > 0 {
        debug!(module = %module, functions = enabled_count, "call tracing enabled");
    }
}
