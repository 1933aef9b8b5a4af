use std::collections::HashMap;

use super::GenerationRequest;

/// Named extension points of the generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hook {
    /// Final output of `generate`, any kind.
    Generate,
    /// Plain-text output.
    PlainText,
    /// Template-wrapped markup before post-processing.
    AfterTemplate,
    /// Output of `post_process`.
    PostProcess,
}

pub type Filter = Box<dyn Fn(&str, &GenerationRequest) -> String + Send + Sync>;

/// Returns `false` to forbid tracking for a request.
pub type TrackingCheck = Box<dyn Fn(&GenerationRequest) -> bool + Send + Sync>;

/// Ordered filters per extension point. Empty by default.
#[derive(Default)]
pub struct Hooks {
    filters: HashMap<Hook, Vec<Filter>>,
    tracking_checks: Vec<TrackingCheck>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a filter; filters run in registration order.
    pub fn add_filter<F>(&mut self, hook: Hook, filter: F)
    where
        F: Fn(&str, &GenerationRequest) -> String + Send + Sync + 'static,
    {
        self.filters.entry(hook).or_default().push(Box::new(filter));
    }

    pub fn add_tracking_check<F>(&mut self, check: F)
    where
        F: Fn(&GenerationRequest) -> bool + Send + Sync + 'static,
    {
        self.tracking_checks.push(Box::new(check));
    }

    pub fn apply(&self, hook: Hook, content: String, request: &GenerationRequest) -> String {
        let Some(filters) = self.filters.get(&hook) else {
            return content;
        };
        filters
            .iter()
            .fold(content, |content, filter| filter(&content, request))
    }

    /// Whether every registered check allows tracking.
    pub fn allows_tracking(&self, request: &GenerationRequest) -> bool {
        self.tracking_checks.iter().all(|check| check(request))
    }
}
