//! Ordered include/exclude filters over unit identities.

use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterAction {
    Include,
    Exclude,
}

impl FilterAction {
    fn inverse(self) -> bool {
        matches!(self, FilterAction::Exclude)
    }

    fn verdict(self) -> bool {
        matches!(self, FilterAction::Include)
    }
}

/// One `(action, pattern)` rule.
#[derive(Debug, Clone)]
pub struct FilterRule {
    pub action: FilterAction,
    pub pattern: Regex,
}

/// An ordered rule list. The last matching rule decides; when no rule matches the verdict is
/// the inverse of the first rule's action, so a lone `-i` means "only these" and a lone `-e`
/// means "all but these".
#[derive(Debug, Clone, Default)]
pub struct FilterSet {
    rules: Vec<FilterRule>,
}

impl FilterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a rule, compiling `pattern`.
    pub fn push(&mut self, action: FilterAction, pattern: &str) -> Result<(), regex::Error> {
        let pattern = Regex::new(pattern)?;
        self.rules.push(FilterRule { action, pattern });
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Whether the unit with identity `id` should run.
    ///
    /// ## Examples
    /// ```rust
    /// use crossrun_core::filter::{FilterAction, FilterSet};
    /// let mut filters = FilterSet::new();
    /// filters.push(FilterAction::Include, "^basics/").unwrap();
    /// filters.push(FilterAction::Exclude, "int_big").unwrap();
    /// assert!(filters.allows("basics/list1.py"));
    /// assert!(!filters.allows("basics/int_big1.py"));
    /// assert!(!filters.allows("float/float1.py"));
    /// ```
    pub fn allows(&self, id: &str) -> bool {
        let Some(first) = self.rules.first() else {
            return true;
        };
        self.rules
            .iter()
            .rev()
            .find(|rule| rule.pattern.is_match(id))
            .map(|rule| rule.action.verdict())
            .unwrap_or_else(|| first.action.inverse())
    }
}
