//! Visibility rules: ordered include/exclude predicates over (path, attrs).
//!
//! Evaluation is pure — no I/O beyond the supplied attribute record. Rules
//! are evaluated in the order supplied; the first rule whose predicate holds
//! decides. When no rule matches, the entry is visible.

use crate::pattern::Pattern;
use crate::types::FileAttrs;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    Include,
    Exclude,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Visible,
    Hidden,
}

/// Conjunction of sub-predicates. Each configured sub-predicate must hold;
/// within the pattern set, matching any one pattern satisfies that
/// sub-predicate. Unset fields always hold.
#[derive(Debug, Clone, Default)]
pub struct RulePredicate {
    pub patterns: Vec<Pattern>,
    pub min_size: Option<u64>,
    pub max_size: Option<u64>,
    pub modified_after: Option<i64>,
    pub modified_before: Option<i64>,
    /// All bits in the mask must be set in the entry's mode.
    pub mode_mask: Option<u32>,
}

impl RulePredicate {
    /// Evaluate against a canonical path and its attributes, short-circuiting
    /// on the first sub-predicate that fails.
    pub fn evaluate(&self, path: &str, attrs: &FileAttrs) -> bool {
        if !self.patterns.is_empty() && !self.patterns.iter().any(|p| p.matches(path)) {
            return false;
        }
        if let Some(min) = self.min_size {
            if attrs.size < min {
                return false;
            }
        }
        if let Some(max) = self.max_size {
            if attrs.size > max {
                return false;
            }
        }
        if let Some(after) = self.modified_after {
            if attrs.mtime < after {
                return false;
            }
        }
        if let Some(before) = self.modified_before {
            if attrs.mtime > before {
                return false;
            }
        }
        if let Some(mask) = self.mode_mask {
            if attrs.mode & mask != mask {
                return false;
            }
        }
        true
    }
}

/// One ordered visibility rule.
#[derive(Debug, Clone)]
pub struct Rule {
    pub name: String,
    pub kind: RuleKind,
    pub predicate: RulePredicate,
}

/// First-match-wins evaluation; default verdict is Visible.
pub fn decide(path: &str, attrs: &FileAttrs, rules: &[Rule]) -> Verdict {
    for rule in rules {
        if rule.predicate.evaluate(path, attrs) {
            return match rule.kind {
                RuleKind::Include => Verdict::Visible,
                RuleKind::Exclude => Verdict::Hidden,
            };
        }
    }
    Verdict::Visible
}
