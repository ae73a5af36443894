//! Per-label inclusion/exclusion rules.
//!
//! A descriptor may carry a set of rules applied after label extraction and
//! before emission; a row whose label values fail any rule is dropped.

use regex::Regex;
use serde::Deserialize;

/// One filter rule as written in the configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct FilterRule {
    /// Label the rule applies to.
    pub label: String,
    /// Keep only values matching this pattern.
    #[serde(default)]
    pub include: Option<String>,
    /// Drop values matching this pattern.
    #[serde(default)]
    pub exclude: Option<String>,
}

/// A compiled rule.
#[derive(Debug, Clone)]
struct LabelFilter {
    label: String,
    include: Option<Regex>,
    exclude: Option<Regex>,
}

/// Compiled rule set for one descriptor.
#[derive(Debug, Clone, Default)]
pub struct LabelFilters {
    rules: Vec<LabelFilter>,
}

impl LabelFilters {
    /// Compile configuration rules. Fails on an invalid pattern.
    pub fn compile(rules: &[FilterRule]) -> Result<Self, regex::Error> {
        let mut compiled = Vec::with_capacity(rules.len());
        for rule in rules {
            compiled.push(LabelFilter {
                label: rule.label.clone(),
                include: rule.include.as_deref().map(Regex::new).transpose()?,
                exclude: rule.exclude.as_deref().map(Regex::new).transpose()?,
            });
        }
        Ok(Self { rules: compiled })
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Check a row's label values against every rule.
    ///
    /// `label_names` and `label_values` are aligned; a rule naming a label
    /// the descriptor does not carry is ignored.
    pub fn allows(&self, label_names: &[&str], label_values: &[String]) -> bool {
        for rule in &self.rules {
            let Some(pos) = label_names.iter().position(|n| *n == rule.label) else {
                continue;
            };
            let value = &label_values[pos];
            if let Some(include) = &rule.include {
                if !include.is_match(value) {
                    return false;
                }
            }
            if let Some(exclude) = &rule.exclude {
                if exclude.is_match(value) {
                    return false;
                }
            }
        }
        true
    }
}
