//! Instance name filtering and rewriting for dynamic charts.

use mgmt_query::{CollectorError, Result};
use regex::{Regex, RegexBuilder};

use crate::config::NameQueryConfig;

/// Include/exclude patterns and an optional rewrite, compiled once per chart.
#[derive(Debug, Clone, Default)]
pub struct NameFilter {
    include: Option<Regex>,
    exclude: Option<Regex>,
    rewrite: Option<(Regex, String)>,
}

/// Patterns must match the whole name.
fn compile_anchored(pattern: &str, case_sensitive: bool) -> Result<Regex> {
    compile(&format!(r"\A(?:{pattern})\z"), case_sensitive)
}

fn compile(pattern: &str, case_sensitive: bool) -> Result<Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(!case_sensitive)
        .dot_matches_new_line(true)
        .multi_line(true)
        .build()
        .map_err(|e| CollectorError::config(format!("invalid name pattern '{pattern}': {e}")))
}

impl NameFilter {
    pub fn new(config: &NameQueryConfig) -> Result<Self> {
        let case_sensitive = config.pattern_case_sensitive;
        let include = config
            .include_pattern
            .as_deref()
            .map(|p| compile_anchored(p, case_sensitive))
            .transpose()?;
        let exclude = config
            .exclude_pattern
            .as_deref()
            .map(|p| compile_anchored(p, case_sensitive))
            .transpose()?;
        let rewrite = match config.rewrite_pattern.as_deref() {
            Some(p) if !p.trim().is_empty() => Some((
                compile(p, case_sensitive)?,
                config.rewrite_pattern_replacement.clone(),
            )),
            _ => None,
        };
        Ok(Self {
            include,
            exclude,
            rewrite,
        })
    }

    /// Whether an instance with this name gets a dimension.
    pub fn accepts(&self, name: &str) -> bool {
        self.include.as_ref().is_none_or(|re| re.is_match(name))
            && !self.exclude.as_ref().is_some_and(|re| re.is_match(name))
    }

    pub fn rewrite(&self, name: &str) -> String {
        match &self.rewrite {
            Some((re, replacement)) => re.replace_all(name, replacement.as_str()).into_owned(),
            None => name.to_string(),
        }
    }
}

/// Replace every character outside `[a-zA-Z0-9_]` with `_`.
pub fn sanitize_to_dimension_id(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}
