use regex_lite::Regex;
use std::collections::HashMap;

use crate::error::RouteError;

/// Marks a path segment as a named parameter, e.g. `:id`.
pub const PARAM_MARKER: char = ':';

/// Build the full route path: `/{version}/{template}`.
///
/// Surplus slashes around either part are dropped, and an empty version
/// leaves just `/{template}`.
pub fn full_path(version: &str, template: &str) -> String {
    let parts: Vec<&str> = [version, template]
        .iter()
        .map(|part| part.trim_matches('/'))
        .filter(|part| !part.is_empty())
        .collect();
    format!("/{}", parts.join("/"))
}

/// A compiled route template.
///
/// Each `:name` segment becomes a greedy `(.*)` capture, so a parameter may
/// be empty or span several segments; with two parameters the earlier one
/// takes as much as it can. The whole pattern is anchored and matches
/// case-insensitively.
///
/// Example: `/v1/items/:category/:id`
/// - `params`: `["category", "id"]`
/// - matches `/V1/Items/books/42`, binding `category = books`, `id = 42`
#[derive(Debug, Clone)]
pub struct RoutePattern {
    template: String,
    params: Vec<String>,
    regex: Regex,
}

impl RoutePattern {
    pub fn compile(template: &str) -> Result<Self, RouteError> {
        let mut params = Vec::new();
        let segments: Vec<String> = template
            .split('/')
            .map(|segment| match segment.strip_prefix(PARAM_MARKER) {
                Some(name) if !name.is_empty() => {
                    params.push(name.to_owned());
                    "(.*)".to_owned()
                }
                _ => regex_lite::escape(segment),
            })
            .collect();

        let source = format!("(?i)^{}$", segments.join("/"));
        let regex = Regex::new(&source).map_err(|source| RouteError::InvalidPattern {
            template: template.to_owned(),
            source,
        })?;

        Ok(Self {
            template: template.to_owned(),
            params,
            regex,
        })
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    /// Parameter names in declaration order.
    pub fn params(&self) -> &[String] {
        &self.params
    }

    pub fn is_match(&self, url: &str) -> bool {
        self.regex.is_match(url)
    }

    /// Bind captured segments of `url` to parameter names.
    ///
    /// Captures and names are paired positionally; if the counts ever
    /// disagree the extra entries on the longer side are ignored.
    pub fn bind(&self, url: &str) -> Option<HashMap<String, String>> {
        let captures = self.regex.captures(url)?;
        let values = captures
            .iter()
            .skip(1)
            .map(|group| group.map_or("", |m| m.as_str()));

        Some(
            self.params
                .iter()
                .zip(values)
                .map(|(name, value)| (name.clone(), value.to_owned()))
                .collect(),
        )
    }
}
