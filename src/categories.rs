//! Application to context-category lookup
//!
//! The sessionizer never branches on application names itself; it asks a
//! `CategoryMap`, which can be rebuilt from configuration without touching the
//! pipeline stages.

use crate::error::ComputeError;
use crate::types::ContextCategory;
use std::collections::{BTreeMap, HashMap};

/// Keyword rules applied when no exact application id matches.
/// Matched as case-insensitive substrings, first match wins.
const DEFAULT_KEYWORD_RULES: &[(&str, ContextCategory)] = &[
    // Communication
    ("slack", ContextCategory::Communication),
    ("teams", ContextCategory::Communication),
    ("discord", ContextCategory::Communication),
    ("zoom", ContextCategory::Communication),
    ("mail", ContextCategory::Communication),
    ("outlook", ContextCategory::Communication),
    ("telegram", ContextCategory::Communication),
    ("whatsapp", ContextCategory::Communication),
    ("messages", ContextCategory::Communication),
    // Development
    ("code", ContextCategory::Development),
    ("cursor", ContextCategory::Development),
    ("intellij", ContextCategory::Development),
    ("pycharm", ContextCategory::Development),
    ("xcode", ContextCategory::Development),
    ("terminal", ContextCategory::Development),
    ("iterm", ContextCategory::Development),
    ("alacritty", ContextCategory::Development),
    ("wezterm", ContextCategory::Development),
    ("vim", ContextCategory::Development),
    ("emacs", ContextCategory::Development),
    ("docker", ContextCategory::Development),
    ("postman", ContextCategory::Development),
    // Documentation
    ("notion", ContextCategory::Documentation),
    ("obsidian", ContextCategory::Documentation),
    ("winword", ContextCategory::Documentation),
    ("pages", ContextCategory::Documentation),
    ("docs", ContextCategory::Documentation),
    ("confluence", ContextCategory::Documentation),
    ("acrobat", ContextCategory::Documentation),
    ("preview", ContextCategory::Documentation),
    // Browsing
    ("chrome", ContextCategory::Browsing),
    ("firefox", ContextCategory::Browsing),
    ("safari", ContextCategory::Browsing),
    ("edge", ContextCategory::Browsing),
    ("brave", ContextCategory::Browsing),
    // Design
    ("figma", ContextCategory::Design),
    ("sketch", ContextCategory::Design),
    ("photoshop", ContextCategory::Design),
    ("illustrator", ContextCategory::Design),
    ("affinity", ContextCategory::Design),
];

/// Injectable lookup from application id to context category
#[derive(Debug, Clone)]
pub struct CategoryMap {
    /// Exact lower-cased application ids
    exact: HashMap<String, ContextCategory>,
    /// Ordered substring rules
    keywords: Vec<(String, ContextCategory)>,
    fallback: ContextCategory,
}

impl Default for CategoryMap {
    fn default() -> Self {
        Self {
            exact: HashMap::new(),
            keywords: DEFAULT_KEYWORD_RULES
                .iter()
                .map(|(k, c)| (k.to_string(), *c))
                .collect(),
            fallback: ContextCategory::Other,
        }
    }
}

impl CategoryMap {
    /// A map with no rules; everything resolves to `Other`
    pub fn empty() -> Self {
        Self {
            exact: HashMap::new(),
            keywords: Vec::new(),
            fallback: ContextCategory::Other,
        }
    }

    /// Built-in rules plus exact overrides from configuration
    pub fn from_overrides(overrides: &BTreeMap<String, String>) -> Result<Self, ComputeError> {
        let mut map = Self::default();
        for (app_id, category) in overrides {
            map.insert(app_id, category.parse()?);
        }
        Ok(map)
    }

    /// Map an exact application id to a category
    pub fn insert(&mut self, app_id: &str, category: ContextCategory) {
        self.exact.insert(app_id.trim().to_lowercase(), category);
    }

    /// Append a substring rule, evaluated after the existing ones
    pub fn push_keyword(&mut self, keyword: &str, category: ContextCategory) {
        self.keywords.push((keyword.to_lowercase(), category));
    }

    /// Resolve the category of an application
    pub fn lookup(&self, app_id: &str) -> ContextCategory {
        let lower = app_id.trim().to_lowercase();
        if let Some(category) = self.exact.get(&lower) {
            return *category;
        }
        self.keywords
            .iter()
            .find(|(keyword, _)| lower.contains(keyword.as_str()))
            .map(|(_, category)| *category)
            .unwrap_or(self.fallback)
    }
}
