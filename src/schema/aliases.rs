//! Table alias resolution
//!
//! Query generators often pluralize, singularize or re-case table names, or
//! use names of tables that were consolidated long ago. This index answers
//! those spellings with a real table name.

use std::collections::HashMap;

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    // Tables that used to be split per year: sales_2023, sales2023.
    static ref YEAR_SPLIT: Regex = Regex::new(r"^(?P<base>[a-z_][a-z0-9_]*?)_?(?:19|20)\d{2}$").unwrap();
}

#[derive(Debug, Clone, Default)]
pub struct AliasIndex {
    /// lower-cased variant → real table name
    variants: HashMap<String, String>,
    /// lower-cased historical name → replacement table name
    renames: HashMap<String, String>,
}

impl AliasIndex {
    /// Build from the real table names (in catalog order) and the static
    /// rename map. On a variant collision the first table wins.
    pub fn build<'a>(
        tables: impl IntoIterator<Item = &'a str>,
        renames: &HashMap<String, String>,
    ) -> Self {
        let mut variants: HashMap<String, String> = HashMap::new();
        for table in tables {
            for variant in name_variants(table) {
                variants.entry(variant).or_insert_with(|| table.to_string());
            }
        }

        Self {
            variants,
            renames: renames
                .iter()
                .map(|(k, v)| (k.to_lowercase(), v.clone()))
                .collect(),
        }
    }

    /// Resolve `name` to a real table. `lookup` maps a candidate to its
    /// canonical spelling when it exists in the current snapshot; rename
    /// targets that no longer exist are ignored.
    pub fn resolve<F>(&self, name: &str, lookup: F) -> Option<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lower = normalize(name);
        if lower.is_empty() {
            return None;
        }

        if let Some(real) = self.variants.get(&lower) {
            return Some(real.clone());
        }

        if let Some(target) = self.renames.get(&lower) {
            if let Some(real) = lookup(target) {
                return Some(real);
            }
        }

        let base = YEAR_SPLIT
            .captures(&lower)
            .and_then(|caps| caps.name("base"))
            .map(|m| m.as_str().to_string())?;

        lookup(&base).or_else(|| self.variants.get(&base).cloned())
    }
}

/// Strip identifier quoting and any schema prefix, then lower-case.
fn normalize(name: &str) -> String {
    let unquoted: String = name
        .chars()
        .filter(|c| !matches!(c, '"' | '`' | '[' | ']'))
        .collect();
    unquoted
        .rsplit('.')
        .next()
        .unwrap_or("")
        .trim()
        .to_lowercase()
}

/// Lower-cased name plus its singular and plural spellings.
pub fn name_variants(name: &str) -> Vec<String> {
    let lower = name.to_lowercase();
    let mut out = vec![lower.clone()];

    let singular = singularize(&lower);
    if singular != lower {
        out.push(singular.clone());
    }

    let mut forms = vec![pluralize(&lower), pluralize(&singular)];
    if !lower.ends_with('s') {
        forms.push(format!("{}s", lower));
    }
    for form in forms {
        if !out.contains(&form) {
            out.push(form);
        }
    }

    out
}

fn singularize(word: &str) -> String {
    if let Some(stem) = word.strip_suffix("ies") {
        if !stem.is_empty() {
            return format!("{}y", stem);
        }
    }
    for suffix in ["sses", "xes", "ches", "shes"] {
        if word.ends_with(suffix) {
            return word[..word.len() - 2].to_string();
        }
    }
    if word.ends_with('s') && !word.ends_with("ss") && word.len() > 1 {
        return word[..word.len() - 1].to_string();
    }
    word.to_string()
}

fn pluralize(word: &str) -> String {
    if word.ends_with('s') && !word.ends_with("ss") {
        return word.to_string();
    }
    if let Some(stem) = word.strip_suffix('y') {
        let before = stem.chars().last();
        if !stem.is_empty() && !matches!(before, Some('a' | 'e' | 'i' | 'o' | 'u')) {
            return format!("{}ies", stem);
        }
    }
    if word.ends_with("ss") || word.ends_with('x') || word.ends_with("ch") || word.ends_with("sh") {
        return format!("{}es", word);
    }
    format!("{}s", word)
}
