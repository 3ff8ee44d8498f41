//! Column Definition Registry.
//!
//! Every document kind declares an ordered set of [`ColumnDefinition`]s: which fields exist, which
//! are required, how a header cell naming the field looks, and how values are validated and cleaned.
//! Kinds implement [`DocumentKind`]; a [`Registry`] maps kind names to kinds and is immutable once
//! built.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::Deserialize;

use crate::error::{ReaderError, ReaderResult};
use crate::types::ParseDefinition;

/// Decimal with `.` or `,` separator; no sign, no leading zeros.
static FLOAT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:(?:0|[1-9][0-9]*)(?:[.,][0-9]+)?|[.,][0-9]+)$").expect("float pattern compiles")
});

static INTEGER_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:0|[1-9][0-9]*)$").expect("integer pattern compiles"));

static FLOAT_GSUB: LazyLock<Gsub> =
    LazyLock::new(|| Gsub::Replace(Regex::new(",").expect("comma pattern compiles"), ".".to_string()));

/// Value validator for a field.
#[derive(Debug, Clone)]
pub enum Validation {
    /// Arbitrary pattern; a value is kept only if the pattern matches.
    Pattern(Regex),
    /// Shortcut: decimal number, `,` normalized to `.`.
    Float,
    /// Shortcut: non-negative integer.
    Integer,
}

impl Validation {
    /// Parses a config token: `float`, `integer`, or a regex.
    pub fn parse(token: &str) -> ReaderResult<Self> {
        match token {
            "float" => Ok(Validation::Float),
            "integer" => Ok(Validation::Integer),
            pattern => Ok(Validation::Pattern(Regex::new(pattern)?)),
        }
    }

    pub fn pattern(&self) -> &Regex {
        match self {
            Validation::Pattern(re) => re,
            Validation::Float => &*FLOAT_PATTERN,
            Validation::Integer => &*INTEGER_PATTERN,
        }
    }
}

/// Post-clean substitution applied to non-blank values.
#[derive(Debug, Clone)]
pub enum Gsub {
    /// Delete every match.
    Remove(Regex),
    /// Replace every match.
    Replace(Regex, String),
}

impl Gsub {
    pub fn apply(&self, value: &str) -> String {
        match self {
            Gsub::Remove(re) => re.replace_all(value, "").into_owned(),
            Gsub::Replace(re, replacement) => re.replace_all(value, replacement.as_str()).into_owned(),
        }
    }
}

/// Declaration of one field of a document kind.
#[derive(Debug, Clone)]
pub struct ColumnDefinition {
    pub name: String,
    pub required: bool,
    pub validation: Option<Validation>,
    /// Matches header text naming this field; used only during analysis.
    pub head: Option<Regex>,
    pub transliterate: bool,
    pub gsub: Option<Gsub>,
}

/// Validator and substitution after shortcut expansion.
#[derive(Debug, Clone, Copy)]
pub struct FieldRule<'a> {
    pub pattern: Option<&'a Regex>,
    pub gsub: Option<&'a Gsub>,
}

impl ColumnDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: false,
            validation: None,
            head: None,
            transliterate: false,
            gsub: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn validation(mut self, validation: Validation) -> Self {
        self.validation = Some(validation);
        self
    }

    pub fn pattern(self, pattern: &str) -> ReaderResult<Self> {
        Ok(self.validation(Validation::Pattern(Regex::new(pattern)?)))
    }

    pub fn head(mut self, pattern: &str) -> ReaderResult<Self> {
        self.head = Some(Regex::new(pattern)?);
        Ok(self)
    }

    pub fn transliterate(mut self) -> Self {
        self.transliterate = true;
        self
    }

    pub fn gsub(mut self, gsub: Gsub) -> Self {
        self.gsub = Some(gsub);
        self
    }

    /// Expands shortcut validators. `float` replaces any declared gsub with `,` -> `.`.
    pub fn rule(&self) -> FieldRule<'_> {
        match &self.validation {
            Some(Validation::Float) => FieldRule {
                pattern: Some(&*FLOAT_PATTERN),
                gsub: Some(&*FLOAT_GSUB),
            },
            Some(v) => FieldRule {
                pattern: Some(v.pattern()),
                gsub: self.gsub.as_ref(),
            },
            None => FieldRule {
                pattern: None,
                gsub: self.gsub.as_ref(),
            },
        }
    }

    pub fn matches_head(&self, cell: &str) -> bool {
        self.head.as_ref().is_some_and(|re| re.is_match(cell))
    }

    /// Value match used by the analyzer; fields without a validator never match.
    pub fn matches_value(&self, cell: &str) -> bool {
        self.rule().pattern.is_some_and(|re| re.is_match(cell))
    }
}

/// Capability interface every document kind implements.
pub trait DocumentKind: Send + Sync {
    /// Registry key.
    fn name(&self) -> &str;

    /// Ordered column definitions; order decides ties during analysis.
    fn column_definitions(&self) -> &[ColumnDefinition];

    /// Required field names. Defaults to the definitions flagged `required`.
    fn required_fields(&self) -> Vec<&str> {
        self.column_definitions()
            .iter()
            .filter(|d| d.required)
            .map(|d| d.name.as_str())
            .collect()
    }

    /// Mapping to use without analysis, if the kind has a fixed layout.
    fn default_parse_definition(&self) -> Option<ParseDefinition> {
        None
    }

    fn definition(&self, field: &str) -> Option<&ColumnDefinition> {
        self.column_definitions().iter().find(|d| d.name == field)
    }
}

/// A [`DocumentKind`] backed by plain data.
#[derive(Debug, Clone)]
pub struct ColumnSet {
    name: String,
    columns: Vec<ColumnDefinition>,
    required: Option<Vec<String>>,
    default_definition: Option<ParseDefinition>,
}

impl ColumnSet {
    pub fn new(name: impl Into<String>, columns: Vec<ColumnDefinition>) -> Self {
        Self {
            name: name.into(),
            columns,
            required: None,
            default_definition: None,
        }
    }

    /// Overrides the `required` flags with an explicit list.
    pub fn with_required_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_default_definition(mut self, definition: ParseDefinition) -> Self {
        self.default_definition = Some(definition);
        self
    }
}

impl DocumentKind for ColumnSet {
    fn name(&self) -> &str {
        &self.name
    }

    fn column_definitions(&self) -> &[ColumnDefinition] {
        &self.columns
    }

    fn required_fields(&self) -> Vec<&str> {
        match &self.required {
            Some(list) => list.iter().map(String::as_str).collect(),
            None => self
                .columns
                .iter()
                .filter(|d| d.required)
                .map(|d| d.name.as_str())
                .collect(),
        }
    }

    fn default_parse_definition(&self) -> Option<ParseDefinition> {
        self.default_definition.clone()
    }
}

/// Immutable set of document kinds keyed by name.
#[derive(Clone, Default)]
pub struct Registry {
    kinds: HashMap<String, Arc<dyn DocumentKind>>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.kinds.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("Registry").field("kinds", &names).finish()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_kind(mut self, kind: impl DocumentKind + 'static) -> Self {
        self.kinds.insert(kind.name().to_string(), Arc::new(kind));
        self
    }

    pub fn with_shared_kind(mut self, kind: Arc<dyn DocumentKind>) -> Self {
        self.kinds.insert(kind.name().to_string(), kind);
        self
    }

    pub fn get(&self, kind: &str) -> Option<&Arc<dyn DocumentKind>> {
        self.kinds.get(kind)
    }

    /// Builds a registry from a JSON array of [`ColumnSetConfig`].
    pub fn from_json_str(json: &str) -> ReaderResult<Self> {
        let configs: Vec<ColumnSetConfig> = serde_json::from_str(json)?;
        let mut registry = Registry::new();
        for config in configs {
            registry = registry.with_kind(config.compile()?);
        }
        Ok(registry)
    }

    pub fn from_json_path(path: impl AsRef<Path>) -> ReaderResult<Self> {
        Self::from_json_str(&fs::read_to_string(path)?)
    }
}

/// Serialized form of a document kind.
#[derive(Debug, Clone, Deserialize)]
pub struct ColumnSetConfig {
    pub name: String,
    #[serde(default)]
    pub required_columns: Option<Vec<String>>,
    pub columns: Vec<ColumnConfig>,
    #[serde(default)]
    pub default_parse_definition: Option<ParseDefinition>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ColumnConfig {
    pub name: String,
    #[serde(default)]
    pub required: bool,
    /// `float`, `integer` or a regex.
    #[serde(default)]
    pub validation: Option<String>,
    #[serde(default)]
    pub head: Option<String>,
    #[serde(default)]
    pub transliterate: bool,
    #[serde(default)]
    pub gsub: Option<GsubConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GsubConfig {
    Remove(String),
    Replace(String, String),
}

impl ColumnSetConfig {
    pub fn compile(self) -> ReaderResult<ColumnSet> {
        let mut columns = Vec::with_capacity(self.columns.len());
        for c in self.columns {
            let mut def = ColumnDefinition::new(c.name);
            def.required = c.required;
            def.transliterate = c.transliterate;
            if let Some(token) = c.validation.as_deref() {
                def.validation = Some(Validation::parse(token)?);
            }
            if let Some(head) = c.head.as_deref() {
                def.head = Some(Regex::new(head)?);
            }
            def.gsub = match c.gsub {
                Some(GsubConfig::Remove(p)) => Some(Gsub::Remove(Regex::new(&p)?)),
                Some(GsubConfig::Replace(p, r)) => Some(Gsub::Replace(Regex::new(&p)?, r)),
                None => None,
            };
            columns.push(def);
        }

        if let Some(required) = &self.required_columns {
            if let Some(missing) = required.iter().find(|r| !columns.iter().any(|c| &c.name == *r)) {
                return Err(ReaderError::InvalidConfig {
                    message: format!("kind '{}' requires undeclared column '{missing}'", self.name),
                });
            }
        }

        let mut set = ColumnSet::new(self.name, columns);
        if let Some(required) = self.required_columns {
            set = set.with_required_fields(required);
        }
        if let Some(def) = self.default_parse_definition {
            set = set.with_default_definition(def);
        }
        Ok(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_shortcut_accepts_both_separators() {
        let def = ColumnDefinition::new("price").validation(Validation::Float);
        let rule = def.rule();
        let re = rule.pattern.unwrap();
        assert!(re.is_match("3,5"));
        assert!(re.is_match("9.99"));
        assert!(re.is_match(".5"));
        assert!(re.is_match("0"));
        assert!(!re.is_match("03"));
        assert!(!re.is_match("-1"));
        assert!(!re.is_match("Price"));
        assert_eq!(rule.gsub.unwrap().apply("3,5"), "3.5");
    }

    #[test]
    fn float_shortcut_overrides_declared_gsub() {
        let def = ColumnDefinition::new("price")
            .validation(Validation::Float)
            .gsub(Gsub::Remove(Regex::new(" ").unwrap()));
        assert_eq!(def.rule().gsub.unwrap().apply("1,25"), "1.25");
    }

    #[test]
    fn integer_shortcut_rejects_decimals() {
        let def = ColumnDefinition::new("qty").validation(Validation::Integer);
        assert!(def.matches_value("42"));
        assert!(!def.matches_value("4.2"));
        assert!(!def.matches_value(""));
    }

    #[test]
    fn field_without_validator_never_matches_value() {
        let def = ColumnDefinition::new("name");
        assert!(!def.matches_value("Widget"));
        assert!(def.rule().pattern.is_none());
    }

    #[test]
    fn required_fields_default_to_flags_and_can_be_overridden() {
        let set = ColumnSet::new(
            "price_list",
            vec![
                ColumnDefinition::new("sku").required(),
                ColumnDefinition::new("price").required(),
                ColumnDefinition::new("name"),
            ],
        );
        assert_eq!(set.required_fields(), vec!["sku", "price"]);

        let set = set.with_required_fields(["sku"]);
        assert_eq!(set.required_fields(), vec!["sku"]);
    }

    #[test]
    fn registry_loads_from_json() {
        let json = r#"[
            {
                "name": "price_list",
                "columns": [
                    {"name": "sku", "required": true, "validation": "^[A-Z][0-9]+$", "head": "(?i)sku"},
                    {"name": "price", "required": true, "validation": "float", "head": "(?i)price"},
                    {"name": "name", "head": "(?i)name", "transliterate": true, "gsub": {"remove": "\\*"}}
                ]
            }
        ]"#;
        let registry = Registry::from_json_str(json).unwrap();
        let kind = registry.get("price_list").unwrap();
        assert_eq!(kind.required_fields(), vec!["sku", "price"]);
        let name = kind.definition("name").unwrap();
        assert!(name.transliterate);
        assert_eq!(name.rule().gsub.unwrap().apply("a*b"), "ab");
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn registry_rejects_invalid_pattern_and_unknown_required_column() {
        let bad_regex = r#"[{"name": "k", "columns": [{"name": "a", "validation": "("}]}]"#;
        assert!(matches!(Registry::from_json_str(bad_regex), Err(ReaderError::Regex(_))));

        let bad_required = r#"[{"name": "k", "required_columns": ["b"], "columns": [{"name": "a"}]}]"#;
        assert!(matches!(
            Registry::from_json_str(bad_required),
            Err(ReaderError::InvalidConfig { .. })
        ));
    }
}
