//! Rule documents: a mapping from output column name to expression text.
//!
//! ```yaml
//! total: price * qty
//! discount: max(0, total * 0.1)
//! ```
//!
//! Declaration order is preserved because it breaks ties in the evaluation order.

use std::fmt;
use std::fs;
use std::path::Path;

use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{RuleError, RuleResult};

/// One named derivation as written by the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleDefinition {
    /// Output column name.
    pub name: String,
    /// Expression text.
    pub expression: String,
}

/// An ordered list of rule definitions with unique names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleDefinitions {
    rules: Vec<RuleDefinition>,
}

impl RuleDefinitions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `(name, expression)` pairs, rejecting duplicate names.
    pub fn from_pairs<I, N, E>(pairs: I) -> RuleResult<Self>
    where
        I: IntoIterator<Item = (N, E)>,
        N: Into<String>,
        E: Into<String>,
    {
        let mut out = Self::new();
        for (name, expression) in pairs {
            out.push(name, expression)?;
        }
        Ok(out)
    }

    /// Append a rule. Fails with [`RuleError::DuplicateRule`] if the name is already defined.
    pub fn push(&mut self, name: impl Into<String>, expression: impl Into<String>) -> RuleResult<()> {
        let name = name.into();
        if self.get(&name).is_some() {
            return Err(RuleError::DuplicateRule { rule: name });
        }
        self.rules.push(RuleDefinition {
            name,
            expression: expression.into(),
        });
        Ok(())
    }

    /// Insert or replace a rule; a replaced rule keeps its declaration position.
    pub fn upsert(&mut self, name: impl Into<String>, expression: impl Into<String>) {
        let name = name.into();
        let expression = expression.into();
        match self.rules.iter_mut().find(|r| r.name == name) {
            Some(existing) => existing.expression = expression,
            None => self.rules.push(RuleDefinition { name, expression }),
        }
    }

    /// Merge `other` into `self` with [`RuleDefinitions::upsert`] semantics.
    pub fn extend(&mut self, other: RuleDefinitions) {
        for rule in other.rules {
            self.upsert(rule.name, rule.expression);
        }
    }

    pub fn get(&self, name: &str) -> Option<&RuleDefinition> {
        self.rules.iter().find(|r| r.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RuleDefinition> {
        self.rules.iter()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn from_json_str(text: &str) -> RuleResult<Self> {
        serde_json::from_str(text).map_err(|e| RuleError::InvalidDocument {
            message: e.to_string(),
        })
    }

    pub fn from_yaml_str(text: &str) -> RuleResult<Self> {
        serde_yaml::from_str(text).map_err(|e| RuleError::InvalidDocument {
            message: e.to_string(),
        })
    }

    /// Load a rule document, choosing JSON or YAML by extension (`.json`, `.yaml`, `.yml`).
    pub fn from_path(path: impl AsRef<Path>) -> RuleResult<Self> {
        let path = path.as_ref();
        let format = DocumentFormat::from_path(path)?;
        let text = fs::read_to_string(path)?;
        let rules = match format {
            DocumentFormat::Json => Self::from_json_str(&text)?,
            DocumentFormat::Yaml => Self::from_yaml_str(&text)?,
        };
        tracing::info!(path = %path.display(), rules = rules.len(), "loaded rule document");
        Ok(rules)
    }

    pub fn to_json_string(&self) -> RuleResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| RuleError::InvalidDocument {
            message: e.to_string(),
        })
    }

    pub fn to_yaml_string(&self) -> RuleResult<String> {
        serde_yaml::to_string(self).map_err(|e| RuleError::InvalidDocument {
            message: e.to_string(),
        })
    }

    /// Write the document to `path`, choosing JSON or YAML by extension.
    pub fn save_to_path(&self, path: impl AsRef<Path>) -> RuleResult<()> {
        let path = path.as_ref();
        let text = match DocumentFormat::from_path(path)? {
            DocumentFormat::Json => self.to_json_string()?,
            DocumentFormat::Yaml => self.to_yaml_string()?,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, text)?;
        tracing::info!(path = %path.display(), rules = self.len(), "saved rule document");
        Ok(())
    }
}

impl<'a> IntoIterator for &'a RuleDefinitions {
    type Item = &'a RuleDefinition;
    type IntoIter = std::slice::Iter<'a, RuleDefinition>;

    fn into_iter(self) -> Self::IntoIter {
        self.rules.iter()
    }
}

#[derive(Debug, Clone, Copy)]
enum DocumentFormat {
    Json,
    Yaml,
}

impl DocumentFormat {
    fn from_path(path: &Path) -> RuleResult<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "json" => Ok(Self::Json),
            "yaml" | "yml" => Ok(Self::Yaml),
            other => Err(RuleError::InvalidDocument {
                message: format!("unsupported rule document extension '{other}' (expected json|yaml|yml)"),
            }),
        }
    }
}

impl Serialize for RuleDefinitions {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.rules.len()))?;
        for rule in &self.rules {
            map.serialize_entry(&rule.name, &rule.expression)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for RuleDefinitions {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(RuleMapVisitor)
    }
}

struct RuleMapVisitor;

impl<'de> Visitor<'de> for RuleMapVisitor {
    type Value = RuleDefinitions;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a mapping from output column name to expression string")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        let mut rules = RuleDefinitions::new();
        while let Some(name) = access.next_key::<String>()? {
            let expression = access
                .next_value::<ExpressionText>()
                .map_err(|e| de::Error::custom(format!("rule '{name}': {e}")))?;
            if rules.get(&name).is_some() {
                return Err(de::Error::custom(format!("rule '{name}' is defined more than once")));
            }
            rules.rules.push(RuleDefinition {
                name,
                expression: expression.0,
            });
        }
        Ok(rules)
    }
}

/// Accepts only strings: numbers or nested structures are not expressions.
struct ExpressionText(String);

impl<'de> Deserialize<'de> for ExpressionText {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct TextVisitor;

        impl Visitor<'_> for TextVisitor {
            type Value = ExpressionText;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an expression string")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                Ok(ExpressionText(v.to_string()))
            }

            fn visit_string<E: de::Error>(self, v: String) -> Result<Self::Value, E> {
                Ok(ExpressionText(v))
            }
        }

        deserializer.deserialize_str(TextVisitor)
    }
}
