//! Label model for matching queued jobs to worker templates.
//!
//! Templates carry a [`LabelSet`]; a queued job asks for a [`LabelExpr`].
//! Expressions are atoms joined by `&&` and `||`, with `||` binding
//! looser:
//!
//! ```text
//! build                 → Atom("build")
//! linux && docker       → And([linux, docker])
//! arm || linux && big   → Or([arm, And([linux, big])])
//! ```
//!
//! There is no negation, so any expression satisfied by a set shares at
//! least one label with it.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

static LABEL_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_.:/\-]+$").expect("label token pattern is valid")
});

fn validate_token(expr: &str, token: &str) -> ConfigResult<()> {
    if LABEL_TOKEN.is_match(token) {
        Ok(())
    } else {
        Err(ConfigError::Label {
            expr: expr.to_string(),
            reason: format!("'{token}' is not a valid label"),
        })
    }
}

/// The set of labels a template satisfies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelSet(BTreeSet<String>);

impl LabelSet {
    /// Parse a whitespace-separated label string (`"build linux"`).
    pub fn parse(s: &str) -> ConfigResult<Self> {
        let mut labels = BTreeSet::new();
        for token in s.split_whitespace() {
            validate_token(s, token)?;
            labels.insert(token.to_string());
        }
        Ok(Self(labels))
    }

    /// No labels at all.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether `label` is in the set.
    pub fn contains(&self, label: &str) -> bool {
        self.0.contains(label)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Whether the two sets share at least one label.
    pub fn intersects(&self, other: &LabelSet) -> bool {
        self.0.iter().any(|l| other.0.contains(l))
    }
}

impl fmt::Display for LabelSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined: Vec<&str> = self.iter().collect();
        write!(f, "{}", joined.join(" "))
    }
}

impl<'a> FromIterator<&'a str> for LabelSet {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        Self(iter.into_iter().map(str::to_string).collect())
    }
}

/// A requested label: what a queued job needs from a worker.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LabelExpr {
    /// No label requested — any worker that accepts unlabeled jobs.
    #[default]
    Any,
    Atom(String),
    And(Vec<LabelExpr>),
    Or(Vec<LabelExpr>),
}

impl LabelExpr {
    /// Parse a label expression. An empty string is [`LabelExpr::Any`].
    pub fn parse(s: &str) -> ConfigResult<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Ok(Self::Any);
        }

        let mut alternatives = Vec::new();
        for alt in trimmed.split("||") {
            let mut conjuncts = Vec::new();
            for atom in alt.split("&&") {
                let atom = atom.trim();
                if atom.is_empty() {
                    return Err(ConfigError::Label {
                        expr: s.to_string(),
                        reason: "empty operand".to_string(),
                    });
                }
                validate_token(s, atom)?;
                conjuncts.push(Self::Atom(atom.to_string()));
            }
            alternatives.push(collapse(conjuncts, Self::And));
        }

        Ok(collapse(alternatives, Self::Or))
    }

    /// A single label.
    pub fn atom(label: impl Into<String>) -> Self {
        Self::Atom(label.into())
    }

    /// Matches every label set.
    pub fn is_any(&self) -> bool {
        matches!(self, Self::Any)
    }

    /// Evaluate the expression against a template's label set.
    ///
    /// [`LabelExpr::Any`] is satisfied by every set.
    pub fn matches(&self, labels: &LabelSet) -> bool {
        match self {
            Self::Any => true,
            Self::Atom(label) => labels.contains(label),
            Self::And(parts) => parts.iter().all(|p| p.matches(labels)),
            Self::Or(parts) => parts.iter().any(|p| p.matches(labels)),
        }
    }
}

fn collapse(mut parts: Vec<LabelExpr>, wrap: fn(Vec<LabelExpr>) -> LabelExpr) -> LabelExpr {
    if parts.len() == 1 {
        parts.remove(0)
    } else {
        wrap(parts)
    }
}

impl FromStr for LabelExpr {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for LabelExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => Ok(()),
            Self::Atom(label) => write!(f, "{label}"),
            Self::And(parts) => {
                let rendered: Vec<String> = parts.iter().map(ToString::to_string).collect();
                write!(f, "{}", rendered.join(" && "))
            }
            Self::Or(parts) => {
                let rendered: Vec<String> = parts.iter().map(ToString::to_string).collect();
                write!(f, "{}", rendered.join(" || "))
            }
        }
    }
}
