//! Canonical names for cross-repository-external (CRTEX) leaves.
//!
//! A CRTEX leaf is not identified by a concrete method but by a *canonical
//! name*: a template string whose placeholder tokens are substituted at the
//! first real propagation, once the callee and the materialized via-type-of
//! features are known.
//!
//! Supported tokens:
//!
//! - `%programmatic_leaf_name%` — the callee's method signature;
//! - `%via_type_of%` — the name of the first via-type-of feature
//!   materialized for the frame; instantiation fails when none was.
//!
//! Text outside of tokens passes through verbatim, so a template without
//! tokens instantiates to itself.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::context::{FeatureId, Features};

static TEMPLATE_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"%([a-z_]+)%").expect("token pattern is valid"));

const PROGRAMMATIC_LEAF_NAME: &str = "programmatic_leaf_name";
const VIA_TYPE_OF: &str = "via_type_of";

/// Either a template awaiting substitution or an instantiated literal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CanonicalName {
    /// A name with (possible) placeholder tokens.
    Template(String),
    /// A fully substituted name.
    Instantiated(String),
}

impl CanonicalName {
    /// Build a template name.
    pub fn template(value: impl Into<String>) -> Self {
        CanonicalName::Template(value.into())
    }

    /// Build an already-instantiated name.
    pub fn instantiated(value: impl Into<String>) -> Self {
        CanonicalName::Instantiated(value.into())
    }

    /// The underlying string.
    pub fn value(&self) -> &str {
        match self {
            CanonicalName::Template(value) | CanonicalName::Instantiated(value) => value,
        }
    }

    /// Whether this name still awaits substitution.
    pub fn is_template(&self) -> bool {
        matches!(self, CanonicalName::Template(_))
    }

    /// Substitute this name's tokens against a concrete callee.
    ///
    /// Returns `None` when a token cannot be substituted (currently only
    /// `%via_type_of%` with no materialized via-type-of feature). An
    /// already-instantiated name returns itself.
    pub fn instantiate(
        &self,
        callee_signature: &str,
        via_type_of_features: &[FeatureId],
        features: &Features,
    ) -> Option<CanonicalName> {
        let template = match self {
            CanonicalName::Instantiated(_) => return Some(self.clone()),
            CanonicalName::Template(template) => template,
        };

        let mut failed = false;
        let instantiated = TEMPLATE_TOKEN.replace_all(template, |captures: &regex::Captures| {
            match &captures[1] {
                PROGRAMMATIC_LEAF_NAME => callee_signature.to_string(),
                VIA_TYPE_OF => match via_type_of_features.first() {
                    Some(&feature) => features.name(feature),
                    None => {
                        failed = true;
                        String::new()
                    }
                },
                // Unknown tokens are kept verbatim.
                _ => captures[0].to_string(),
            }
        });

        if failed {
            return None;
        }
        Some(CanonicalName::Instantiated(instantiated.into_owned()))
    }
}

impl std::fmt::Display for CanonicalName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CanonicalName::Template(value) => write!(f, "template({value})"),
            CanonicalName::Instantiated(value) => write!(f, "{value}"),
        }
    }
}
