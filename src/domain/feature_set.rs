//! May/always feature set.
//!
//! A pair `(may, always)` with `always ⊆ may`: `may` over-approximates the
//! features a flow can carry, `always` under-approximates the features every
//! witness of the flow carries. Joining two flows keeps the union of what
//! may happen and the intersection of what is guaranteed:
//!
//! ```text
//! (may₁, always₁) ⊔ (may₂, always₂) = (may₁ ∪ may₂, always₁ ∩ always₂)
//! ```
//!
//! Bottom is a distinguished element and the identity of join; it is *not*
//! the same as an empty `may` set with an empty `always` set, which is why
//! the representation keeps an explicit variant rather than a plain pair.
//! Values are kept canonical: a value whose `may` component is empty
//! collapses to bottom.

use crate::context::FeatureId;
use crate::domain::{AbstractDomain, FeatureSet};

/// A may/always feature pair with `always ⊆ may`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FeatureMayAlwaysSet {
    /// No flow observed. Identity of join.
    #[default]
    Bottom,
    /// An observed flow with its over/under feature approximations.
    Value {
        /// Features the flow may carry.
        may: FeatureSet,
        /// Features every witness of the flow carries. Subset of `may`.
        always: FeatureSet,
    },
}

impl FeatureMayAlwaysSet {
    /// Build a set where all features are may-features.
    pub fn make_may(features: impl IntoIterator<Item = FeatureId>) -> Self {
        Self::from_sets(features.into_iter().collect(), FeatureSet::new())
    }

    /// Build a set where all features are always-features (hence also may).
    pub fn make_always(features: impl IntoIterator<Item = FeatureId>) -> Self {
        let always: FeatureSet = features.into_iter().collect();
        Self::from_sets(always.clone(), always)
    }

    /// Build from explicit components, restoring the canonical form.
    ///
    /// Panics if `always ⊄ may`: that pair is not a member of the domain.
    pub fn from_sets(may: FeatureSet, always: FeatureSet) -> Self {
        assert!(
            always.is_subset(&may),
            "may/always feature set requires always ⊆ may"
        );
        if may.is_empty() {
            FeatureMayAlwaysSet::Bottom
        } else {
            FeatureMayAlwaysSet::Value { may, always }
        }
    }

    /// Whether no feature is present (bottom included).
    pub fn is_empty(&self) -> bool {
        match self {
            FeatureMayAlwaysSet::Bottom => true,
            FeatureMayAlwaysSet::Value { may, .. } => may.is_empty(),
        }
    }

    /// The may component (empty for bottom).
    pub fn may(&self) -> FeatureSet {
        match self {
            FeatureMayAlwaysSet::Bottom => FeatureSet::new(),
            FeatureMayAlwaysSet::Value { may, .. } => may.clone(),
        }
    }

    /// The always component (empty for bottom).
    pub fn always(&self) -> FeatureSet {
        match self {
            FeatureMayAlwaysSet::Bottom => FeatureSet::new(),
            FeatureMayAlwaysSet::Value { always, .. } => always.clone(),
        }
    }

    /// Add a feature as a may-feature.
    pub fn add(&mut self, feature: FeatureId) {
        match self {
            FeatureMayAlwaysSet::Bottom => {
                *self = Self::make_may([feature]);
            }
            FeatureMayAlwaysSet::Value { may, .. } => may.add(feature),
        }
    }

    /// Add a feature as an always-feature (hence also may).
    pub fn add_always(&mut self, feature: FeatureId) {
        match self {
            FeatureMayAlwaysSet::Bottom => {
                *self = Self::make_always([feature]);
            }
            FeatureMayAlwaysSet::Value { may, always } => {
                may.add(feature);
                always.add(feature);
            }
        }
    }

    /// Merge another set with *add* semantics: both components union.
    ///
    /// Unlike join, this never weakens an always-feature into a
    /// may-feature; it is the operation behind `add_inferred_features`.
    pub fn add_set(&mut self, other: &FeatureMayAlwaysSet) {
        if other.is_empty() {
            return;
        }
        match self {
            FeatureMayAlwaysSet::Bottom => *self = other.clone(),
            FeatureMayAlwaysSet::Value { may, always } => {
                if let FeatureMayAlwaysSet::Value {
                    may: other_may,
                    always: other_always,
                } = other
                {
                    may.extend(other_may.iter().copied());
                    always.extend(other_always.iter().copied());
                }
            }
        }
    }
}

impl AbstractDomain for FeatureMayAlwaysSet {
    fn bottom() -> Self {
        FeatureMayAlwaysSet::Bottom
    }

    fn is_bottom(&self) -> bool {
        matches!(self, FeatureMayAlwaysSet::Bottom)
    }

    fn leq(&self, other: &Self) -> bool {
        match (self, other) {
            (FeatureMayAlwaysSet::Bottom, _) => true,
            (_, FeatureMayAlwaysSet::Bottom) => false,
            (
                FeatureMayAlwaysSet::Value { may, always },
                FeatureMayAlwaysSet::Value {
                    may: other_may,
                    always: other_always,
                },
            ) => may.is_subset(other_may) && other_always.is_subset(always),
        }
    }

    fn join_with(&mut self, other: Self) {
        match (std::mem::take(self), other) {
            (FeatureMayAlwaysSet::Bottom, other) => *self = other,
            (this, FeatureMayAlwaysSet::Bottom) => *self = this,
            (
                FeatureMayAlwaysSet::Value { mut may, always },
                FeatureMayAlwaysSet::Value {
                    may: other_may,
                    always: other_always,
                },
            ) => {
                may.join_with(other_may);
                let mut met = always;
                met.meet_with(other_always);
                *self = Self::from_sets(may, met);
            }
        }
    }

    fn meet_with(&mut self, other: Self) {
        match (std::mem::take(self), other) {
            (FeatureMayAlwaysSet::Bottom, _) | (_, FeatureMayAlwaysSet::Bottom) => {
                *self = FeatureMayAlwaysSet::Bottom;
            }
            (
                FeatureMayAlwaysSet::Value { may, always },
                FeatureMayAlwaysSet::Value {
                    may: other_may,
                    always: other_always,
                },
            ) => {
                let mut met_may = may;
                met_may.meet_with(other_may);
                let mut joined_always = always;
                joined_always.join_with(other_always);
                // The meet does not exist when the guaranteed features are
                // not all possible.
                if joined_always.is_subset(&met_may) {
                    *self = Self::from_sets(met_may, joined_always);
                } else {
                    *self = FeatureMayAlwaysSet::Bottom;
                }
            }
        }
    }
}
