//! The abstract taint domain.
//!
//! Taint is represented as a four-level tower of hashed groups, outward-in
//! for construction and inward for the lattice operations:
//!
//! ```text
//! Taint                  callee      -> CalleeFrames
//!   CalleeFrames         position    -> CallPositionFrames
//!     CallPositionFrames kind        -> FrameSet
//!       FrameSet         group key   -> Frame
//! ```
//!
//! Each level caches the field its children share (callee, call position)
//! and asserts agreement on every insertion; each level implements the same
//! lattice capability set through [`AbstractDomain`]. Frames with equal
//! grouping keys merge by joining their remaining fields, so the value of
//! any operation is independent of iteration order.
//!
//! [`Taint::propagate`] advances the state across a call boundary: it
//! accounts distance against the analysis budget, materializes via-type-of
//! and via-value-of features from the caller's register types and constant
//! arguments, and instantiates canonical names for CRTEX leaves. The
//! parallel fixpoint driving these calls lives outside this crate; a
//! `Taint` is a plain owned value that workers clone and mutate privately.

mod callee_frames;
mod frame;
mod frame_set;
mod position_frames;

pub use callee_frames::{CalleeFrames, CalleeFramesDisplay};
pub use frame::{Frame, FrameDisplay};
pub use frame_set::FrameSet;
pub use position_frames::{CallPositionFrames, CallPositionFramesDisplay};

use std::hash::Hash;

use rustc_hash::FxHashMap;
use serde_json::Value;

use crate::context::{Context, KindId, MethodId, PositionId, TypeId};
use crate::domain::{AbstractDomain, FeatureMayAlwaysSet, LocalPositionSet};
use crate::ir::{AccessPath, PathElement};

/// The top-level taint domain: all frames across callees.
///
/// Bottom is the empty taint. Top is deliberately not representable;
/// [`Taint::top`] aborts, because no operation of a well-formed analysis
/// produces it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Taint {
    set: FxHashMap<Option<MethodId>, CalleeFrames>,
}

impl Taint {
    /// The empty taint.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// The top element. Not representable: always aborts.
    pub fn top() -> Self {
        unreachable!("the taint domain has no top element");
    }

    /// Insert a frame, routing it into the right callee/position/kind
    /// bucket and merging with an existing group when the keys collide.
    pub fn add(&mut self, frame: Frame) {
        self.set.entry(frame.callee()).or_default().add(frame);
    }

    /// Join a whole callee group in.
    fn add_callee_frames(&mut self, frames: CalleeFrames) {
        if frames.is_bottom() {
            return;
        }
        match self.set.entry(frames.callee()) {
            std::collections::hash_map::Entry::Occupied(mut entry) => {
                entry.get_mut().join_with(frames);
            }
            std::collections::hash_map::Entry::Vacant(entry) => {
                entry.insert(frames);
            }
        }
    }

    /// Iterate over all contained frames in unspecified order.
    pub fn frames(&self) -> impl Iterator<Item = &Frame> {
        self.set.values().flat_map(CalleeFrames::iter)
    }

    /// Number of contained frames. Iterates every frame; use for testing.
    pub fn num_frames(&self) -> usize {
        self.frames().count()
    }

    /// Whether the taint holds no frames.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    /// Reset to bottom.
    pub fn clear(&mut self) {
        self.set.clear();
    }

    /// Whether any contained frame has the given kind.
    pub fn contains_kind(&self, kind: KindId) -> bool {
        self.set.values().any(|frames| frames.contains_kind(kind))
    }

    fn prune(&mut self) {
        self.set.retain(|_, frames| !frames.is_bottom());
    }

    // -- uniform mutators -----------------------------------------------------

    /// Add inferred features to every frame. No-op when empty.
    pub fn add_inferred_features(&mut self, features: &FeatureMayAlwaysSet) {
        for frames in self.set.values_mut() {
            frames.add_inferred_features(features);
        }
    }

    /// Record a local position on every frame.
    pub fn add_local_position(&mut self, position: PositionId) {
        for frames in self.set.values_mut() {
            frames.add_local_position(position);
        }
    }

    /// Replace the local positions of every frame.
    pub fn set_local_positions(&mut self, positions: &LocalPositionSet) {
        for frames in self.set.values_mut() {
            frames.set_local_positions(positions);
        }
    }

    /// Join of all contained local-position sets.
    pub fn local_positions(&self) -> LocalPositionSet {
        let mut result = LocalPositionSet::bottom();
        for frames in self.set.values() {
            result.join_with(frames.local_positions());
        }
        result
    }

    /// Add inferred features and a local position in one pass. No-op when
    /// both are empty.
    pub fn add_inferred_features_and_local_position(
        &mut self,
        features: &FeatureMayAlwaysSet,
        position: Option<PositionId>,
    ) {
        for frames in self.set.values_mut() {
            frames.add_inferred_features_and_local_position(features, position);
        }
    }

    // -- propagation ----------------------------------------------------------

    /// Propagate the taint from the callee to the caller.
    ///
    /// Every callee group propagates (dropping inputs beyond the distance
    /// budget, materializing via-features, instantiating CRTEX canonical
    /// names) and `extra_features` is added as inferred to every surviving
    /// frame. Returns bottom when nothing survives.
    #[allow(clippy::too_many_arguments)]
    pub fn propagate(
        &self,
        callee: MethodId,
        callee_port: &AccessPath,
        call_position: PositionId,
        maximum_source_sink_distance: u32,
        extra_features: &FeatureMayAlwaysSet,
        context: &Context,
        source_register_types: &[Option<TypeId>],
        source_constant_arguments: &[Option<String>],
    ) -> Taint {
        let mut result = Taint::bottom();
        for frames in self.set.values() {
            let mut propagated = frames.propagate(
                callee,
                callee_port,
                call_position,
                maximum_source_sink_distance,
                context,
                source_register_types,
                source_constant_arguments,
            );
            if propagated.is_bottom() {
                continue;
            }
            propagated.add_inferred_features(extra_features);
            result.add_callee_frames(propagated);
        }
        result
    }

    /// The set of leaf frames re-attached at the given position.
    ///
    /// Only leaf frames are considered; each becomes a fresh leaf with
    /// distance zero, its user features promoted into locally inferred
    /// always-features. Via-ports and canonical-name templates are left for
    /// the next real propagation.
    pub fn attach_position(&self, position: PositionId) -> Taint {
        let mut result = Taint::bottom();
        for frames in self.set.values() {
            result.add_callee_frames(frames.attach_position(position));
        }
        result
    }

    /// Transform kinds across the whole taint (see
    /// [`CallPositionFrames::transform_kind_with_features`]).
    pub fn transform_kind_with_features(
        &self,
        mut map_kind: impl FnMut(KindId) -> Vec<KindId>,
        mut add_features: impl FnMut(KindId) -> FeatureMayAlwaysSet,
    ) -> Taint {
        let mut result = Taint::bottom();
        for frames in self.set.values() {
            result.add_callee_frames(
                frames.transform_kind_with_features(&mut map_kind, &mut add_features),
            );
        }
        result
    }

    /// Append `element` to the callee ports of all kinds that pass
    /// `filter`.
    pub fn append_callee_port(
        &mut self,
        element: &PathElement,
        mut filter: impl FnMut(KindId) -> bool,
    ) {
        for frames in self.set.values_mut() {
            frames.append_callee_port(element, &mut filter);
        }
    }

    /// Rewrite the call position and local positions of every non-leaf
    /// frame.
    ///
    /// `new_call_position` receives the frame's callee, callee port and
    /// existing position; `new_local_positions` receives the existing local
    /// positions. The container is rebuilt because position keys change.
    pub fn update_non_leaf_positions(
        &mut self,
        mut new_call_position: impl FnMut(MethodId, &AccessPath, Option<PositionId>) -> Option<PositionId>,
        mut new_local_positions: impl FnMut(&LocalPositionSet) -> LocalPositionSet,
    ) {
        let mut result = Taint::bottom();
        for frame in self.frames() {
            let mut frame = frame.clone();
            if let Some(callee) = frame.callee() {
                let position =
                    new_call_position(callee, frame.callee_port(), frame.call_position());
                let local_positions = new_local_positions(frame.local_positions());
                frame = frame
                    .with_call_position(position)
                    .with_local_positions(local_positions);
            }
            result.add(frame);
        }
        *self = result;
    }

    /// Drop frames that are considered invalid. `is_valid` receives the
    /// callee (`None` for leaves), callee port and kind.
    pub fn filter_invalid_frames(
        &mut self,
        mut is_valid: impl FnMut(Option<MethodId>, &AccessPath, KindId) -> bool,
    ) {
        for frames in self.set.values_mut() {
            frames.filter_invalid_frames(&mut is_valid);
        }
        self.prune();
    }

    // -- queries --------------------------------------------------------------

    /// Partition into per-bucket taints, where `map_kind` chooses the
    /// bucket of each kind.
    pub fn partition_by_kind<T: Eq + Hash>(
        &self,
        mut map_kind: impl FnMut(KindId) -> T,
    ) -> FxHashMap<T, Taint> {
        let mut result: FxHashMap<T, Taint> = FxHashMap::default();
        for frames in self.set.values() {
            for (bucket, partition) in frames.partition_by_kind(&mut map_kind) {
                result
                    .entry(bucket)
                    .or_default()
                    .add_callee_frames(partition);
            }
        }
        result
    }

    /// All features of this taint, joined into one may/always set.
    pub fn features_joined(&self) -> FeatureMayAlwaysSet {
        let mut features = FeatureMayAlwaysSet::bottom();
        for frame in self.frames() {
            features.join_with(frame.features());
        }
        features
    }

    // -- rendering ------------------------------------------------------------

    /// Stable JSON rendering, resolved against the context: an array of
    /// frame objects.
    pub fn to_json(&self, context: &Context) -> Value {
        let mut frames: Vec<Value> = self.frames().map(|frame| frame.to_json(context)).collect();
        frames.sort_by_key(|value| value.to_string());
        Value::Array(frames)
    }

    /// Context-resolving display wrapper.
    pub fn display<'a>(&'a self, context: &'a Context) -> TaintDisplay<'a> {
        TaintDisplay {
            taint: self,
            context,
        }
    }
}

impl AbstractDomain for Taint {
    fn bottom() -> Self {
        Self::default()
    }

    fn is_bottom(&self) -> bool {
        self.set.is_empty()
    }

    fn leq(&self, other: &Self) -> bool {
        self.set.iter().all(|(callee, frames)| {
            other
                .set
                .get(callee)
                .is_some_and(|other_frames| frames.leq(other_frames))
        })
    }

    fn join_with(&mut self, other: Self) {
        for (_, frames) in other.set {
            self.add_callee_frames(frames);
        }
    }

    fn meet_with(&mut self, other: Self) {
        let mut other_set = other.set;
        self.set.retain(|callee, _| other_set.contains_key(callee));
        for (callee, frames) in self.set.iter_mut() {
            if let Some(other_frames) = other_set.remove(callee) {
                frames.meet_with(other_frames);
            }
        }
        self.prune();
    }
}

impl Taint {
    /// Remove every frame that is covered by the corresponding frame of
    /// `other`; partially covered frames are retained unchanged.
    pub fn difference_with(&mut self, other: &Taint) {
        for (callee, frames) in self.set.iter_mut() {
            if let Some(other_frames) = other.set.get(callee) {
                frames.difference_with(other_frames);
            }
        }
        self.prune();
    }
}

impl FromIterator<Frame> for Taint {
    fn from_iter<I: IntoIterator<Item = Frame>>(iter: I) -> Self {
        let mut taint = Taint::new();
        for frame in iter {
            taint.add(frame);
        }
        taint
    }
}

/// Context-resolving display for [`Taint`]: the contained callee groups in
/// a stable order, bottom as `[]`.
pub struct TaintDisplay<'a> {
    taint: &'a Taint,
    context: &'a Context,
}

impl std::fmt::Display for TaintDisplay<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[")?;
        let mut groups: Vec<String> = self
            .taint
            .set
            .values()
            .map(|frames| frames.display(self.context).to_string())
            .collect();
        groups.sort();
        write!(f, "{}", groups.join(","))?;
        write!(f, "]")
    }
}
