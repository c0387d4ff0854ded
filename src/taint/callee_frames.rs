//! All call-position groups for one callee.

use std::hash::Hash;

use rustc_hash::FxHashMap;

use crate::context::{Context, KindId, MethodId, PositionId, TypeId};
use crate::domain::{AbstractDomain, FeatureMayAlwaysSet, LocalPositionSet};
use crate::ir::{AccessPath, PathElement};
use crate::taint::frame::Frame;
use crate::taint::position_frames::CallPositionFrames;

/// All frames for one callee, partitioned by call position.
///
/// Invariant: every contained frame's callee equals the cached one, or the
/// container is bottom. The first insertion adopts the frame's callee;
/// later insertions assert equality. A mismatch is a logic bug and aborts.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CalleeFrames {
    callee: Option<MethodId>,
    frames: FxHashMap<Option<PositionId>, CallPositionFrames>,
}

impl CalleeFrames {
    /// The empty container.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// The shared callee. Meaningless when bottom; `None` otherwise means
    /// the contained frames are leaves.
    #[inline]
    pub fn callee(&self) -> Option<MethodId> {
        self.callee
    }

    /// Insert a frame.
    pub fn add(&mut self, frame: Frame) {
        if self.frames.is_empty() {
            self.callee = frame.callee();
        } else {
            assert_eq!(
                self.callee,
                frame.callee(),
                "all frames of a callee group must share the callee"
            );
        }
        self.frames
            .entry(frame.call_position())
            .or_default()
            .add(frame);
    }

    /// Iterate over all contained frames in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = &Frame> {
        self.frames.values().flat_map(CallPositionFrames::iter)
    }

    /// Number of contained frames. Iterates everything; test helper.
    pub fn num_frames(&self) -> usize {
        self.iter().count()
    }

    /// Whether the container holds no frames.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Reset to bottom.
    pub fn clear(&mut self) {
        self.callee = None;
        self.frames.clear();
    }

    /// Whether any contained frame has the given kind.
    pub fn contains_kind(&self, kind: KindId) -> bool {
        self.frames
            .values()
            .any(|frames| frames.contains_kind(kind))
    }

    /// Apply `f` to every frame. The callback must not change the callee or
    /// the call position; position rewriting goes through the top-level
    /// rebuild instead.
    pub fn map(&mut self, mut f: impl FnMut(&mut Frame)) {
        for frames in self.frames.values_mut() {
            frames.map(&mut f);
        }
    }

    fn prune(&mut self) {
        self.frames.retain(|_, frames| !frames.is_bottom());
        if self.frames.is_empty() {
            self.callee = None;
        }
    }

    // -- uniform mutators -----------------------------------------------------

    /// Join of all contained local-position sets.
    pub fn local_positions(&self) -> LocalPositionSet {
        let mut result = LocalPositionSet::bottom();
        for frames in self.frames.values() {
            result.join_with(frames.local_positions());
        }
        result
    }

    /// Record a local position on every frame.
    pub fn add_local_position(&mut self, position: PositionId) {
        self.map(|frame| frame.add_local_position(position));
    }

    /// Replace the local positions of every frame.
    pub fn set_local_positions(&mut self, positions: &LocalPositionSet) {
        self.map(|frame| frame.set_local_positions(positions.clone()));
    }

    /// Add inferred features to every frame. No-op when empty.
    pub fn add_inferred_features(&mut self, features: &FeatureMayAlwaysSet) {
        if features.is_empty() {
            return;
        }
        self.map(|frame| frame.add_inferred_features(features));
    }

    /// Add inferred features and a local position in one pass.
    pub fn add_inferred_features_and_local_position(
        &mut self,
        features: &FeatureMayAlwaysSet,
        position: Option<PositionId>,
    ) {
        for frames in self.frames.values_mut() {
            frames.add_inferred_features_and_local_position(features, position);
        }
    }

    /// Append a path element to the callee port of every frame whose kind
    /// passes `filter`.
    pub fn append_callee_port(
        &mut self,
        element: &PathElement,
        mut filter: impl FnMut(KindId) -> bool,
    ) {
        for frames in self.frames.values_mut() {
            frames.append_callee_port(element, &mut filter);
        }
    }

    /// Drop frames for which `is_valid` returns false; empty positions are
    /// pruned.
    pub fn filter_invalid_frames(
        &mut self,
        mut is_valid: impl FnMut(Option<MethodId>, &AccessPath, KindId) -> bool,
    ) {
        for frames in self.frames.values_mut() {
            frames.filter_invalid_frames(&mut is_valid);
        }
        self.prune();
    }

    /// Transform kinds pointwise per call position (see
    /// [`CallPositionFrames::transform_kind_with_features`]).
    pub fn transform_kind_with_features(
        &self,
        mut map_kind: impl FnMut(KindId) -> Vec<KindId>,
        mut add_features: impl FnMut(KindId) -> FeatureMayAlwaysSet,
    ) -> CalleeFrames {
        let mut result = CalleeFrames {
            callee: self.callee,
            frames: self
                .frames
                .iter()
                .map(|(&position, frames)| {
                    (
                        position,
                        frames.transform_kind_with_features(&mut map_kind, &mut add_features),
                    )
                })
                .collect(),
        };
        result.prune();
        result
    }

    /// Partition the contained frames by `map_kind`, rebuilding a
    /// [`CalleeFrames`] per bucket.
    pub fn partition_by_kind<T: Eq + Hash>(
        &self,
        mut map_kind: impl FnMut(KindId) -> T,
    ) -> FxHashMap<T, CalleeFrames> {
        let mut result: FxHashMap<T, CalleeFrames> = FxHashMap::default();
        for frame in self.iter() {
            result
                .entry(map_kind(frame.kind()))
                .or_default()
                .add(frame.clone());
        }
        result
    }

    // -- propagation ----------------------------------------------------------

    /// Propagate this callee's taint to the caller side: every position
    /// group propagates and the successors collect under the single new
    /// call position.
    #[allow(clippy::too_many_arguments)]
    pub fn propagate(
        &self,
        callee: MethodId,
        callee_port: &AccessPath,
        call_position: PositionId,
        maximum_source_sink_distance: u32,
        context: &Context,
        source_register_types: &[Option<TypeId>],
        source_constant_arguments: &[Option<String>],
    ) -> CalleeFrames {
        if self.is_bottom() {
            return CalleeFrames::bottom();
        }

        let mut propagated = CallPositionFrames::bottom();
        for frames in self.frames.values() {
            propagated.join_with(frames.propagate(
                callee,
                callee_port,
                call_position,
                maximum_source_sink_distance,
                context,
                source_register_types,
                source_constant_arguments,
            ));
        }

        if propagated.is_bottom() {
            return CalleeFrames::bottom();
        }

        assert_eq!(
            propagated.position(),
            Some(call_position),
            "propagation must land on the requested call position"
        );
        CalleeFrames {
            callee: Some(callee),
            frames: FxHashMap::from_iter([(Some(call_position), propagated)]),
        }
    }

    /// Rebuild the contained leaf frames as synthetic leaves at the given
    /// position (see [`CallPositionFrames::attach_position`]). The result's
    /// callee is `None`: attached frames are leaves.
    pub fn attach_position(&self, position: PositionId) -> CalleeFrames {
        let mut attached = CallPositionFrames::bottom();
        for frames in self.frames.values() {
            attached.join_with(frames.attach_position(position));
        }

        if attached.is_bottom() {
            return CalleeFrames::bottom();
        }
        CalleeFrames {
            callee: None,
            frames: FxHashMap::from_iter([(Some(position), attached)]),
        }
    }

    // -- rendering ------------------------------------------------------------

    /// Context-resolving display wrapper.
    pub fn display<'a>(&'a self, context: &'a Context) -> CalleeFramesDisplay<'a> {
        CalleeFramesDisplay {
            frames: self,
            context,
        }
    }

    /// Stable JSON rendering: an array of frame objects.
    pub fn to_json(&self, context: &Context) -> serde_json::Value {
        let mut frames: Vec<serde_json::Value> =
            self.iter().map(|frame| frame.to_json(context)).collect();
        frames.sort_by_key(|value| value.to_string());
        serde_json::Value::Array(frames)
    }
}

impl AbstractDomain for CalleeFrames {
    fn bottom() -> Self {
        Self::default()
    }

    fn is_bottom(&self) -> bool {
        self.frames.is_empty()
    }

    fn leq(&self, other: &Self) -> bool {
        if self.is_bottom() {
            return true;
        }
        if other.is_bottom() {
            return false;
        }
        assert_eq!(
            self.callee, other.callee,
            "callee groups with different callees cannot be compared"
        );
        self.frames.iter().all(|(position, frames)| {
            other
                .frames
                .get(position)
                .is_some_and(|other_frames| frames.leq(other_frames))
        })
    }

    fn join_with(&mut self, other: Self) {
        if other.is_bottom() {
            return;
        }
        if self.is_bottom() {
            *self = other;
            return;
        }
        assert_eq!(
            self.callee, other.callee,
            "callee groups with different callees cannot be joined"
        );
        for (position, frames) in other.frames {
            match self.frames.entry(position) {
                std::collections::hash_map::Entry::Occupied(mut entry) => {
                    entry.get_mut().join_with(frames);
                }
                std::collections::hash_map::Entry::Vacant(entry) => {
                    entry.insert(frames);
                }
            }
        }
    }

    fn meet_with(&mut self, other: Self) {
        if self.is_bottom() {
            return;
        }
        if other.is_bottom() {
            self.set_to_bottom();
            return;
        }
        assert_eq!(
            self.callee, other.callee,
            "callee groups with different callees cannot be met"
        );
        let mut other_frames = other.frames;
        self.frames
            .retain(|position, _| other_frames.contains_key(position));
        for (position, frames) in self.frames.iter_mut() {
            if let Some(other_group) = other_frames.remove(position) {
                frames.meet_with(other_group);
            }
        }
        self.prune();
    }
}

impl CalleeFrames {
    /// Pointwise difference over call positions.
    pub fn difference_with(&mut self, other: &CalleeFrames) {
        if self.is_bottom() || other.is_bottom() {
            return;
        }
        assert_eq!(
            self.callee, other.callee,
            "callee groups with different callees cannot be differenced"
        );
        for (position, frames) in self.frames.iter_mut() {
            if let Some(other_frames) = other.frames.get(position) {
                frames.difference_with(other_frames);
            }
        }
        self.prune();
    }
}

/// Context-resolving display for [`CalleeFrames`]:
/// `[FramesByPosition(position=…, frames=…), …]`, bottom as `[]`.
pub struct CalleeFramesDisplay<'a> {
    frames: &'a CalleeFrames,
    context: &'a Context,
}

impl std::fmt::Display for CalleeFramesDisplay<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[")?;
        let mut groups: Vec<(String, &CallPositionFrames)> = self
            .frames
            .frames
            .iter()
            .map(|(position, frames)| {
                let rendered = match position {
                    Some(position) => self.context.positions.resolve(*position).to_string(),
                    None => "unknown".to_string(),
                };
                (rendered, frames)
            })
            .collect();
        groups.sort_by(|left, right| left.0.cmp(&right.0));
        for (position, frames) in groups {
            write!(
                f,
                "FramesByPosition(position={position},frames={}),",
                frames.display(self.context)
            )?;
        }
        write!(f, "]")
    }
}
