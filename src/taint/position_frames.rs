//! All frames observed at one call position, partitioned by kind.
//!
//! This is also where the propagation engine lives: collapsing a kind's
//! frames into a caller-side successor, materializing via-type-of and
//! via-value-of features from caller-supplied register types and constant
//! arguments, and instantiating canonical names for CRTEX leaves.

use rustc_hash::FxHashMap;

use crate::context::{Context, FeatureId, KindId, MethodId, PositionId, TypeId};
use crate::domain::{
    AbstractDomain, CanonicalNameSet, FeatureMayAlwaysSet, FieldSet, LocalPositionSet, MethodSet,
};
use crate::ir::{AccessPath, PathElement};
use crate::taint::frame::Frame;
use crate::taint::frame_set::FrameSet;

/// All frames at one call position across kinds.
///
/// Invariant: every contained frame's call position equals the cached one,
/// or the container is bottom. The first insertion adopts the frame's
/// position; later insertions assert equality. A mismatch is a logic bug
/// and aborts.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CallPositionFrames {
    position: Option<PositionId>,
    frames: FxHashMap<KindId, FrameSet>,
}

impl CallPositionFrames {
    /// The empty container.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// The shared call position. Meaningless when bottom; `None` otherwise
    /// means the contained frames are leaves without a position.
    #[inline]
    pub fn position(&self) -> Option<PositionId> {
        self.position
    }

    /// Insert a frame.
    pub fn add(&mut self, frame: Frame) {
        if self.frames.is_empty() {
            self.position = frame.call_position();
        } else {
            assert_eq!(
                self.position,
                frame.call_position(),
                "all frames of a call-position group must share the call position"
            );
        }
        self.frames.entry(frame.kind()).or_default().add(frame);
    }

    /// Iterate over all contained frames in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = &Frame> {
        self.frames.values().flat_map(FrameSet::iter)
    }

    /// Iterate over `(kind, frames)` groups.
    pub fn iter_by_kind(&self) -> impl Iterator<Item = (KindId, &FrameSet)> {
        self.frames.iter().map(|(&kind, frames)| (kind, frames))
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
        self.position = None;
        self.frames.clear();
    }

    /// Whether any contained frame has the given kind.
    pub fn contains_kind(&self, kind: KindId) -> bool {
        self.frames.contains_key(&kind)
    }

    /// Apply `f` to every frame. The callback must not change the call
    /// position; kinds do not change under the operations routed through
    /// here.
    pub fn map(&mut self, mut f: impl FnMut(&mut Frame)) {
        for frames in self.frames.values_mut() {
            frames.map(&mut f);
        }
    }

    /// Drop empty kind groups and restore the canonical bottom.
    fn prune(&mut self) {
        self.frames.retain(|_, frames| !frames.is_empty());
        if self.frames.is_empty() {
            self.position = None;
        }
    }

    // -- uniform mutators -----------------------------------------------------

    /// Join of all contained local-position sets.
    pub fn local_positions(&self) -> LocalPositionSet {
        let mut result = LocalPositionSet::bottom();
        for frame in self.iter() {
            result.join_with(frame.local_positions().clone());
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
        if features.is_empty() && position.is_none() {
            return;
        }
        self.map(|frame| {
            if !features.is_empty() {
                frame.add_inferred_features(features);
            }
            if let Some(position) = position {
                frame.add_local_position(position);
            }
        });
    }

    /// Append a path element to the callee port of every frame whose kind
    /// passes `filter`.
    pub fn append_callee_port(
        &mut self,
        element: &PathElement,
        mut filter: impl FnMut(KindId) -> bool,
    ) {
        for (&kind, frames) in self.frames.iter_mut() {
            if filter(kind) {
                frames.map(|frame| frame.callee_port_append(element.clone()));
            }
        }
    }

    /// Drop frames for which `is_valid` returns false; empty kinds are
    /// pruned.
    pub fn filter_invalid_frames(
        &mut self,
        mut is_valid: impl FnMut(Option<MethodId>, &AccessPath, KindId) -> bool,
    ) {
        for frames in self.frames.values_mut() {
            frames.filter(|frame| is_valid(frame.callee(), frame.callee_port(), frame.kind()));
        }
        self.prune();
    }

    // -- kind transformation --------------------------------------------------

    /// Transform kinds, optionally fanning one kind out into several and
    /// attaching features to the transformed frames.
    ///
    /// An empty `map_kind` result drops the kind; `[old_kind]` keeps it
    /// untouched; anything else re-kinds every frame (adding
    /// `add_features(new_kind)` to its inferred features) and joins the
    /// result into the output bucket for that kind. Many-to-one collisions
    /// therefore weaken conflicting always-features into may-features, as
    /// the join requires.
    pub fn transform_kind_with_features(
        &self,
        mut map_kind: impl FnMut(KindId) -> Vec<KindId>,
        mut add_features: impl FnMut(KindId) -> FeatureMayAlwaysSet,
    ) -> CallPositionFrames {
        let mut new_frames: FxHashMap<KindId, FrameSet> = FxHashMap::default();
        for (&old_kind, frames) in self.frames.iter() {
            let new_kinds = map_kind(old_kind);
            if new_kinds.is_empty() {
                continue;
            }
            if new_kinds.len() == 1 && new_kinds[0] == old_kind {
                new_frames
                    .entry(old_kind)
                    .or_default()
                    .join_with(frames.clone());
                continue;
            }
            for &new_kind in &new_kinds {
                // Re-kind even when new_kind == old_kind: a transformation
                // occurred and the features still apply.
                let features_to_add = add_features(new_kind);
                let mut transformed = FrameSet::new();
                for frame in frames.iter() {
                    let mut new_frame = frame.clone().with_kind(new_kind);
                    new_frame.add_inferred_features(&features_to_add);
                    transformed.add(new_frame);
                }
                new_frames
                    .entry(new_kind)
                    .or_default()
                    .join_with(transformed);
            }
        }
        let mut result = CallPositionFrames {
            position: self.position,
            frames: new_frames,
        };
        result.prune();
        result
    }

    // -- propagation ----------------------------------------------------------

    /// Propagate this group's taint from the callee to the caller side.
    ///
    /// The result holds the successor frames at `call_position` with the
    /// given callee and port. Returns bottom when no input frame is within
    /// the distance budget.
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
    ) -> CallPositionFrames {
        if self.is_bottom() {
            return CallPositionFrames::bottom();
        }

        let mut result = CallPositionFrames::bottom();
        for frames in self.frames.values() {
            let (crtex_frames, non_crtex_frames): (Vec<&Frame>, Vec<&Frame>) = frames
                .iter()
                .partition(|frame| frame.is_crtex_producer_declaration());

            result.join_with(propagate_crtex_frames(
                callee,
                callee_port,
                call_position,
                maximum_source_sink_distance,
                context,
                source_register_types,
                &crtex_frames,
            ));

            // Non-CRTEX frames of one kind collapse into a single
            // caller-side successor.
            let mut via_type_of_features_added = Vec::new();
            if let Some(frame) = propagate_frames(
                callee,
                callee_port,
                call_position,
                maximum_source_sink_distance,
                context,
                source_register_types,
                source_constant_arguments,
                &non_crtex_frames,
                &mut via_type_of_features_added,
            ) {
                result.add(frame);
            }
        }
        result
    }

    /// Rebuild the leaf frames of this group as synthetic leaves at the
    /// given position.
    ///
    /// This does more than rewrite the position: like propagation, it
    /// carries the frame features forward. User features become locally
    /// inferred always-features so that a leaf surfaced in an issue keeps
    /// them attributed to this hop; via-ports and canonical-name templates
    /// are left for the next real propagation to materialize.
    pub fn attach_position(&self, position: PositionId) -> CallPositionFrames {
        let mut result = CallPositionFrames::bottom();
        for frame in self.iter() {
            if !frame.is_leaf() {
                continue;
            }
            let mut new_frame = Frame::new(frame.kind(), frame.callee_port().clone())
                .with_call_position(position)
                .with_origins(frame.origins().clone())
                .with_field_origins(frame.field_origins().clone())
                .with_inferred_features(frame.features())
                .with_local_positions(frame.local_positions().clone())
                .with_canonical_names(frame.canonical_names().clone());
            if !frame.user_features().is_empty() {
                new_frame = new_frame.with_locally_inferred_features(
                    FeatureMayAlwaysSet::make_always(frame.user_features().iter().copied()),
                );
            }
            result.add(new_frame);
        }
        result
    }

    // -- rendering ------------------------------------------------------------

    /// Context-resolving display wrapper.
    pub fn display<'a>(&'a self, context: &'a Context) -> CallPositionFramesDisplay<'a> {
        CallPositionFramesDisplay {
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

impl AbstractDomain for CallPositionFrames {
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
            self.position, other.position,
            "call-position groups with different positions cannot be compared"
        );
        self.frames.iter().all(|(kind, frames)| {
            other
                .frames
                .get(kind)
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
            self.position, other.position,
            "call-position groups with different positions cannot be joined"
        );
        for (kind, frames) in other.frames {
            match self.frames.entry(kind) {
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
            self.position, other.position,
            "call-position groups with different positions cannot be met"
        );
        let mut other_frames = other.frames;
        self.frames.retain(|kind, _| other_frames.contains_key(kind));
        for (kind, frames) in self.frames.iter_mut() {
            if let Some(other_set) = other_frames.remove(kind) {
                frames.meet_with(other_set);
            }
        }
        self.prune();
    }
}

impl CallPositionFrames {
    /// Pointwise difference: each kind group keeps only the frames not
    /// covered by the peer's group.
    pub fn difference_with(&mut self, other: &CallPositionFrames) {
        if self.is_bottom() || other.is_bottom() {
            return;
        }
        assert_eq!(
            self.position, other.position,
            "call-position groups with different positions cannot be differenced"
        );
        for (kind, frames) in self.frames.iter_mut() {
            if let Some(other_frames) = other.frames.get(kind) {
                frames.difference_with(other_frames);
            }
        }
        self.prune();
    }
}

// =============================================================================
// Propagation helpers
// =============================================================================

/// Collapse same-kind frames into one caller-side successor.
///
/// Inputs at or beyond the distance budget are dropped; if none survive the
/// successor is `None`. The successor distance is the minimum input
/// distance plus one; origins and features join across inputs, with
/// via-type-of / via-value-of ports materialized into always-features.
#[allow(clippy::too_many_arguments)]
fn propagate_frames(
    callee: MethodId,
    callee_port: &AccessPath,
    call_position: PositionId,
    maximum_source_sink_distance: u32,
    context: &Context,
    source_register_types: &[Option<TypeId>],
    source_constant_arguments: &[Option<String>],
    frames: &[&Frame],
    via_type_of_features_added: &mut Vec<FeatureId>,
) -> Option<Frame> {
    let kind = frames.first()?.kind();
    let mut distance = u32::MAX;
    let mut origins = MethodSet::bottom();
    let mut field_origins = FieldSet::bottom();
    let mut inferred_features = FeatureMayAlwaysSet::bottom();

    for frame in frames {
        debug_assert_eq!(frame.kind(), kind, "inputs must share a kind");

        if frame.distance() >= maximum_source_sink_distance {
            continue;
        }

        distance = distance.min(frame.distance() + 1);
        origins.join_with(frame.origins().clone());
        field_origins.join_with(frame.field_origins().clone());

        // User features merge into the successor's inferred features.
        inferred_features.join_with(frame.features());

        materialize_via_type_of_ports(
            callee,
            context,
            frame,
            source_register_types,
            via_type_of_features_added,
            &mut inferred_features,
        );
        materialize_via_value_of_ports(
            callee,
            context,
            frame,
            source_constant_arguments,
            &mut inferred_features,
        );
    }

    if distance == u32::MAX {
        return None;
    }

    debug_assert!(distance <= maximum_source_sink_distance);
    Some(
        Frame::new(kind, callee_port.clone())
            .with_callee(callee)
            .with_call_position(call_position)
            .with_distance(distance)
            .with_origins(origins)
            .with_field_origins(field_origins)
            .with_inferred_features(inferred_features),
    )
}

/// Propagate CRTEX frames one-per-input, instantiating their canonical
/// names against the concrete callee.
#[allow(clippy::too_many_arguments)]
fn propagate_crtex_frames(
    callee: MethodId,
    callee_port: &AccessPath,
    call_position: PositionId,
    maximum_source_sink_distance: u32,
    context: &Context,
    source_register_types: &[Option<TypeId>],
    frames: &[&Frame],
) -> CallPositionFrames {
    let mut result = CallPositionFrames::bottom();

    for &frame in frames {
        let mut via_type_of_features_added = Vec::new();
        let Some(propagated) = propagate_frames(
            callee,
            callee_port,
            call_position,
            maximum_source_sink_distance,
            context,
            source_register_types,
            // Via-value-of is not materialized for CRTEX frames.
            &[],
            &[frame],
            &mut via_type_of_features_added,
        ) else {
            continue;
        };

        let canonical_names = frame.canonical_names();
        if canonical_names.is_empty() {
            context.reporter().warn(&format!(
                "Encountered crtex frame without canonical names. Frame: `{}`",
                frame.display(context)
            ));
            continue;
        }

        let callee_signature = context.methods.signature(callee);
        let mut instantiated_names = CanonicalNameSet::bottom();
        for canonical_name in canonical_names.iter() {
            if let Some(instantiated) = canonical_name.instantiate(
                &callee_signature,
                &via_type_of_features_added,
                &context.features,
            ) {
                instantiated_names.add(instantiated);
            }
        }

        // The frame is not propagated when no canonical name instantiated.
        if instantiated_names.is_empty() {
            continue;
        }

        let canonical_callee_port = propagated.callee_port().canonicalize_for_method();

        // CRTEX successors stay leaves: distance zero, canonical port,
        // instantiated names; every other field propagates as usual.
        result.add(
            propagated
                .with_distance(0)
                .with_callee_port(canonical_callee_port)
                .with_canonical_names(instantiated_names),
        );
    }

    result
}

fn materialize_via_type_of_ports(
    callee: MethodId,
    context: &Context,
    frame: &Frame,
    source_register_types: &[Option<TypeId>],
    via_type_of_features_added: &mut Vec<FeatureId>,
    inferred_features: &mut FeatureMayAlwaysSet,
) {
    for &port in frame.via_type_of_ports().iter() {
        match port.parameter_position() {
            Some(index) if (index as usize) < source_register_types.len() => {
                let feature = context
                    .features
                    .via_type_of_feature(source_register_types[index as usize], &context.types);
                via_type_of_features_added.push(feature);
                inferred_features.add_always(feature);
            }
            _ => {
                context.reporter().error(&format!(
                    "Invalid port {} provided for via_type_of ports of method {}",
                    port,
                    context.methods.signature(callee)
                ));
            }
        }
    }
}

fn materialize_via_value_of_ports(
    callee: MethodId,
    context: &Context,
    frame: &Frame,
    source_constant_arguments: &[Option<String>],
    inferred_features: &mut FeatureMayAlwaysSet,
) {
    for &port in frame.via_value_of_ports().iter() {
        match port.parameter_position() {
            Some(index) if (index as usize) < source_constant_arguments.len() => {
                let feature = context
                    .features
                    .via_value_of_feature(source_constant_arguments[index as usize].as_deref());
                inferred_features.add_always(feature);
            }
            _ => {
                context.reporter().error(&format!(
                    "Invalid port {} provided for via_value_of ports of method {}",
                    port,
                    context.methods.signature(callee)
                ));
            }
        }
    }
}

// =============================================================================
// Display
// =============================================================================

/// Context-resolving display for [`CallPositionFrames`]:
/// `[FrameByKind(kind=…, frames={…}), …]`, bottom as `[]`.
pub struct CallPositionFramesDisplay<'a> {
    frames: &'a CallPositionFrames,
    context: &'a Context,
}

impl std::fmt::Display for CallPositionFramesDisplay<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[")?;
        let mut groups: Vec<(String, &FrameSet)> = self
            .frames
            .iter_by_kind()
            .map(|(kind, frames)| (self.context.kinds.name(kind), frames))
            .collect();
        groups.sort_by(|left, right| left.0.cmp(&right.0));
        for (kind, frames) in groups {
            write!(f, "FrameByKind(kind={kind}, frames={{")?;
            let mut rendered: Vec<String> = frames
                .iter()
                .map(|frame| frame.display(self.context).to_string())
                .collect();
            rendered.sort();
            write!(f, "{}", rendered.join(", "))?;
            write!(f, "}}),")?;
        }
        write!(f, "]")
    }
}

// =============================================================================
// Tests
// =============================================================================
