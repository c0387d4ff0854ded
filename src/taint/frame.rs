//! A single taint fact.

use serde_json::Value;

use crate::context::{Context, FieldId, KindId, MethodId, PositionId};
use crate::domain::{
    AbstractDomain, CanonicalNameSet, FeatureMayAlwaysSet, FeatureSet, FieldSet, LocalPositionSet,
    MethodSet, RootSet,
};
use crate::ir::{AccessPath, PathElement};

/// One atomic taint fact: taint of `kind` reaches `callee` at `callee_port`
/// at `call_position`, having travelled `distance` hops from its origin
/// methods/fields, carrying features and local positions.
///
/// Leaf frames have no callee and distance zero. Frames are immutable
/// values from the point of view of the containers: every mutating
/// operation runs on an exclusively-owned instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    kind: KindId,
    callee_port: AccessPath,
    callee: Option<MethodId>,
    field_callee: Option<FieldId>,
    call_position: Option<PositionId>,
    distance: u32,
    origins: MethodSet,
    field_origins: FieldSet,
    inferred_features: FeatureMayAlwaysSet,
    locally_inferred_features: FeatureMayAlwaysSet,
    user_features: FeatureSet,
    via_type_of_ports: RootSet,
    via_value_of_ports: RootSet,
    local_positions: LocalPositionSet,
    canonical_names: CanonicalNameSet,
}

/// The grouping key inside a by-kind frame set: frames that agree on it are
/// merged by joining their remaining fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct FrameKey {
    callee: Option<MethodId>,
    callee_port: AccessPath,
    call_position: Option<PositionId>,
    distance: u32,
    field_callee: Option<FieldId>,
}

impl Frame {
    /// A leaf frame of the given kind at the given port. Everything else
    /// starts empty; use the `with_*` builders to fill fields in.
    pub fn new(kind: KindId, callee_port: AccessPath) -> Self {
        Frame {
            kind,
            callee_port,
            callee: None,
            field_callee: None,
            call_position: None,
            distance: 0,
            origins: MethodSet::new(),
            field_origins: FieldSet::new(),
            inferred_features: FeatureMayAlwaysSet::bottom(),
            locally_inferred_features: FeatureMayAlwaysSet::bottom(),
            user_features: FeatureSet::new(),
            via_type_of_ports: RootSet::new(),
            via_value_of_ports: RootSet::new(),
            local_positions: LocalPositionSet::new(),
            canonical_names: CanonicalNameSet::new(),
        }
    }

    // -- builders -------------------------------------------------------------

    /// Replace the kind.
    pub fn with_kind(mut self, kind: KindId) -> Self {
        self.kind = kind;
        self
    }

    /// Replace the callee port.
    pub fn with_callee_port(mut self, callee_port: AccessPath) -> Self {
        self.callee_port = callee_port;
        self
    }

    /// Set the callee.
    pub fn with_callee(mut self, callee: impl Into<Option<MethodId>>) -> Self {
        self.callee = callee.into();
        self
    }

    /// Set the field callee.
    pub fn with_field_callee(mut self, field_callee: impl Into<Option<FieldId>>) -> Self {
        self.field_callee = field_callee.into();
        self
    }

    /// Set the call position.
    pub fn with_call_position(mut self, call_position: impl Into<Option<PositionId>>) -> Self {
        self.call_position = call_position.into();
        self
    }

    /// Set the distance.
    pub fn with_distance(mut self, distance: u32) -> Self {
        self.distance = distance;
        self
    }

    /// Set the origin methods.
    pub fn with_origins(mut self, origins: MethodSet) -> Self {
        self.origins = origins;
        self
    }

    /// Set the origin fields.
    pub fn with_field_origins(mut self, field_origins: FieldSet) -> Self {
        self.field_origins = field_origins;
        self
    }

    /// Set the inferred features.
    pub fn with_inferred_features(mut self, features: FeatureMayAlwaysSet) -> Self {
        self.inferred_features = features;
        self
    }

    /// Set the locally inferred features.
    pub fn with_locally_inferred_features(mut self, features: FeatureMayAlwaysSet) -> Self {
        self.locally_inferred_features = features;
        self
    }

    /// Set the user features.
    pub fn with_user_features(mut self, features: FeatureSet) -> Self {
        self.user_features = features;
        self
    }

    /// Set the via-type-of ports.
    pub fn with_via_type_of_ports(mut self, ports: RootSet) -> Self {
        self.via_type_of_ports = ports;
        self
    }

    /// Set the via-value-of ports.
    pub fn with_via_value_of_ports(mut self, ports: RootSet) -> Self {
        self.via_value_of_ports = ports;
        self
    }

    /// Set the local positions.
    pub fn with_local_positions(mut self, positions: LocalPositionSet) -> Self {
        self.local_positions = positions;
        self
    }

    /// Set the canonical names.
    pub fn with_canonical_names(mut self, names: CanonicalNameSet) -> Self {
        self.canonical_names = names;
        self
    }

    // -- accessors ------------------------------------------------------------

    /// The taint kind.
    #[inline]
    pub fn kind(&self) -> KindId {
        self.kind
    }

    /// Where the taint enters or leaves the callee.
    #[inline]
    pub fn callee_port(&self) -> &AccessPath {
        &self.callee_port
    }

    /// The callee, `None` for leaf frames.
    #[inline]
    pub fn callee(&self) -> Option<MethodId> {
        self.callee
    }

    /// The field callee, for taint reached through a field access.
    #[inline]
    pub fn field_callee(&self) -> Option<FieldId> {
        self.field_callee
    }

    /// The call position.
    #[inline]
    pub fn call_position(&self) -> Option<PositionId> {
        self.call_position
    }

    /// Hop count from the nearest origin.
    #[inline]
    pub fn distance(&self) -> u32 {
        self.distance
    }

    /// Origin methods.
    #[inline]
    pub fn origins(&self) -> &MethodSet {
        &self.origins
    }

    /// Origin fields.
    #[inline]
    pub fn field_origins(&self) -> &FieldSet {
        &self.field_origins
    }

    /// Features inferred along the whole flow.
    #[inline]
    pub fn inferred_features(&self) -> &FeatureMayAlwaysSet {
        &self.inferred_features
    }

    /// Features inferred at the current hop only. Deliberately not required
    /// to be below `inferred_features`; keeping the two apart lets
    /// propagation attribute features to the hop that introduced them.
    #[inline]
    pub fn locally_inferred_features(&self) -> &FeatureMayAlwaysSet {
        &self.locally_inferred_features
    }

    /// Features attached by user models.
    #[inline]
    pub fn user_features(&self) -> &FeatureSet {
        &self.user_features
    }

    /// Ports whose runtime type materializes a feature at propagation.
    #[inline]
    pub fn via_type_of_ports(&self) -> &RootSet {
        &self.via_type_of_ports
    }

    /// Ports whose constant value materializes a feature at propagation.
    #[inline]
    pub fn via_value_of_ports(&self) -> &RootSet {
        &self.via_value_of_ports
    }

    /// Intra-procedural trace positions.
    #[inline]
    pub fn local_positions(&self) -> &LocalPositionSet {
        &self.local_positions
    }

    /// Canonical names, for CRTEX leaves.
    #[inline]
    pub fn canonical_names(&self) -> &CanonicalNameSet {
        &self.canonical_names
    }

    // -- predicates -----------------------------------------------------------

    /// Whether this is a leaf frame (no method or field callee).
    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.callee.is_none() && self.field_callee.is_none()
    }

    /// Whether this frame declares a cross-repository producer leaf.
    #[inline]
    pub fn is_crtex_producer_declaration(&self) -> bool {
        self.callee_port.root().is_crtex_leaf()
    }

    // -- operations -----------------------------------------------------------

    /// All features carried by this frame: the inferred features with the
    /// user features added as always-features.
    pub fn features(&self) -> FeatureMayAlwaysSet {
        if self.inferred_features.is_bottom() {
            return FeatureMayAlwaysSet::make_always(self.user_features.iter().copied());
        }
        let mut features = self.inferred_features.clone();
        for &feature in self.user_features.iter() {
            features.add_always(feature);
        }
        features
    }

    /// Merge features into both the inferred and the locally inferred sets,
    /// with may/always add semantics. Empty input is a no-op.
    pub fn add_inferred_features(&mut self, features: &FeatureMayAlwaysSet) {
        if features.is_empty() {
            return;
        }
        self.inferred_features.add_set(features);
        self.locally_inferred_features.add_set(features);
    }

    /// Record an intra-procedural trace position.
    pub fn add_local_position(&mut self, position: PositionId) {
        self.local_positions.add(position);
    }

    /// Replace the local positions.
    pub fn set_local_positions(&mut self, positions: LocalPositionSet) {
        self.local_positions = positions;
    }

    /// Append a path element to the callee port.
    pub fn callee_port_append(&mut self, element: PathElement) {
        self.callee_port.append(element);
    }

    // -- grouping -------------------------------------------------------------

    /// The key under which frames of one kind are merged.
    pub(crate) fn group_key(&self) -> FrameKey {
        FrameKey {
            callee: self.callee,
            callee_port: self.callee_port.clone(),
            call_position: self.call_position,
            distance: self.distance,
            field_callee: self.field_callee,
        }
    }

    /// Join another frame of the same kind and grouping key into this one.
    pub(crate) fn join_group_with(&mut self, other: Frame) {
        debug_assert_eq!(self.kind, other.kind, "grouped frames must share a kind");
        debug_assert_eq!(
            self.group_key(),
            other.group_key(),
            "grouped frames must share a grouping key"
        );
        self.origins.join_with(other.origins);
        self.field_origins.join_with(other.field_origins);
        self.inferred_features.join_with(other.inferred_features);
        self.locally_inferred_features
            .join_with(other.locally_inferred_features);
        self.user_features.join_with(other.user_features);
        self.via_type_of_ports.join_with(other.via_type_of_ports);
        self.via_value_of_ports.join_with(other.via_value_of_ports);
        self.local_positions.join_with(other.local_positions);
        self.canonical_names.join_with(other.canonical_names);
    }

    /// Meet another frame of the same kind and grouping key into this one.
    pub(crate) fn meet_group_with(&mut self, other: Frame) {
        debug_assert_eq!(self.kind, other.kind, "grouped frames must share a kind");
        debug_assert_eq!(
            self.group_key(),
            other.group_key(),
            "grouped frames must share a grouping key"
        );
        self.origins.meet_with(other.origins);
        self.field_origins.meet_with(other.field_origins);
        self.inferred_features.meet_with(other.inferred_features);
        self.locally_inferred_features
            .meet_with(other.locally_inferred_features);
        self.user_features.meet_with(other.user_features);
        self.via_type_of_ports.meet_with(other.via_type_of_ports);
        self.via_value_of_ports.meet_with(other.via_value_of_ports);
        self.local_positions.meet_with(other.local_positions);
        self.canonical_names.meet_with(other.canonical_names);
    }

    /// Whether `other` covers this frame in every non-key field. Both
    /// frames must share kind and grouping key.
    pub(crate) fn covered_by(&self, other: &Frame) -> bool {
        debug_assert_eq!(self.kind, other.kind);
        debug_assert_eq!(self.group_key(), other.group_key());
        self.origins.leq(&other.origins)
            && self.field_origins.leq(&other.field_origins)
            && self.inferred_features.leq(&other.inferred_features)
            && self
                .locally_inferred_features
                .leq(&other.locally_inferred_features)
            && self.user_features.leq(&other.user_features)
            && self.via_type_of_ports.leq(&other.via_type_of_ports)
            && self.via_value_of_ports.leq(&other.via_value_of_ports)
            && self.local_positions.leq(&other.local_positions)
            && self.canonical_names.leq(&other.canonical_names)
    }

    // -- rendering ------------------------------------------------------------

    /// Context-resolving display wrapper.
    pub fn display<'a>(&'a self, context: &'a Context) -> FrameDisplay<'a> {
        FrameDisplay {
            frame: self,
            context,
        }
    }

    /// Stable JSON rendering, resolved against the context.
    pub fn to_json(&self, context: &Context) -> Value {
        let mut object = serde_json::Map::new();
        object.insert("kind".into(), context.kinds.name(self.kind).into());
        object.insert("callee_port".into(), self.callee_port.to_string().into());
        if let Some(callee) = self.callee {
            object.insert("callee".into(), context.methods.signature(callee).into());
        }
        if let Some(field_callee) = self.field_callee {
            object.insert(
                "field_callee".into(),
                context.fields.signature(field_callee).into(),
            );
        }
        if let Some(position) = self.call_position {
            object.insert(
                "call_position".into(),
                context.positions.resolve(position).to_string().into(),
            );
        }
        if self.distance > 0 {
            object.insert("distance".into(), self.distance.into());
        }
        if !self.origins.is_empty() {
            object.insert(
                "origins".into(),
                sorted_strings(self.origins.iter().map(|&m| context.methods.signature(m))),
            );
        }
        if !self.field_origins.is_empty() {
            object.insert(
                "field_origins".into(),
                sorted_strings(
                    self.field_origins
                        .iter()
                        .map(|&f| context.fields.signature(f)),
                ),
            );
        }
        let features = self.features();
        if !features.is_empty() {
            object.insert(
                "may_features".into(),
                sorted_strings(features.may().iter().map(|&f| context.features.name(f))),
            );
            object.insert(
                "always_features".into(),
                sorted_strings(features.always().iter().map(|&f| context.features.name(f))),
            );
        }
        if !self.locally_inferred_features.is_empty() {
            object.insert(
                "locally_inferred_may_features".into(),
                sorted_strings(
                    self.locally_inferred_features
                        .may()
                        .iter()
                        .map(|&f| context.features.name(f)),
                ),
            );
            object.insert(
                "locally_inferred_always_features".into(),
                sorted_strings(
                    self.locally_inferred_features
                        .always()
                        .iter()
                        .map(|&f| context.features.name(f)),
                ),
            );
        }
        if !self.via_type_of_ports.is_empty() {
            object.insert(
                "via_type_of_ports".into(),
                sorted_strings(self.via_type_of_ports.iter().map(|port| port.to_string())),
            );
        }
        if !self.via_value_of_ports.is_empty() {
            object.insert(
                "via_value_of_ports".into(),
                sorted_strings(self.via_value_of_ports.iter().map(|port| port.to_string())),
            );
        }
        if !self.local_positions.is_empty() {
            object.insert(
                "local_positions".into(),
                sorted_strings(
                    self.local_positions
                        .iter()
                        .map(|&p| context.positions.resolve(p).to_string()),
                ),
            );
        }
        if !self.canonical_names.is_empty() {
            object.insert(
                "canonical_names".into(),
                sorted_strings(self.canonical_names.iter().map(|name| name.to_string())),
            );
        }
        Value::Object(object)
    }
}

fn sorted_strings(values: impl Iterator<Item = String>) -> Value {
    let mut values: Vec<String> = values.collect();
    values.sort();
    Value::Array(values.into_iter().map(Value::String).collect())
}

/// Context-resolving display for [`Frame`].
pub struct FrameDisplay<'a> {
    frame: &'a Frame,
    context: &'a Context,
}

impl std::fmt::Display for FrameDisplay<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let frame = self.frame;
        let context = self.context;
        write!(
            f,
            "Frame(kind={}, callee_port={}",
            context.kinds.name(frame.kind),
            frame.callee_port
        )?;
        if let Some(callee) = frame.callee {
            write!(f, ", callee={}", context.methods.signature(callee))?;
        }
        if let Some(field_callee) = frame.field_callee {
            write!(f, ", field_callee={}", context.fields.signature(field_callee))?;
        }
        if let Some(position) = frame.call_position {
            write!(f, ", call_position={}", context.positions.resolve(position))?;
        }
        if frame.distance > 0 {
            write!(f, ", distance={}", frame.distance)?;
        }
        if !frame.origins.is_empty() {
            let mut origins: Vec<String> = frame
                .origins
                .iter()
                .map(|&m| context.methods.signature(m))
                .collect();
            origins.sort();
            write!(f, ", origins={{{}}}", origins.join(", "))?;
        }
        if !frame.canonical_names.is_empty() {
            let mut names: Vec<String> = frame
                .canonical_names
                .iter()
                .map(|name| name.to_string())
                .collect();
            names.sort();
            write!(f, ", canonical_names={{{}}}", names.join(", "))?;
        }
        write!(f, ")")
    }
}
