//! End-to-end propagation scenarios across the whole taint tower.

use std::sync::{Arc, Mutex};

use dexflow::{
    AbstractDomain, AccessPath, CanonicalName, CanonicalNameSet, Context, FeatureMayAlwaysSet,
    FeatureSet, Frame, MethodSet, PathElement, Reporter, Root, RootSet, Taint,
};

const MAX_DISTANCE: u32 = 100;

/// Reporter capturing everything for assertions.
#[derive(Debug, Default, Clone)]
struct CapturingReporter {
    errors: Arc<Mutex<Vec<String>>>,
    warnings: Arc<Mutex<Vec<String>>>,
}

impl Reporter for CapturingReporter {
    fn error(&self, message: &str) {
        self.errors.lock().unwrap().push(message.to_string());
    }

    fn warn(&self, message: &str) {
        self.warnings.lock().unwrap().push(message.to_string());
    }
}

fn capturing_context() -> (Context, CapturingReporter) {
    let reporter = CapturingReporter::default();
    let context = Context::with_reporter(Box::new(reporter.clone()));
    (context, reporter)
}

// =============================================================================
// Add / merge
// =============================================================================

#[test]
fn test_add_merges_frames_with_equal_grouping_key() {
    let context = Context::new();
    let kind = context.kinds.get("K1");
    let one = context.methods.get("LOne;.one:()V");
    let two = context.methods.get("LTwo;.two:()V");
    let f1 = context.features.get("f1");
    let f2 = context.features.get("f2");
    let uf1 = context.features.get("uf1");

    let mut taint = Taint::new();
    taint.add(
        Frame::new(kind, AccessPath::from_root(Root::Return))
            .with_origins(MethodSet::singleton(one))
            .with_inferred_features(FeatureMayAlwaysSet::make_may([f1])),
    );
    taint.add(
        Frame::new(kind, AccessPath::from_root(Root::Return))
            .with_origins(MethodSet::singleton(two))
            .with_inferred_features(FeatureMayAlwaysSet::make_may([f2]))
            .with_user_features(FeatureSet::singleton(uf1)),
    );

    assert_eq!(taint.num_frames(), 1);
    let frame = taint.frames().next().unwrap();
    assert_eq!(frame.origins(), &[one, two].into_iter().collect());
    assert_eq!(
        frame.inferred_features().may(),
        [f1, f2].into_iter().collect()
    );
    assert!(frame.inferred_features().always().is_empty());
    assert_eq!(frame.user_features(), &FeatureSet::singleton(uf1));
}

// =============================================================================
// Distance accounting
// =============================================================================

#[test]
fn test_propagate_drops_frames_beyond_distance_budget() {
    let context = Context::new();
    let kind = context.kinds.get("K1");
    let callee = context.methods.get("LOne;.one:()V");
    let next_callee = context.methods.get("LTwo;.two:()V");
    let position = context.positions.get(Some("App.java"), 10);

    let taint = Taint::from_iter([Frame::new(kind, AccessPath::from_root(Root::Return))
        .with_callee(callee)
        .with_distance(2)]);

    let propagated = taint.propagate(
        next_callee,
        &AccessPath::from_root(Root::Argument(0)),
        position,
        /* maximum_source_sink_distance */ 1,
        &FeatureMayAlwaysSet::bottom(),
        &context,
        &[],
        &[],
    );

    assert!(propagated.is_bottom());
}

#[test]
fn test_propagate_collapses_per_kind_and_increments_distance() {
    let context = Context::new();
    let kind_one = context.kinds.get("K1");
    let kind_two = context.kinds.get("K2");
    let callee = context.methods.get("LOne;.one:()V");
    let next_callee = context.methods.get("LTwo;.two:()V");
    let position = context.positions.get(Some("App.java"), 17);
    let port = AccessPath::from_root(Root::Argument(0));

    let taint = Taint::from_iter([
        Frame::new(kind_one, AccessPath::from_root(Root::Return))
            .with_callee(callee)
            .with_distance(1)
            .with_origins(MethodSet::singleton(callee)),
        Frame::new(kind_two, AccessPath::from_root(Root::Return))
            .with_callee(callee)
            .with_origins(MethodSet::singleton(callee)),
    ]);

    let propagated = taint.propagate(
        next_callee,
        &port,
        position,
        MAX_DISTANCE,
        &FeatureMayAlwaysSet::bottom(),
        &context,
        &[],
        &[],
    );

    assert_eq!(propagated.num_frames(), 2);
    for frame in propagated.frames() {
        assert_eq!(frame.callee(), Some(next_callee));
        assert_eq!(frame.callee_port(), &port);
        assert_eq!(frame.call_position(), Some(position));
        let expected_distance = if frame.kind() == kind_one { 2 } else { 1 };
        assert_eq!(frame.distance(), expected_distance);
        assert_eq!(frame.origins(), &MethodSet::singleton(callee));
        assert!(frame.locally_inferred_features().is_empty());
        assert!(frame.user_features().is_empty());
        assert!(frame.local_positions().is_empty());
    }
}

#[test]
fn test_propagate_takes_minimum_distance_within_a_kind() {
    let context = Context::new();
    let kind = context.kinds.get("K1");
    let callee = context.methods.get("LOne;.one:()V");
    let next_callee = context.methods.get("LTwo;.two:()V");
    let position = context.positions.get(Some("App.java"), 17);

    let taint = Taint::from_iter([
        Frame::new(kind, AccessPath::from_root(Root::Return))
            .with_callee(callee)
            .with_distance(1),
        Frame::new(kind, AccessPath::from_root(Root::Return))
            .with_callee(callee)
            .with_distance(3),
    ]);

    let propagated = taint.propagate(
        next_callee,
        &AccessPath::from_root(Root::Argument(0)),
        position,
        MAX_DISTANCE,
        &FeatureMayAlwaysSet::bottom(),
        &context,
        &[],
        &[],
    );

    assert_eq!(propagated.num_frames(), 1);
    assert_eq!(propagated.frames().next().unwrap().distance(), 2);
}

#[test]
fn test_propagate_adds_extra_features_as_locally_inferred() {
    let context = Context::new();
    let kind = context.kinds.get("K1");
    let next_callee = context.methods.get("LTwo;.two:()V");
    let position = context.positions.get(Some("App.java"), 17);
    let extra = context.features.get("via-obscure");

    let taint = Taint::from_iter([Frame::new(kind, AccessPath::from_root(Root::Return))]);

    let propagated = taint.propagate(
        next_callee,
        &AccessPath::from_root(Root::Argument(0)),
        position,
        MAX_DISTANCE,
        &FeatureMayAlwaysSet::make_always([extra]),
        &context,
        &[],
        &[],
    );

    let frame = propagated.frames().next().unwrap();
    assert!(frame.inferred_features().always().contains(&extra));
    assert!(frame.locally_inferred_features().always().contains(&extra));
}

// =============================================================================
// Via-port materialization
// =============================================================================

#[test]
fn test_via_type_of_ports_materialize_as_always_features() {
    let context = Context::new();
    let kind = context.kinds.get("K1");
    let next_callee = context.methods.get("LTwo;.two:()V");
    let position = context.positions.get(Some("App.java"), 17);
    let string_type = context.types.get("Ljava/lang/String;");

    let taint = Taint::from_iter([Frame::new(kind, AccessPath::from_root(Root::Return))
        .with_via_type_of_ports(RootSet::singleton(Root::Argument(0)))]);

    let propagated = taint.propagate(
        next_callee,
        &AccessPath::from_root(Root::Argument(0)),
        position,
        MAX_DISTANCE,
        &FeatureMayAlwaysSet::bottom(),
        &context,
        &[Some(string_type)],
        &[],
    );

    let expected = context
        .features
        .via_type_of_feature(Some(string_type), &context.types);
    let frame = propagated.frames().next().unwrap();
    assert!(frame.inferred_features().always().contains(&expected));
    // Via-ports are consumed by materialization.
    assert!(frame.via_type_of_ports().is_empty());
}

#[test]
fn test_via_value_of_ports_materialize_from_constants() {
    let context = Context::new();
    let kind = context.kinds.get("K1");
    let next_callee = context.methods.get("LTwo;.two:()V");
    let position = context.positions.get(Some("App.java"), 17);

    let taint = Taint::from_iter([Frame::new(kind, AccessPath::from_root(Root::Return))
        .with_via_value_of_ports(RootSet::singleton(Root::Argument(1)))]);

    let propagated = taint.propagate(
        next_callee,
        &AccessPath::from_root(Root::Argument(0)),
        position,
        MAX_DISTANCE,
        &FeatureMayAlwaysSet::bottom(),
        &context,
        &[],
        &[None, Some("table_name".to_string())],
    );

    let expected = context.features.via_value_of_feature(Some("table_name"));
    let frame = propagated.frames().next().unwrap();
    assert!(frame.inferred_features().always().contains(&expected));
}

#[test]
fn test_invalid_via_port_reports_error_and_continues() {
    let (context, reporter) = capturing_context();
    let kind = context.kinds.get("K1");
    let next_callee = context.methods.get("LTwo;.two:()V");
    let position = context.positions.get(Some("App.java"), 17);

    // Return is not an argument; Argument(5) is out of range.
    let mut ports = RootSet::new();
    ports.add(Root::Return);
    ports.add(Root::Argument(5));
    let taint = Taint::from_iter([
        Frame::new(kind, AccessPath::from_root(Root::Return)).with_via_type_of_ports(ports),
    ]);

    let propagated = taint.propagate(
        next_callee,
        &AccessPath::from_root(Root::Argument(0)),
        position,
        MAX_DISTANCE,
        &FeatureMayAlwaysSet::bottom(),
        &context,
        &[None],
        &[],
    );

    // Both ports were skipped but propagation still produced a frame.
    assert_eq!(propagated.num_frames(), 1);
    assert_eq!(reporter.errors.lock().unwrap().len(), 2);
    assert!(reporter.errors.lock().unwrap()[0].contains("via_type_of"));
}

// =============================================================================
// CRTEX propagation
// =============================================================================

#[test]
fn test_crtex_frame_instantiates_canonical_names() {
    let context = Context::new();
    let kind = context.kinds.get("K1");
    let next_callee = context.methods.get("LTwo;.two:()V");
    let position = context.positions.get(Some("App.java"), 17);

    let taint = Taint::from_iter([Frame::new(kind, AccessPath::from_root(Root::Anchor))
        .with_canonical_names(CanonicalNameSet::singleton(CanonicalName::template(
            "%programmatic_leaf_name%",
        )))]);

    let propagated = taint.propagate(
        next_callee,
        &AccessPath::from_root(Root::Anchor),
        position,
        MAX_DISTANCE,
        &FeatureMayAlwaysSet::bottom(),
        &context,
        &[],
        &[],
    );

    assert_eq!(propagated.num_frames(), 1);
    let frame = propagated.frames().next().unwrap();
    // CRTEX successors stay leaves: distance zero with a canonical port.
    assert_eq!(frame.distance(), 0);
    assert_eq!(frame.callee(), Some(next_callee));
    assert_eq!(frame.callee_port().to_string(), "Anchor.Argument(-1)");
    assert_eq!(
        frame.canonical_names(),
        &CanonicalNameSet::singleton(CanonicalName::instantiated("LTwo;.two:()V"))
    );
}

#[test]
fn test_crtex_frame_without_canonical_names_warns_and_is_skipped() {
    let (context, reporter) = capturing_context();
    let kind = context.kinds.get("K1");
    let next_callee = context.methods.get("LTwo;.two:()V");
    let position = context.positions.get(Some("App.java"), 17);

    let taint = Taint::from_iter([Frame::new(kind, AccessPath::from_root(Root::Anchor))]);

    let propagated = taint.propagate(
        next_callee,
        &AccessPath::from_root(Root::Anchor),
        position,
        MAX_DISTANCE,
        &FeatureMayAlwaysSet::bottom(),
        &context,
        &[],
        &[],
    );

    assert!(propagated.is_bottom());
    let warnings = reporter.warnings.lock().unwrap();
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].contains("without canonical names"));
}

// =============================================================================
// attach_position
// =============================================================================

#[test]
fn test_attach_position_builds_synthetic_leaves() {
    let context = Context::new();
    let kind = context.kinds.get("K1");
    let origin = context.methods.get("LOrigin;.source:()V");
    let callee = context.methods.get("LOne;.one:()V");
    let position = context.positions.get(Some("App.java"), 33);
    let uf1 = context.features.get("uf1");

    let taint = Taint::from_iter([
        Frame::new(kind, AccessPath::from_root(Root::Return))
            .with_origins(MethodSet::singleton(origin))
            .with_user_features(FeatureSet::singleton(uf1)),
        // Non-leaf frames are ignored.
        Frame::new(kind, AccessPath::from_root(Root::Return))
            .with_callee(callee)
            .with_distance(1),
    ]);

    let attached = taint.attach_position(position);

    assert_eq!(attached.num_frames(), 1);
    let leaf = attached.frames().next().unwrap();
    assert_eq!(leaf.callee(), None);
    assert_eq!(leaf.distance(), 0);
    assert_eq!(leaf.call_position(), Some(position));
    assert_eq!(leaf.origins(), &MethodSet::singleton(origin));
    assert!(leaf.user_features().is_empty());
    assert!(leaf.locally_inferred_features().always().contains(&uf1));
}

// =============================================================================
// Kind transformation
// =============================================================================

#[test]
fn test_transform_kind_with_feature_add_fans_out() {
    let context = Context::new();
    let kind = context.kinds.get("K1");
    let transform_one = context.kinds.get("T1");
    let transform_two = context.kinds.get("T2");
    let f1 = context.features.get("f1");
    let uf1 = context.features.get("uf1");

    let taint = Taint::from_iter([Frame::new(kind, AccessPath::from_root(Root::Return))
        .with_user_features(FeatureSet::singleton(uf1))]);

    let transformed = taint.transform_kind_with_features(
        |old| vec![old, transform_one, transform_two],
        |_| FeatureMayAlwaysSet::make_always([f1]),
    );

    assert_eq!(transformed.num_frames(), 3);
    for expected in [kind, transform_one, transform_two] {
        assert!(transformed.contains_kind(expected));
    }
    for frame in transformed.frames() {
        assert!(frame.locally_inferred_features().always().contains(&f1));
        assert_eq!(frame.user_features(), &FeatureSet::singleton(uf1));
    }
}

#[test]
fn test_transform_kind_collision_weakens_always_features() {
    let context = Context::new();
    let kind_one = context.kinds.get("K1");
    let kind_two = context.kinds.get("K2");
    let merged = context.kinds.get("Merged");
    let f1 = context.features.get("f1");
    let f2 = context.features.get("f2");

    let taint = Taint::from_iter([
        Frame::new(kind_one, AccessPath::from_root(Root::Return))
            .with_inferred_features(FeatureMayAlwaysSet::make_always([f1])),
        Frame::new(kind_two, AccessPath::from_root(Root::Return))
            .with_inferred_features(FeatureMayAlwaysSet::make_always([f2])),
    ]);

    let transformed =
        taint.transform_kind_with_features(|_| vec![merged], |_| FeatureMayAlwaysSet::bottom());

    // Both kinds collapsed into one frame; the joined always-features
    // degrade to may-features.
    assert_eq!(transformed.num_frames(), 1);
    let frame = transformed.frames().next().unwrap();
    assert_eq!(frame.kind(), merged);
    assert_eq!(
        frame.inferred_features().may(),
        [f1, f2].into_iter().collect()
    );
    assert!(frame.inferred_features().always().is_empty());
}

// =============================================================================
// append_callee_port / filter_invalid_frames
// =============================================================================

#[test]
fn test_append_callee_port_only_touches_filtered_kinds() {
    let context = Context::new();
    let kind_one = context.kinds.get("K1");
    let kind_two = context.kinds.get("K2");

    let mut taint = Taint::from_iter([
        Frame::new(kind_one, AccessPath::from_root(Root::Argument(0))),
        Frame::new(kind_two, AccessPath::from_root(Root::Argument(0))),
    ]);

    taint.append_callee_port(&PathElement::field("payload"), |kind| kind == kind_one);

    for frame in taint.frames() {
        let expected = if frame.kind() == kind_one {
            "Argument(0).payload"
        } else {
            "Argument(0)"
        };
        assert_eq!(frame.callee_port().to_string(), expected);
    }
}

#[test]
fn test_filter_invalid_frames_drops_exactly_invalid() {
    let context = Context::new();
    let kind_one = context.kinds.get("K1");
    let kind_two = context.kinds.get("K2");
    let callee = context.methods.get("LOne;.one:()V");

    let mut taint = Taint::from_iter([
        Frame::new(kind_one, AccessPath::from_root(Root::Return)),
        Frame::new(kind_two, AccessPath::from_root(Root::Return))
            .with_callee(callee)
            .with_distance(1),
    ]);

    taint.filter_invalid_frames(|frame_callee, _, _| frame_callee.is_some());

    assert_eq!(taint.num_frames(), 1);
    assert!(!taint.contains_kind(kind_one));
    assert!(taint.contains_kind(kind_two));

    taint.filter_invalid_frames(|_, _, _| false);
    assert!(taint.is_bottom());
}

// =============================================================================
// Difference
// =============================================================================

#[test]
fn test_difference_with_superset_is_bottom() {
    let context = Context::new();
    let kind = context.kinds.get("K1");
    let one = context.methods.get("LOne;.one:()V");
    let two = context.methods.get("LTwo;.two:()V");

    let mut x = Taint::from_iter([Frame::new(kind, AccessPath::from_root(Root::Return))
        .with_origins(MethodSet::singleton(one))]);
    let y = Taint::from_iter([Frame::new(kind, AccessPath::from_root(Root::Return))
        .with_origins([one, two].into_iter().collect())]);

    x.difference_with(&y);
    assert!(x.is_bottom());
}

// =============================================================================
// JSON rendering
// =============================================================================

#[test]
fn test_to_json_shape() {
    let context = Context::new();
    let kind = context.kinds.get("UserControlled");
    let origin = context.methods.get("LRequest;.getParam:()Ljava/lang/String;");

    let taint = Taint::from_iter([Frame::new(kind, AccessPath::from_root(Root::Return))
        .with_origins(MethodSet::singleton(origin))]);

    let json = taint.to_json(&context);
    let frames = json.as_array().unwrap();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0]["kind"], "UserControlled");
    assert_eq!(frames[0]["callee_port"], "Return");
    assert_eq!(
        frames[0]["origins"],
        serde_json::json!(["LRequest;.getParam:()Ljava/lang/String;"])
    );
}
