//! Property-based tests for the lattice laws of the taint domain.
//!
//! Taint values are generated from a small universe of kinds, callees,
//! ports and features; any two generated values are compatible because the
//! hashed groups only ever compare entries that share their callee and call
//! position.

use proptest::prelude::*;

use dexflow::{
    AbstractDomain, AccessPath, Context, FeatureMayAlwaysSet, FeatureSet, FieldSet, Frame,
    MethodSet, Root, Taint,
};

/// A plain-data description of a frame, materialized against a context
/// inside each property.
#[derive(Debug, Clone)]
struct FrameSeed {
    kind: u8,
    callee: u8,
    port: u8,
    distance: u8,
    position: u8,
    origins: u8,
    may_features: u8,
    always_features: u8,
    user_features: u8,
}

fn frame_seed() -> impl Strategy<Value = FrameSeed> {
    (
        0..3u8,
        0..3u8,
        0..3u8,
        0..3u8,
        0..2u8,
        0..4u8,
        0..4u8,
        0..4u8,
        0..2u8,
    )
        .prop_map(
            |(
                kind,
                callee,
                port,
                distance,
                position,
                origins,
                may_features,
                always_features,
                user_features,
            )| FrameSeed {
                kind,
                callee,
                port,
                distance,
                position,
                origins,
                may_features,
                always_features,
                user_features,
            },
        )
}

fn taint_seed() -> impl Strategy<Value = Vec<FrameSeed>> {
    prop::collection::vec(frame_seed(), 0..6)
}

fn materialize(context: &Context, seeds: &[FrameSeed]) -> Taint {
    let mut taint = Taint::new();
    for seed in seeds {
        taint.add(materialize_frame(context, seed));
    }
    taint
}

fn materialize_frame(context: &Context, seed: &FrameSeed) -> Frame {
    let kind = context.kinds.get(&format!("Kind{}", seed.kind));
    let port = match seed.port {
        0 => AccessPath::from_root(Root::Return),
        1 => AccessPath::from_root(Root::Argument(0)),
        _ => AccessPath::from_root(Root::Argument(1)),
    };

    let mut frame = Frame::new(kind, port);

    if seed.callee > 0 {
        let callee = context.methods.get(&format!("LCallee{};.run:()V", seed.callee));
        let position = context
            .positions
            .get(Some("App.java"), i32::from(seed.position) + 1);
        frame = frame
            .with_callee(callee)
            .with_call_position(position)
            .with_distance(u32::from(seed.distance) + 1);
    }

    let origins: MethodSet = (0..2)
        .filter(|bit| seed.origins & (1 << bit) != 0)
        .map(|bit| context.methods.get(&format!("LOrigin{bit};.source:()V")))
        .collect();
    frame = frame.with_origins(origins);

    let may: FeatureSet = (0..2)
        .filter(|bit| (seed.may_features | seed.always_features) & (1 << bit) != 0)
        .map(|bit| context.features.get(&format!("f{bit}")))
        .collect();
    let always: FeatureSet = (0..2)
        .filter(|bit| seed.always_features & (1 << bit) != 0)
        .map(|bit| context.features.get(&format!("f{bit}")))
        .collect();
    frame = frame.with_inferred_features(FeatureMayAlwaysSet::from_sets(may, always));

    if seed.user_features > 0 {
        frame = frame.with_user_features(FeatureSet::singleton(context.features.get("uf")));
    }

    frame
}

proptest! {
    /// ⊑ is reflexive and bottom is the least element.
    #[test]
    fn prop_leq_reflexive_and_bottom_least(seeds in taint_seed()) {
        let context = Context::new();
        let x = materialize(&context, &seeds);

        prop_assert!(x.leq(&x));
        prop_assert!(Taint::bottom().leq(&x));
    }

    /// x ⊑ x ⊔ y, and join is commutative.
    #[test]
    fn prop_join_is_upper_bound_and_commutative(
        left in taint_seed(),
        right in taint_seed(),
    ) {
        let context = Context::new();
        let x = materialize(&context, &left);
        let y = materialize(&context, &right);

        let xy = x.clone().join(y.clone());
        let yx = y.clone().join(x.clone());

        prop_assert!(x.leq(&xy));
        prop_assert!(y.leq(&xy));
        prop_assert_eq!(xy, yx);
    }

    /// (x ⊔ y) ⊔ z = x ⊔ (y ⊔ z).
    #[test]
    fn prop_join_is_associative(
        a in taint_seed(),
        b in taint_seed(),
        c in taint_seed(),
    ) {
        let context = Context::new();
        let x = materialize(&context, &a);
        let y = materialize(&context, &b);
        let z = materialize(&context, &c);

        let left = x.clone().join(y.clone()).join(z.clone());
        let right = x.join(y.join(z));
        prop_assert_eq!(left, right);
    }

    /// x ⊔ ⊥ = x and x ⊓ ⊥ = ⊥.
    #[test]
    fn prop_bottom_identities(seeds in taint_seed()) {
        let context = Context::new();
        let x = materialize(&context, &seeds);

        prop_assert_eq!(x.clone().join(Taint::bottom()), x.clone());

        let mut met = x;
        met.meet_with(Taint::bottom());
        prop_assert!(met.is_bottom());
    }

    /// Join is idempotent: x ⊔ x = x.
    #[test]
    fn prop_join_idempotent(seeds in taint_seed()) {
        let context = Context::new();
        let x = materialize(&context, &seeds);
        prop_assert_eq!(x.clone().join(x.clone()), x);
    }

    /// x \ x = ⊥ and x \ ⊥ = x.
    #[test]
    fn prop_difference_self_and_bottom(seeds in taint_seed()) {
        let context = Context::new();
        let x = materialize(&context, &seeds);

        let mut self_diff = x.clone();
        self_diff.difference_with(&x);
        prop_assert!(self_diff.is_bottom());

        let mut bottom_diff = x.clone();
        bottom_diff.difference_with(&Taint::bottom());
        prop_assert_eq!(bottom_diff, x);
    }

    /// If y ⊑ x then (x \ y) ⊔ y ⊒ x.
    #[test]
    fn prop_difference_recovers_with_join(
        base in taint_seed(),
        extra in taint_seed(),
    ) {
        let context = Context::new();
        let y = materialize(&context, &base);
        let x = y.clone().join(materialize(&context, &extra));
        prop_assert!(y.leq(&x));

        let mut difference = x.clone();
        difference.difference_with(&y);
        let recovered = difference.join(y);
        prop_assert!(x.leq(&recovered));
    }

    /// Adding the same inferred feature twice is the same as adding it once.
    #[test]
    fn prop_add_inferred_features_idempotent(seeds in taint_seed()) {
        let context = Context::new();
        let mut x = materialize(&context, &seeds);
        let feature = FeatureMayAlwaysSet::make_always([context.features.get("idem")]);

        x.add_inferred_features(&feature);
        let once = x.clone();
        x.add_inferred_features(&feature);
        prop_assert_eq!(x, once);
    }

    /// transform_kind_with_features(identity, ⊥) is the identity and the
    /// constant-drop transform is bottom.
    #[test]
    fn prop_transform_kind_identity_and_drop(seeds in taint_seed()) {
        let context = Context::new();
        let x = materialize(&context, &seeds);

        let identity = x.transform_kind_with_features(
            |kind| vec![kind],
            |_| FeatureMayAlwaysSet::bottom(),
        );
        prop_assert_eq!(&identity, &x);

        let dropped = x.transform_kind_with_features(
            |_| Vec::new(),
            |_| FeatureMayAlwaysSet::bottom(),
        );
        prop_assert!(dropped.is_bottom());
    }

    /// attach_position preserves origins and field origins exactly, and
    /// resets distance and callee.
    #[test]
    fn prop_attach_position_preserves_origins(seeds in taint_seed()) {
        let context = Context::new();
        let x = materialize(&context, &seeds);
        let position = context.positions.get(Some("Attach.java"), 1);

        let attached = x.attach_position(position);

        let mut expected_origins = MethodSet::bottom();
        let mut expected_field_origins = FieldSet::bottom();
        for frame in x.frames().filter(|frame| frame.is_leaf()) {
            expected_origins.join_with(frame.origins().clone());
            expected_field_origins.join_with(frame.field_origins().clone());
        }

        let mut attached_origins = MethodSet::bottom();
        let mut attached_field_origins = FieldSet::bottom();
        for frame in attached.frames() {
            prop_assert_eq!(frame.callee(), None);
            prop_assert_eq!(frame.distance(), 0);
            prop_assert_eq!(frame.call_position(), Some(position));
            attached_origins.join_with(frame.origins().clone());
            attached_field_origins.join_with(frame.field_origins().clone());
        }

        prop_assert_eq!(attached_origins, expected_origins);
        prop_assert_eq!(attached_field_origins, expected_field_origins);
    }

    /// Widening and narrowing agree with join and meet on this finite
    /// domain.
    #[test]
    fn prop_widen_narrow_default_to_join_meet(
        left in taint_seed(),
        right in taint_seed(),
    ) {
        let context = Context::new();
        let x = materialize(&context, &left);
        let y = materialize(&context, &right);

        let mut widened = x.clone();
        widened.widen_with(y.clone());
        prop_assert_eq!(widened, x.clone().join(y.clone()));

        let mut narrowed = x.clone();
        narrowed.narrow_with(y.clone());
        let mut met = x;
        met.meet_with(y);
        prop_assert_eq!(narrowed, met);
    }
}
