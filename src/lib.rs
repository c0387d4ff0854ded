//! dexflow: the abstract taint domain of a static taint-flow analyzer for
//! compiled JVM/Android bytecode.
//!
//! An interprocedural data-flow fixpoint (external to this crate) tracks
//! how tainted data moves between methods. At every program point its state
//! is a [`Taint`] value: a hierarchical lattice of [`Frame`]s grouped by
//! callee, call position and kind. This crate owns that representation and
//! the algebra over it:
//!
//! - the lattice operations (`leq`, join, widen, meet, narrow, difference)
//!   at every level of the hierarchy, recursing structurally;
//! - [`Taint::propagate`], which advances the state across a call boundary
//!   with distance accounting, via-type-of / via-value-of feature
//!   materialization and canonical-name instantiation for
//!   cross-repository-external (CRTEX) leaves;
//! - the kind-transformation and filtering primitives behind sanitizer,
//!   sink-transform and pruning passes
//!   ([`Taint::transform_kind_with_features`],
//!   [`Taint::filter_invalid_frames`], [`Taint::append_callee_port`]);
//! - [`Taint::attach_position`], which rebuilds leaf frames as synthetic
//!   leaves at a concrete position.
//!
//! # Architecture
//!
//! 1. **Context** ([`context`]): interning tables for methods, fields,
//!    kinds, types, positions and features. Handles are `Copy` ids with
//!    identity equality; tables are internally synchronized and read-mostly.
//! 2. **Lattice combinators** ([`domain`]): the [`AbstractDomain`] trait,
//!    hashed-set domains and the may/always feature pair.
//! 3. **IR values** ([`ir`]): access paths (roots plus field paths) and
//!    canonical names for CRTEX leaves.
//! 4. **Taint tower** ([`taint`]): `Frame` → `FrameSet` →
//!    `CallPositionFrames` → `CalleeFrames` → `Taint`.
//!
//! # Concurrency
//!
//! The domain is thread-compatible but not internally synchronized: each
//! fixpoint worker owns its `Taint` values, and only the Context tables are
//! shared (they synchronize themselves). No operation blocks or suspends;
//! propagation terminates because the distance strictly increases toward
//! the analysis budget.
//!
//! # Example
//!
//! ```
//! use dexflow::{AbstractDomain, AccessPath, Context, Frame, Root, Taint};
//!
//! let context = Context::new();
//! let kind = context.kinds.get("UserControlled");
//! let origin = context.methods.get("LRequest;.getParam:()Ljava/lang/String;");
//! let callee = context.methods.get("LHandler;.handle:()V");
//! let position = context.positions.get(Some("Handler.java"), 17);
//!
//! let taint = Taint::from_iter([Frame::new(
//!     kind,
//!     AccessPath::from_root(Root::Return),
//! )
//! .with_origins([origin].into_iter().collect())]);
//!
//! let propagated = taint.propagate(
//!     callee,
//!     &AccessPath::from_root(Root::Argument(0)),
//!     position,
//!     /* maximum_source_sink_distance */ 100,
//!     &Default::default(),
//!     &context,
//!     &[],
//!     &[],
//! );
//! assert!(!propagated.is_bottom());
//! assert_eq!(propagated.frames().next().unwrap().distance(), 1);
//! ```

pub mod context;
pub mod domain;
pub mod error;
pub mod ir;
pub mod taint;

pub use context::{
    Context, FeatureId, Features, FieldId, Fields, KindId, Kinds, MethodId, Methods, Position,
    PositionId, Positions, Reporter, TracingReporter, TypeId, Types,
};
pub use domain::{
    AbstractDomain, CanonicalNameSet, FeatureMayAlwaysSet, FeatureSet, FieldSet, LocalPositionSet,
    MethodSet, RootSet, SetDomain,
};
pub use error::{DexflowError, Result};
pub use ir::{AccessPath, CanonicalName, Path, PathElement, Root};
pub use taint::{CallPositionFrames, CalleeFrames, Frame, FrameSet, Taint};
