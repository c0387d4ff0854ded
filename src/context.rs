//! Interning tables and the analysis context.
//!
//! Every identity the taint domain manipulates (methods, fields, kinds,
//! types, positions, features) is interned into a table owned by the
//! [`Context`] and referenced through a small `Copy` handle. Equality and
//! hashing of handles is id equality/hashing, which gives the same cheap
//! identity semantics as pointer interning while staying index-based.
//!
//! Tables are read-mostly and internally synchronized with a
//! [`parking_lot::RwLock`], so concurrent workers of a parallel fixpoint can
//! intern and resolve handles without external locking. Taint values
//! themselves are plain owned aggregates and never touch the tables except
//! to look names up.
//!
//! Error reporting from the propagation engine goes through the injected
//! [`Reporter`] so the domain code stays pure; the default implementation
//! forwards to `tracing`.

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

// =============================================================================
// Handles
// =============================================================================

macro_rules! intern_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug,
            Clone,
            Copy,
            PartialEq,
            Eq,
            Hash,
            PartialOrd,
            Ord,
            Serialize,
            Deserialize,
        )]
        pub struct $name(u32);

        impl $name {
            /// Raw table index, for diagnostics only.
            #[inline]
            pub fn index(self) -> u32 {
                self.0
            }
        }
    };
}

intern_id!(
    /// Handle to an interned JVM method signature.
    MethodId
);
intern_id!(
    /// Handle to an interned JVM field signature.
    FieldId
);
intern_id!(
    /// Handle to an interned taint kind name.
    KindId
);
intern_id!(
    /// Handle to an interned JVM type name.
    TypeId
);
intern_id!(
    /// Handle to an interned feature name.
    FeatureId
);
intern_id!(
    /// Handle to an interned source position.
    PositionId
);

// =============================================================================
// String interner
// =============================================================================

/// A concurrent append-only string interner.
///
/// Ids are dense indices and remain stable for the lifetime of the table.
#[derive(Debug, Default)]
struct InternTable {
    inner: RwLock<InternInner>,
}

#[derive(Debug, Default)]
struct InternInner {
    ids: FxHashMap<String, u32>,
    names: Vec<String>,
}

impl InternTable {
    fn intern(&self, name: &str) -> u32 {
        if let Some(&id) = self.inner.read().ids.get(name) {
            return id;
        }
        let mut inner = self.inner.write();
        // Another writer may have inserted between the two locks.
        if let Some(&id) = inner.ids.get(name) {
            return id;
        }
        let id = u32::try_from(inner.names.len()).expect("interning table overflow");
        inner.names.push(name.to_string());
        inner.ids.insert(name.to_string(), id);
        id
    }

    fn resolve(&self, id: u32) -> String {
        self.inner.read().names[id as usize].clone()
    }

    fn len(&self) -> usize {
        self.inner.read().names.len()
    }
}

// =============================================================================
// Typed tables
// =============================================================================

/// Interning table for JVM method signatures (e.g. `LView;.onClick:()V`).
#[derive(Debug, Default)]
pub struct Methods {
    table: InternTable,
}

impl Methods {
    /// Intern a method signature.
    pub fn get(&self, signature: &str) -> MethodId {
        MethodId(self.table.intern(signature))
    }

    /// Resolve a handle back to its signature.
    pub fn signature(&self, method: MethodId) -> String {
        self.table.resolve(method.0)
    }

    /// Number of interned methods.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Interning table for JVM field signatures.
#[derive(Debug, Default)]
pub struct Fields {
    table: InternTable,
}

impl Fields {
    /// Intern a field signature.
    pub fn get(&self, signature: &str) -> FieldId {
        FieldId(self.table.intern(signature))
    }

    /// Resolve a handle back to its signature.
    pub fn signature(&self, field: FieldId) -> String {
        self.table.resolve(field.0)
    }
}

/// Interning table for taint kind names.
#[derive(Debug, Default)]
pub struct Kinds {
    table: InternTable,
}

/// Kind name reserved for taint introduced by the analysis itself rather
/// than by a user model.
const ARTIFICIAL_SOURCE: &str = "ArtificialSource";

impl Kinds {
    /// Intern a kind name.
    pub fn get(&self, name: &str) -> KindId {
        KindId(self.table.intern(name))
    }

    /// The distinguished artificial-source kind.
    pub fn artificial_source(&self) -> KindId {
        self.get(ARTIFICIAL_SOURCE)
    }

    /// Resolve a handle back to its name.
    pub fn name(&self, kind: KindId) -> String {
        self.table.resolve(kind.0)
    }
}

/// Interning table for JVM type names, used for via-type-of features.
#[derive(Debug, Default)]
pub struct Types {
    table: InternTable,
}

impl Types {
    /// Intern a type name.
    pub fn get(&self, name: &str) -> TypeId {
        TypeId(self.table.intern(name))
    }

    /// Resolve a handle back to its name.
    pub fn name(&self, ty: TypeId) -> String {
        self.table.resolve(ty.0)
    }
}

// =============================================================================
// Positions
// =============================================================================

/// A resolved source position: `(path, line)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    /// Source file path, if known.
    pub path: Option<String>,
    /// Line number (1-indexed, 0 when unknown).
    pub line: i32,
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.path {
            Some(path) => write!(f, "{}:{}", path, self.line),
            None => write!(f, "<unknown>:{}", self.line),
        }
    }
}

/// Interning table for source positions.
#[derive(Debug, Default)]
pub struct Positions {
    inner: RwLock<PositionsInner>,
}

#[derive(Debug, Default)]
struct PositionsInner {
    ids: FxHashMap<Position, u32>,
    positions: Vec<Position>,
}

impl Positions {
    /// Intern a `(path, line)` pair.
    pub fn get(&self, path: Option<&str>, line: i32) -> PositionId {
        let position = Position {
            path: path.map(str::to_string),
            line,
        };
        if let Some(&id) = self.inner.read().ids.get(&position) {
            return PositionId(id);
        }
        let mut inner = self.inner.write();
        if let Some(&id) = inner.ids.get(&position) {
            return PositionId(id);
        }
        let id = u32::try_from(inner.positions.len()).expect("position table overflow");
        inner.positions.push(position.clone());
        inner.ids.insert(position, id);
        PositionId(id)
    }

    /// Intern a position with an unknown file.
    pub fn unknown(&self, line: i32) -> PositionId {
        self.get(None, line)
    }

    /// Resolve a handle back to its position.
    pub fn resolve(&self, position: PositionId) -> Position {
        self.inner.read().positions[position.0 as usize].clone()
    }
}

// =============================================================================
// Feature factory
// =============================================================================

/// Interning table and factory for features.
///
/// Besides plain user-named features, the factory mints the conventional
/// names for features materialized at call sites: via-type-of, via-value-of,
/// via-cast and via-shim.
#[derive(Debug, Default)]
pub struct Features {
    table: InternTable,
}

impl Features {
    /// Intern a feature name.
    pub fn get(&self, name: &str) -> FeatureId {
        FeatureId(self.table.intern(name))
    }

    /// Resolve a handle back to its name.
    pub fn name(&self, feature: FeatureId) -> String {
        self.table.resolve(feature.0)
    }

    /// Feature recording the runtime type of a caller argument.
    pub fn via_type_of_feature(&self, ty: Option<TypeId>, types: &Types) -> FeatureId {
        match ty {
            Some(ty) => self.get(&format!("via-type:{}", types.name(ty))),
            None => self.get("via-type:unknown"),
        }
    }

    /// Feature recording the constant value of a caller argument.
    pub fn via_value_of_feature(&self, value: Option<&str>) -> FeatureId {
        match value {
            Some(value) => self.get(&format!("via-value:{value}")),
            None => self.get("via-value:unknown"),
        }
    }

    /// Feature recording a cast the taint flowed through.
    pub fn via_cast_feature(&self, ty: Option<TypeId>, types: &Types) -> FeatureId {
        match ty {
            Some(ty) => self.get(&format!("via-cast:{}", types.name(ty))),
            None => self.get("via-cast:unknown"),
        }
    }

    /// Feature recording the shim method a flow was routed through.
    pub fn via_shim_feature(&self, method: Option<MethodId>, methods: &Methods) -> FeatureId {
        match method {
            Some(method) => self.get(&format!("via-shim:{}", methods.signature(method))),
            None => self.get("via-shim:unknown"),
        }
    }
}

// =============================================================================
// Reporter
// =============================================================================

/// Injected sink for user-input problems found during propagation.
///
/// Propagation never aborts on malformed models (invalid via-ports, missing
/// canonical names); it reports through this trait and continues with a
/// best-effort result.
pub trait Reporter: Send + Sync {
    /// Report a recoverable error (e.g. an out-of-range via-port).
    fn error(&self, message: &str);

    /// Report a warning (e.g. a CRTEX frame without canonical names).
    fn warn(&self, message: &str);
}

/// Default reporter forwarding to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn error(&self, message: &str) {
        tracing::error!(target: "dexflow", "{message}");
    }

    fn warn(&self, message: &str) {
        tracing::warn!(target: "dexflow", "{message}");
    }
}

// =============================================================================
// Context
// =============================================================================

/// The analysis context: interning tables, the feature factory and the
/// error reporter.
///
/// The taint domain only ever reads from the tables; growing them happens
/// through interning, which is internally synchronized.
pub struct Context {
    /// Method signature table.
    pub methods: Methods,
    /// Field signature table.
    pub fields: Fields,
    /// Taint kind table.
    pub kinds: Kinds,
    /// JVM type name table.
    pub types: Types,
    /// Source position table.
    pub positions: Positions,
    /// Feature table and factory.
    pub features: Features,
    reporter: Box<dyn Reporter>,
}

impl Context {
    /// Create a context reporting through `tracing`.
    pub fn new() -> Self {
        Self::with_reporter(Box::new(TracingReporter))
    }

    /// Create a context with a custom reporter.
    pub fn with_reporter(reporter: Box<dyn Reporter>) -> Self {
        Self {
            methods: Methods::default(),
            fields: Fields::default(),
            kinds: Kinds::default(),
            types: Types::default(),
            positions: Positions::default(),
            features: Features::default(),
            reporter,
        }
    }

    /// The injected reporter.
    #[inline]
    pub fn reporter(&self) -> &dyn Reporter {
        &*self.reporter
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("methods", &self.methods.len())
            .field("kinds", &self.kinds.table.len())
            .field("features", &self.features.table.len())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Tests
// =============================================================================
