//! Access paths.
//!
//! An access path names where taint enters or leaves a method: a root
//! (return value, argument index, or one of the leaf markers) followed by an
//! ordered sequence of field names. Textual forms round-trip through
//! `Display`/`FromStr`:
//!
//! ```text
//! Return
//! Argument(1)
//! Argument(1).payload.data
//! Anchor.Argument(-1)
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DexflowError;

// =============================================================================
// Root
// =============================================================================

/// The root of an access path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Root {
    /// The method's return value.
    Return,
    /// A leaf frame with no concrete port.
    Leaf,
    /// A cross-repository anchor leaf.
    Anchor,
    /// A cross-repository producer leaf.
    Producer,
    /// The argument at the given index.
    Argument(u32),
}

impl Root {
    /// Whether this root is an argument.
    #[inline]
    pub fn is_argument(self) -> bool {
        matches!(self, Root::Argument(_))
    }

    /// The argument index, if this root is an argument.
    #[inline]
    pub fn parameter_position(self) -> Option<u32> {
        match self {
            Root::Argument(index) => Some(index),
            _ => None,
        }
    }

    /// Whether this root marks a cross-repository leaf.
    #[inline]
    pub fn is_crtex_leaf(self) -> bool {
        matches!(self, Root::Anchor | Root::Producer)
    }
}

impl fmt::Display for Root {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Root::Return => write!(f, "Return"),
            Root::Leaf => write!(f, "Leaf"),
            Root::Anchor => write!(f, "Anchor"),
            Root::Producer => write!(f, "Producer"),
            Root::Argument(index) => write!(f, "Argument({index})"),
        }
    }
}

impl FromStr for Root {
    type Err = DexflowError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input {
            "Return" => Ok(Root::Return),
            "Leaf" => Ok(Root::Leaf),
            "Anchor" => Ok(Root::Anchor),
            "Producer" => Ok(Root::Producer),
            _ => {
                let index = input
                    .strip_prefix("Argument(")
                    .and_then(|rest| rest.strip_suffix(')'))
                    .and_then(|index| index.parse::<u32>().ok())
                    .ok_or_else(|| DexflowError::InvalidRoot(input.to_string()))?;
                Ok(Root::Argument(index))
            }
        }
    }
}

// =============================================================================
// Path elements
// =============================================================================

/// One element of a field path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PathElement(String);

impl PathElement {
    /// A named field element.
    pub fn field(name: impl Into<String>) -> Self {
        PathElement(name.into())
    }

    /// The conventional argument marker element used by canonical ports,
    /// e.g. `Argument(-1)`.
    pub fn argument(index: i32) -> Self {
        PathElement(format!("Argument({index})"))
    }

    /// The element's textual form.
    #[inline]
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PathElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An ordered sequence of field-path elements.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Path(Vec<PathElement>);

impl Path {
    /// The empty path.
    #[inline]
    pub fn new() -> Self {
        Path(Vec::new())
    }

    /// Build from elements.
    pub fn from_elements(elements: impl IntoIterator<Item = PathElement>) -> Self {
        Path(elements.into_iter().collect())
    }

    /// Append an element.
    pub fn append(&mut self, element: PathElement) {
        self.0.push(element);
    }

    /// Iterate over the elements in order.
    pub fn elements(&self) -> impl Iterator<Item = &PathElement> {
        self.0.iter()
    }

    /// Whether the path has no elements.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of elements.
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }
}

// =============================================================================
// Access path
// =============================================================================

/// A root plus a field path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccessPath {
    root: Root,
    path: Path,
}

impl AccessPath {
    /// Build from a root and a path.
    pub fn new(root: Root, path: Path) -> Self {
        AccessPath { root, path }
    }

    /// Build a rootless-field access path from just a root.
    pub fn from_root(root: Root) -> Self {
        AccessPath {
            root,
            path: Path::new(),
        }
    }

    /// The root.
    #[inline]
    pub fn root(&self) -> Root {
        self.root
    }

    /// The field path.
    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a field-path element in place.
    pub fn append(&mut self, element: PathElement) {
        self.path.append(element);
    }

    /// The canonical form of this port once its frame is attached to a
    /// concrete callee.
    ///
    /// An `Anchor` root drops its path in favor of the conventional
    /// `Argument(-1)` marker; every other root is kept unchanged.
    pub fn canonicalize_for_method(&self) -> AccessPath {
        match self.root {
            Root::Anchor => AccessPath::new(
                Root::Anchor,
                Path::from_elements([PathElement::argument(-1)]),
            ),
            _ => self.clone(),
        }
    }
}

impl Default for AccessPath {
    fn default() -> Self {
        AccessPath::from_root(Root::Leaf)
    }
}

impl fmt::Display for AccessPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.root)?;
        for element in self.path.elements() {
            write!(f, ".{element}")?;
        }
        Ok(())
    }
}

impl FromStr for AccessPath {
    type Err = DexflowError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        // `Argument(1).payload` splits on the dots after the root form.
        let (root_text, path_text) = match input.find(").") {
            Some(index) => (&input[..=index], Some(&input[index + 2..])),
            None => match input.split_once('.') {
                Some((root, path)) => (root, Some(path)),
                None => (input, None),
            },
        };

        let root = root_text
            .parse::<Root>()
            .map_err(|_| DexflowError::invalid_access_path(input, "unknown root"))?;

        let mut path = Path::new();
        if let Some(path_text) = path_text {
            for element in path_text.split('.') {
                if element.is_empty() {
                    return Err(DexflowError::invalid_access_path(
                        input,
                        "empty path element",
                    ));
                }
                path.append(PathElement::field(element));
            }
        }

        Ok(AccessPath::new(root, path))
    }
}

// =============================================================================
// Tests
// =============================================================================
