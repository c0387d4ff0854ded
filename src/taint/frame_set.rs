//! Group-hashed set of frames sharing one kind.

use rustc_hash::FxHashMap;

use crate::domain::AbstractDomain;
use crate::taint::frame::{Frame, FrameKey};

/// A set of frames of a single kind, hashed by their grouping key
/// `(callee, callee_port, call_position, distance, field_callee)`.
///
/// Inserting a frame whose key is already present merges the two by joining
/// their remaining fields (origins, features, via-ports, local positions,
/// canonical names).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FrameSet {
    frames: FxHashMap<FrameKey, Frame>,
}

impl FrameSet {
    /// The empty set.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a frame, merging with an existing frame of the same key.
    pub fn add(&mut self, frame: Frame) {
        match self.frames.entry(frame.group_key()) {
            std::collections::hash_map::Entry::Occupied(mut entry) => {
                entry.get_mut().join_group_with(frame);
            }
            std::collections::hash_map::Entry::Vacant(entry) => {
                entry.insert(frame);
            }
        }
    }

    /// Number of distinct frame groups.
    #[inline]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Whether the set is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Iterate over the frames in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = &Frame> {
        self.frames.values()
    }

    /// Apply `f` to every frame, re-bucketing afterwards: the mutation may
    /// change grouping-key fields (e.g. the callee port), in which case
    /// colliding frames merge.
    pub fn map(&mut self, mut f: impl FnMut(&mut Frame)) {
        let frames = std::mem::take(&mut self.frames);
        for (_, mut frame) in frames {
            f(&mut frame);
            self.add(frame);
        }
    }

    /// Keep only the frames for which `predicate` holds.
    pub fn filter(&mut self, mut predicate: impl FnMut(&Frame) -> bool) {
        self.frames.retain(|_, frame| predicate(frame));
    }

    /// Remove every frame that is covered by the corresponding frame of
    /// `other` in every field; frames not fully covered are retained
    /// unchanged.
    pub fn difference_with(&mut self, other: &FrameSet) {
        self.frames.retain(|key, frame| {
            other
                .frames
                .get(key)
                .map_or(true, |other_frame| !frame.covered_by(other_frame))
        });
    }
}

impl AbstractDomain for FrameSet {
    fn bottom() -> Self {
        Self::new()
    }

    fn is_bottom(&self) -> bool {
        self.frames.is_empty()
    }

    fn leq(&self, other: &Self) -> bool {
        self.frames.iter().all(|(key, frame)| {
            other
                .frames
                .get(key)
                .is_some_and(|other_frame| frame.covered_by(other_frame))
        })
    }

    fn join_with(&mut self, other: Self) {
        for (_, frame) in other.frames {
            self.add(frame);
        }
    }

    fn meet_with(&mut self, other: Self) {
        let mut other_frames = other.frames;
        self.frames.retain(|key, _| other_frames.contains_key(key));
        for (key, frame) in self.frames.iter_mut() {
            if let Some(other_frame) = other_frames.remove(key) {
                frame.meet_group_with(other_frame);
            }
        }
    }
}

impl FromIterator<Frame> for FrameSet {
    fn from_iter<I: IntoIterator<Item = Frame>>(iter: I) -> Self {
        let mut set = FrameSet::new();
        for frame in iter {
            set.add(frame);
        }
        set
    }
}
