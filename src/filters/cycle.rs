//! Frames leased to a filter for the duration of one processing cycle.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::filters::{ReaderId, WriterId};
use crate::frames::Frame;
use crate::queue::{ReadGuard, WriteGuard};

/// Input frames taken from the filter's readers for one cycle, keyed by reader id.
///
/// Every frame is consumed from its queue when the cycle ends.
#[derive(Debug, Default)]
pub struct InputFrames {
    frames: BTreeMap<ReaderId, ReadGuard>,
}

impl InputFrames {
    pub(crate) fn insert(&mut self, reader_id: ReaderId, guard: ReadGuard) {
        self.frames.insert(reader_id, guard);
    }

    pub fn get(&self, reader_id: ReaderId) -> Option<&dyn Frame> {
        self.frames.get(&reader_id).map(|guard| guard.frame())
    }

    /// Frame of the lowest-numbered reader that delivered one.
    pub fn first(&self) -> Option<&dyn Frame> {
        self.frames.values().next().map(|guard| guard.frame())
    }

    /// Shared handle behind `reader_id`, when the upstream filter publishes shared frames.
    pub fn shared(&self, reader_id: ReaderId) -> Option<&Arc<dyn Frame>> {
        self.frames.get(&reader_id).and_then(|guard| guard.shared())
    }

    pub fn reader_ids(&self) -> impl Iterator<Item = ReaderId> + '_ {
        self.frames.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ReaderId, &dyn Frame)> + '_ {
        self.frames.iter().map(|(id, guard)| (*id, guard.frame()))
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

/// Output slots acquired on every open writer for one cycle.
///
/// In shared-frame mode every writer exposes the same frame, taken from the filter's
/// shared pool, and [`OutputFrames::frame_mut`] returns that frame regardless of the
/// writer id. Otherwise each writer has its own slot frame.
///
/// A transformation chooses which writers publish with [`OutputFrames::select`]; when
/// it reports output without selecting anything, every writer publishes.
#[derive(Debug)]
pub struct OutputFrames {
    slots: BTreeMap<WriterId, WriteGuard>,
    selected: BTreeSet<WriterId>,
    shared: Option<Arc<dyn Frame>>,
}

impl OutputFrames {
    pub(crate) fn new(slots: BTreeMap<WriterId, WriteGuard>) -> Self {
        Self {
            slots,
            selected: BTreeSet::new(),
            shared: None,
        }
    }

    pub(crate) fn set_shared(&mut self, frame: Arc<dyn Frame>) {
        self.shared = Some(frame);
    }

    pub fn writer_ids(&self) -> impl Iterator<Item = WriterId> + '_ {
        self.slots.keys().copied()
    }

    pub fn contains(&self, writer_id: WriterId) -> bool {
        self.slots.contains_key(&writer_id)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn is_shared(&self) -> bool {
        self.shared.is_some()
    }

    /// Frame to fill for `writer_id`. `None` when that writer has no slot this cycle.
    pub fn frame_mut(&mut self, writer_id: WriterId) -> Option<&mut dyn Frame> {
        if !self.slots.contains_key(&writer_id) {
            return None;
        }
        match self.shared.as_mut() {
            Some(shared) => Arc::get_mut(shared).map(|frame| -> &mut dyn Frame { frame }),
            None => self.slots.get_mut(&writer_id).map(|slot| slot.frame_mut()),
        }
    }

    /// Frame of the lowest-numbered open writer.
    pub fn first_frame_mut(&mut self) -> Option<&mut dyn Frame> {
        let writer_id = *self.slots.keys().next()?;
        self.frame_mut(writer_id)
    }

    /// Mark `writer_id` for publication. Returns `false` when it has no slot.
    pub fn select(&mut self, writer_id: WriterId) -> bool {
        if self.slots.contains_key(&writer_id) {
            self.selected.insert(writer_id);
            true
        } else {
            false
        }
    }

    pub fn is_selected(&self, writer_id: WriterId) -> bool {
        self.selected.contains(&writer_id)
    }

    /// Commit the selected slots and hand unselected ones back unused.
    ///
    /// Returns the number of frames published and the shared frame, if any, so it can
    /// go back to the pool.
    pub(crate) fn publish(self, produced: bool) -> (usize, Option<Arc<dyn Frame>>) {
        let OutputFrames {
            slots,
            selected,
            shared,
        } = self;

        let mut published = 0;
        for (writer_id, slot) in slots {
            if !produced || !(selected.is_empty() || selected.contains(&writer_id)) {
                continue;
            }
            match &shared {
                Some(frame) => slot.commit_shared(Arc::clone(frame)),
                None => slot.commit(),
            }
            published += 1;
        }
        (published, shared)
    }
}
