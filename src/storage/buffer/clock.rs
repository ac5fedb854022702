//! Second-chance (clock) replacement.
//!
//! Every frame has a slot on a circular list. A frame is a candidate once it
//! is unpinned; the hand sweeps the list, clearing reference bits, and evicts
//! the first candidate whose bit is already clear.

use super::replacer::{FrameId, Replacer};
use log::trace;

#[derive(Debug, Clone, Copy, Default)]
struct ClockEntry {
    candidate: bool,
    referenced: bool,
}

#[derive(Debug)]
pub struct ClockReplacer {
    entries: Vec<ClockEntry>,
    hand: usize,
    candidates: usize,
}

impl ClockReplacer {
    pub fn new(num_frames: usize) -> Self {
        Self {
            entries: vec![ClockEntry::default(); num_frames],
            hand: 0,
            candidates: 0,
        }
    }

    pub fn hand_position(&self) -> usize {
        self.hand
    }

    fn advance_hand(&mut self) -> usize {
        let pos = self.hand;
        self.hand = (self.hand + 1) % self.entries.len();
        pos
    }
}

impl Replacer for ClockReplacer {
    fn evict(&mut self) -> Option<FrameId> {
        if self.candidates == 0 {
            return None;
        }

        // Two sweeps clear every reference bit at most once
        for _ in 0..2 * self.entries.len() {
            let pos = self.advance_hand();
            let entry = &mut self.entries[pos];
            if !entry.candidate {
                continue;
            }
            if entry.referenced {
                entry.referenced = false;
                continue;
            }

            entry.candidate = false;
            self.candidates -= 1;
            trace!("Clock hand evicts frame {}", pos);
            return Some(pos);
        }

        None
    }

    fn pin(&mut self, frame_id: FrameId) {
        if let Some(entry) = self.entries.get_mut(frame_id) {
            if entry.candidate {
                self.candidates -= 1;
            }
            *entry = ClockEntry::default();
        }
    }

    fn unpin(&mut self, frame_id: FrameId) {
        if let Some(entry) = self.entries.get_mut(frame_id) {
            if !entry.candidate {
                entry.candidate = true;
                self.candidates += 1;
            }
            entry.referenced = true;
        }
    }

    fn size(&self) -> usize {
        self.candidates
    }
}
