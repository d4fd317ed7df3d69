//! Decoded-frame cache contract and the slot-pool implementation.
//!
//! The decode pipeline writes every picture into a cache slot, then either
//! commits it (visible to PTS lookups) or discards it (decode failure,
//! timestamp violation). Lookups are by exact presentation time or by
//! "lowest PTS strictly above" ordering, which is how forward playback
//! walks decoded frames that arrive out of decode order.

use splice_core::{DecodedFrame, PixelFormat};
use tracing::debug;

/// Handle to a cache slot between `acquire` and `commit`/`discard`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotId(pub usize);

/// Cache of decoded frames for one source.
pub trait FrameCache: Send + Sync {
    /// Reserve a free slot for decoding into. `None` signals exhaustion;
    /// the caller must retry after consumption or flush.
    fn acquire(&mut self) -> Option<SlotId>;

    /// Access the frame in a reserved or committed slot.
    fn slot(&self, id: SlotId) -> &DecodedFrame;
    fn slot_mut(&mut self, id: SlotId) -> &mut DecodedFrame;

    /// Make a reserved slot visible to lookups.
    fn commit(&mut self, id: SlotId);

    /// Return a reserved slot to the free pool without publishing it.
    fn discard(&mut self, id: SlotId);

    /// Committed frame with exactly this presentation time.
    fn get_by_pts(&self, pts: u64) -> Option<&DecodedFrame>;

    /// Committed frame with the lowest presentation time strictly above
    /// `pts`.
    fn next_after(&self, pts: u64) -> Option<&DecodedFrame>;

    /// Drop all frames and free every slot.
    fn flush(&mut self);

    /// Log the cache contents, for diagnosing failed lookups.
    fn dump(&self);
}

// ── Slot pool implementation ────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Free,
    Reserved,
    Ready,
}

struct Slot {
    frame: DecodedFrame,
    state: SlotState,
}

/// Fixed-size slot pool cache.
///
/// Frames are allocated once up front and reused; there is no eviction.
/// The decode pipeline flushes the cache on every keyframe seek, which
/// bounds occupancy to one GOP plus decoder lag.
pub struct SlotCache {
    slots: Vec<Slot>,
}

impl SlotCache {
    /// Allocate `capacity` slots sized for `width` x `height` frames.
    pub fn new(capacity: usize, width: u32, height: u32, format: PixelFormat) -> Self {
        let slots = (0..capacity)
            .map(|_| Slot {
                frame: DecodedFrame::new(width, height, format),
                state: SlotState::Free,
            })
            .collect();
        Self { slots }
    }

    /// Number of committed frames currently visible to lookups.
    pub fn committed(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.state == SlotState::Ready)
            .count()
    }
}

impl FrameCache for SlotCache {
    fn acquire(&mut self) -> Option<SlotId> {
        let idx = self
            .slots
            .iter()
            .position(|s| s.state == SlotState::Free)?;
        self.slots[idx].state = SlotState::Reserved;
        Some(SlotId(idx))
    }

    fn slot(&self, id: SlotId) -> &DecodedFrame {
        &self.slots[id.0].frame
    }

    fn slot_mut(&mut self, id: SlotId) -> &mut DecodedFrame {
        &mut self.slots[id.0].frame
    }

    fn commit(&mut self, id: SlotId) {
        self.slots[id.0].state = SlotState::Ready;
    }

    fn discard(&mut self, id: SlotId) {
        self.slots[id.0].state = SlotState::Free;
    }

    fn get_by_pts(&self, pts: u64) -> Option<&DecodedFrame> {
        self.slots
            .iter()
            .find(|s| s.state == SlotState::Ready && s.frame.pts == Some(pts))
            .map(|s| &s.frame)
    }

    fn next_after(&self, pts: u64) -> Option<&DecodedFrame> {
        self.slots
            .iter()
            .filter(|s| s.state == SlotState::Ready)
            .filter_map(|s| s.frame.pts.filter(|&p| p > pts).map(|p| (p, &s.frame)))
            .min_by_key(|&(p, _)| p)
            .map(|(_, f)| f)
    }

    fn flush(&mut self) {
        for slot in &mut self.slots {
            slot.state = SlotState::Free;
            slot.frame.pts = None;
        }
    }

    fn dump(&self) {
        for (i, slot) in self.slots.iter().enumerate() {
            if slot.state == SlotState::Ready {
                debug!(slot = i, pts = ?slot.frame.pts, "cached frame");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> SlotCache {
        SlotCache::new(4, 16, 16, PixelFormat::Yuv420P)
    }

    #[test]
    fn acquire_commit_lookup() {
        let mut c = cache();
        let id = c.acquire().unwrap();
        c.slot_mut(id).pts = Some(40_000);
        c.commit(id);
        assert!(c.get_by_pts(40_000).is_some());
        assert!(c.get_by_pts(0).is_none());
    }

    #[test]
    fn discarded_slots_stay_invisible() {
        let mut c = cache();
        let id = c.acquire().unwrap();
        c.slot_mut(id).pts = Some(40_000);
        c.discard(id);
        assert!(c.get_by_pts(40_000).is_none());
        assert_eq!(c.committed(), 0);
    }

    #[test]
    fn next_after_returns_lowest_above() {
        let mut c = cache();
        for pts in [80_000_u64, 0, 40_000] {
            let id = c.acquire().unwrap();
            c.slot_mut(id).pts = Some(pts);
            c.commit(id);
        }
        assert_eq!(c.next_after(0).unwrap().pts, Some(40_000));
        assert_eq!(c.next_after(40_000).unwrap().pts, Some(80_000));
        assert!(c.next_after(80_000).is_none());
    }

    #[test]
    fn exhaustion_and_flush() {
        let mut c = cache();
        let ids: Vec<_> = (0..4).map(|_| c.acquire().unwrap()).collect();
        assert!(c.acquire().is_none());
        for id in ids {
            c.commit(id);
        }
        c.flush();
        assert_eq!(c.committed(), 0);
        assert!(c.acquire().is_some());
    }
}
