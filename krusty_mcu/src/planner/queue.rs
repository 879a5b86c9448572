//! Four-slot move queue shared by the fill loop and the step interrupt.
//!
//! A slot is live while its step count is non-zero, so full and empty fall out
//! of a single load without a separate counter. The step count is also the
//! publish flag: the producer stores the delta first and then releases the
//! count, the consumer acquires the count before it reads the delta. Freeing a
//! slot is the mirror image, a release store of zero once the consumer is done
//! with it.

use core::sync::atomic::{AtomicI32, AtomicU8, AtomicU32, Ordering};

use thiserror::Error;

pub const PLANNER_QUEUE_SIZE: usize = 4;

const INDEX_MASK: u8 = (PLANNER_QUEUE_SIZE - 1) as u8;
const _: () = assert!(PLANNER_QUEUE_SIZE.is_power_of_two());

/// Every slot is live. Back off and retry on a later pass of the fill loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("planner queue full")]
pub struct QueueFull;

#[derive(Debug)]
pub struct MoveQueue {
    next_dc: [AtomicI32; PLANNER_QUEUE_SIZE],
    next_n: [AtomicU32; PLANNER_QUEUE_SIZE],
    head: AtomicU8,
    tail: AtomicU8,
}

impl Default for MoveQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MoveQueue {
    pub const fn new() -> Self {
        Self {
            next_dc: [const { AtomicI32::new(0) }; PLANNER_QUEUE_SIZE],
            next_n: [const { AtomicU32::new(0) }; PLANNER_QUEUE_SIZE],
            head: AtomicU8::new(0),
            tail: AtomicU8::new(0),
        }
    }

    /// Frees every slot and rewinds both cursors. Exclusive access means
    /// neither side can be mid-operation.
    pub fn reset(&mut self) {
        for dc in &mut self.next_dc {
            *dc.get_mut() = 0;
        }
        for n in &mut self.next_n {
            *n.get_mut() = 0;
        }
        *self.head.get_mut() = 0;
        *self.tail.get_mut() = 0;
    }

    #[inline]
    pub fn head(&self) -> usize {
        self.head.load(Ordering::Relaxed) as usize
    }

    #[inline]
    pub fn tail(&self) -> usize {
        self.tail.load(Ordering::Relaxed) as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.next_n[self.head()].load(Ordering::Acquire) == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.next_n[self.tail()].load(Ordering::Acquire) != 0
    }

    /// Remaining steps and delta of a slot, for diagnostics.
    pub fn slot(&self, index: usize) -> (u32, i32) {
        let index = index & INDEX_MASK as usize;
        let n = self.next_n[index].load(Ordering::Acquire);
        (n, self.next_dc[index].load(Ordering::Relaxed))
    }

    pub fn live_slots(&self) -> usize {
        self.next_n
            .iter()
            .filter(|n| n.load(Ordering::Acquire) != 0)
            .count()
    }

    /// Sum of the remaining steps over all live slots.
    pub fn pending_steps(&self) -> u64 {
        self.next_n
            .iter()
            .map(|n| n.load(Ordering::Acquire) as u64)
            .sum()
    }

    /// Producer side. Publishes a new slot at the tail.
    pub(crate) fn insert(&self, steps: u32, delta: i32) -> Result<(), QueueFull> {
        debug_assert!(steps != 0, "zero-step slot would read as free");
        let tail = self.tail.load(Ordering::Relaxed);
        let slot = tail as usize;
        if self.next_n[slot].load(Ordering::Acquire) != 0 {
            return Err(QueueFull);
        }
        self.next_dc[slot].store(delta, Ordering::Relaxed);
        self.next_n[slot].store(steps, Ordering::Release);
        self.tail.store((tail + 1) & INDEX_MASK, Ordering::Relaxed);
        Ok(())
    }

    /// Consumer side. The head slot's step count and delta, if it is live.
    #[inline]
    pub(crate) fn front(&self) -> Option<(u32, i32)> {
        let slot = self.head();
        match self.next_n[slot].load(Ordering::Acquire) {
            0 => None,
            n => Some((n, self.next_dc[slot].load(Ordering::Relaxed))),
        }
    }

    /// Consumer side. Takes one step from the head slot and returns how many
    /// are left in it. The last step retires the slot.
    #[inline]
    pub(crate) fn take_step(&self) -> Option<u32> {
        let slot = self.head();
        match self.next_n[slot].load(Ordering::Acquire) {
            0 => None,
            1 => {
                self.advance_head();
                Some(0)
            }
            n => {
                // Only the consumer writes a live slot's count.
                self.next_n[slot].store(n - 1, Ordering::Relaxed);
                Some(n - 1)
            }
        }
    }

    /// Consumer side. Frees the head slot and moves on to the next one. The
    /// slot must be fully drained; whatever it still held is lost.
    pub(crate) fn advance_head(&self) {
        let head = self.head.load(Ordering::Relaxed);
        self.next_n[head as usize].store(0, Ordering::Release);
        self.head.store((head + 1) & INDEX_MASK, Ordering::Relaxed);
    }
}
