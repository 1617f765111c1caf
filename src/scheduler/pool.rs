/*
 * Task Slot Pool
 *
 * Grow-only storage for task slots. Slots are kept in fixed-size blocks
 * that are heap-allocated one at a time and referenced from a fixed
 * spine of lazily-initialised cells, so a slot's address never changes
 * once its block exists. Raw queue links and callbacks holding slot
 * references therefore stay valid across growth.
 *
 * A task id is the dense index into this logical slot space:
 * block = id / TASK_BLOCK_SIZE, offset = id % TASK_BLOCK_SIZE.
 */

use core::sync::atomic::{AtomicUsize, Ordering};

use alloc::boxed::Box;
use spin::Once;

use super::task::{NO_TASK, RawId, TimerTask};
use crate::notify::{SchedulerNotice, notify};

/// Slots per pool block. Sized for the memory class of the target.
#[cfg(not(feature = "small-pool"))]
pub const TASK_BLOCK_SIZE: usize = 16;
#[cfg(feature = "small-pool")]
pub const TASK_BLOCK_SIZE: usize = 6;

/// Upper bound on pool growth; the pool never shrinks.
#[cfg(not(feature = "small-pool"))]
pub const MAX_TASK_BLOCKS: usize = 16;
#[cfg(feature = "small-pool")]
pub const MAX_TASK_BLOCKS: usize = 4;

type TaskBlock = Box<[TimerTask; TASK_BLOCK_SIZE]>;

pub(crate) struct SlotPool {
    blocks: [Once<TaskBlock>; MAX_TASK_BLOCKS],
    block_count: AtomicUsize,
}

impl SlotPool {
    /// Creates the pool with its first block ready, so early schedules
    /// never pay the growth path.
    pub fn new() -> Self {
        let pool = Self {
            blocks: core::array::from_fn(|_| Once::new()),
            block_count: AtomicUsize::new(0),
        };
        pool.grow();
        pool
    }

    /// Number of slots currently backed by storage.
    pub fn len(&self) -> usize {
        self.block_count.load(Ordering::SeqCst) * TASK_BLOCK_SIZE
    }

    /// Resolves a raw id to its slot; `None` for the sentinel and for
    /// indexes beyond the allocated blocks.
    pub fn at(&self, id: RawId) -> Option<&TimerTask> {
        if id == NO_TASK {
            return None;
        }
        let index = id as usize;
        let block = index / TASK_BLOCK_SIZE;
        if block >= MAX_TASK_BLOCKS {
            return None;
        }
        self.blocks[block]
            .get()
            .map(|slots| &slots[index % TASK_BLOCK_SIZE])
    }

    /// All slots in ascending index order, for walks and diagnostics.
    pub fn iter(&self) -> impl Iterator<Item = &TimerTask> {
        (0..self.len()).filter_map(|id| self.at(id as RawId))
    }

    /// Claims the lowest free slot, appending a block when every slot
    /// is taken. Returns `None` once the block cap is reached, after
    /// reporting the exhaustion.
    pub fn find_free(&self) -> Option<RawId> {
        loop {
            let limit = self.len();
            for id in 0..limit {
                if let Some(task) = self.at(id as RawId)
                    && task.try_claim()
                {
                    return Some(id as RawId);
                }
            }
            if !self.grow() {
                notify(SchedulerNotice::PoolFull);
                log::error!("task pool exhausted at {} slots", limit);
                return None;
            }
        }
    }

    /// Appends one block if the spine has room. Returns false at the cap.
    fn grow(&self) -> bool {
        let index = self.block_count.load(Ordering::SeqCst);
        if index >= MAX_TASK_BLOCKS {
            return false;
        }
        let mut appended = false;
        self.blocks[index].call_once(|| {
            appended = true;
            Box::new(core::array::from_fn(|_| TimerTask::new()))
        });
        if appended {
            self.block_count.store(index + 1, Ordering::SeqCst);
            notify(SchedulerNotice::PoolGrown { slots: self.len() });
            log::debug!("task pool grown to {} slots", self.len());
        }
        true
    }
}
