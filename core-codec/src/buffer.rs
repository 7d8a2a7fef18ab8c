//! # Buffer Slot Pool
//!
//! Fixed-size pools of buffer slots shared between the client, the worker
//! pipelines and the codec engine.
//!
//! ## Design
//!
//! - **Capacity**: slot count and per-slot capacity are fixed when the pool is
//!   built; slots are reused for the pool's whole lifetime
//! - **Ownership**: every slot carries a [`SlotStatus`] tag; transitions only
//!   succeed from the expected predecessor, anything else is rejected with
//!   [`CodecError::Unknown`]
//! - **Transfer guard**: `in_use` is set while an input slot travels from the
//!   client to the engine, so the same index cannot be queued twice
//! - **Locking**: each slot has its own mutex; there is no pool-wide lock
//!
//! ```text
//! FREE -> OWNED_BY_CLIENT -> OWNED_BY_WORKER -> OWNED_BY_ENGINE -> FREE      (input)
//! FREE -> OWNED_BY_ENGINE -> OWNED_BY_WORKER -> OWNED_BY_CLIENT -> FREE      (output)
//! ```

use crate::error::{CodecError, Result};
use bytes::Bytes;
use parking_lot::Mutex;
use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

// ============================================================================
// Buffer Attributes
// ============================================================================

/// Flags attached to a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BufferFlag(u32);

impl BufferFlag {
    pub const NONE: BufferFlag = BufferFlag(0);
    /// End of stream: no further data follows this buffer.
    pub const EOS: BufferFlag = BufferFlag(1 << 0);
    pub const SYNC_FRAME: BufferFlag = BufferFlag(1 << 1);
    pub const PARTIAL_FRAME: BufferFlag = BufferFlag(1 << 2);
    /// Codec configuration data delivered in-band.
    pub const CODEC_DATA: BufferFlag = BufferFlag(1 << 3);

    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Flags from raw bits; unknown bits are dropped.
    pub const fn from_bits_truncate(bits: u32) -> Self {
        BufferFlag(bits & 0b1111)
    }

    pub const fn contains(self, other: BufferFlag) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: BufferFlag) {
        self.0 |= other.0;
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for BufferFlag {
    type Output = BufferFlag;

    fn bitor(self, rhs: BufferFlag) -> BufferFlag {
        BufferFlag(self.0 | rhs.0)
    }
}

impl BitOrAssign for BufferFlag {
    fn bitor_assign(&mut self, rhs: BufferFlag) {
        self.0 |= rhs.0;
    }
}

/// Attributes describing the valid region of a buffer.
///
/// `size` and `offset` are signed to mirror the client-facing contract;
/// negative values are rejected by [`BufferInfo::validate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferInfo {
    /// Presentation timestamp in microseconds.
    pub presentation_time_us: i64,
    /// Number of valid bytes.
    pub size: i32,
    /// Offset of the first valid byte.
    pub offset: i32,
}

impl BufferInfo {
    pub fn new(presentation_time_us: i64, size: i32, offset: i32) -> Self {
        Self {
            presentation_time_us,
            size,
            offset,
        }
    }

    /// Check the attributes against a slot of `capacity` bytes.
    pub fn validate(&self, capacity: usize) -> Result<()> {
        if self.size < 0 {
            return Err(CodecError::InvalidVal(format!(
                "buffer size {} is negative",
                self.size
            )));
        }
        if self.offset < 0 {
            return Err(CodecError::InvalidVal(format!(
                "buffer offset {} is negative",
                self.offset
            )));
        }
        if self.size as usize > capacity {
            return Err(CodecError::InvalidVal(format!(
                "buffer size {} exceeds capacity {}",
                self.size, capacity
            )));
        }
        if self.offset as usize + self.size as usize > capacity {
            return Err(CodecError::InvalidVal(format!(
                "buffer region {}+{} exceeds capacity {}",
                self.offset, self.size, capacity
            )));
        }
        Ok(())
    }

    /// Byte range of the valid region. Only meaningful after [`validate`](Self::validate).
    pub fn range(&self) -> std::ops::Range<usize> {
        let start = self.offset.max(0) as usize;
        start..start + self.size.max(0) as usize
    }
}

// ============================================================================
// Shared Memory Payload
// ============================================================================

/// Fixed-capacity byte buffer backing a slot.
///
/// Handed to clients as `Arc<SharedMemory>`. Holding the `Arc` keeps the bytes
/// alive but gives no say over the slot's ownership tag.
pub struct SharedMemory {
    data: Mutex<Vec<u8>>,
    capacity: usize,
}

impl SharedMemory {
    /// Allocate a zeroed buffer of `capacity` bytes.
    pub fn new(capacity: usize) -> Result<Self> {
        let mut data = Vec::new();
        data.try_reserve_exact(capacity).map_err(|e| {
            CodecError::NoMemory(format!("cannot allocate {} bytes: {}", capacity, e))
        })?;
        data.resize(capacity, 0);
        Ok(Self {
            data: Mutex::new(data),
            capacity,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Copy `src` into the buffer at `offset`. Returns the number of bytes written.
    pub fn write(&self, offset: usize, src: &[u8]) -> Result<usize> {
        let end = offset
            .checked_add(src.len())
            .filter(|end| *end <= self.capacity)
            .ok_or_else(|| {
                CodecError::InvalidVal(format!(
                    "write of {} bytes at {} exceeds capacity {}",
                    src.len(),
                    offset,
                    self.capacity
                ))
            })?;
        self.data.lock()[offset..end].copy_from_slice(src);
        Ok(src.len())
    }

    /// Copy `len` bytes starting at `offset` out of the buffer.
    pub fn read(&self, offset: usize, len: usize) -> Result<Bytes> {
        let end = offset
            .checked_add(len)
            .filter(|end| *end <= self.capacity)
            .ok_or_else(|| {
                CodecError::InvalidVal(format!(
                    "read of {} bytes at {} exceeds capacity {}",
                    len, offset, self.capacity
                ))
            })?;
        Ok(Bytes::copy_from_slice(&self.data.lock()[offset..end]))
    }

    pub fn with_data<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        f(&self.data.lock())
    }

    pub fn with_data_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        f(&mut self.data.lock())
    }
}

impl fmt::Debug for SharedMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedMemory")
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Slots
// ============================================================================

/// Ownership tag of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotStatus {
    Free,
    OwnedByClient,
    OwnedByEngine,
    OwnedByWorker,
}

#[derive(Debug)]
struct SlotState {
    status: SlotStatus,
    info: BufferInfo,
    flag: BufferFlag,
    in_use: bool,
}

/// One buffer descriptor in a pool.
#[derive(Debug)]
pub struct BufferSlot {
    index: u32,
    payload: Arc<SharedMemory>,
    state: Mutex<SlotState>,
}

impl BufferSlot {
    fn new(index: u32, capacity: usize) -> Result<Self> {
        Ok(Self {
            index,
            payload: Arc::new(SharedMemory::new(capacity)?),
            state: Mutex::new(SlotState {
                status: SlotStatus::Free,
                info: BufferInfo::default(),
                flag: BufferFlag::NONE,
                in_use: false,
            }),
        })
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn payload(&self) -> &Arc<SharedMemory> {
        &self.payload
    }

    pub fn status(&self) -> SlotStatus {
        self.state.lock().status
    }

    pub fn in_use(&self) -> bool {
        self.state.lock().in_use
    }

    pub fn attributes(&self) -> (BufferInfo, BufferFlag) {
        let state = self.state.lock();
        (state.info, state.flag)
    }

    fn set_attributes(&self, info: BufferInfo, flag: BufferFlag) {
        let mut state = self.state.lock();
        state.info = info;
        state.flag = flag;
    }
}

// ============================================================================
// Pool
// ============================================================================

/// Fixed-size pool of buffer slots.
#[derive(Debug)]
pub struct BufferPool {
    id: u64,
    label: &'static str,
    slots: Vec<BufferSlot>,
    capacity: usize,
}

impl BufferPool {
    /// Build a pool of `count` slots of `capacity` bytes each.
    pub fn new(label: &'static str, count: usize, capacity: usize) -> Result<Self> {
        if count == 0 {
            return Err(CodecError::InvalidVal(format!(
                "{} pool needs at least one slot",
                label
            )));
        }
        if count > u32::MAX as usize {
            return Err(CodecError::InvalidVal(format!(
                "{} pool slot count {} is too large",
                label, count
            )));
        }

        let slots = (0..count as u32)
            .map(|index| BufferSlot::new(index, capacity))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            label,
            slots,
            capacity,
        })
    }

    /// Process-unique identity of this pool.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Capacity of each slot in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn slot(&self, index: u32) -> Result<&BufferSlot> {
        self.slots.get(index as usize).ok_or_else(|| {
            CodecError::InvalidVal(format!(
                "{} index {} out of range (pool size {})",
                self.label,
                index,
                self.slots.len()
            ))
        })
    }

    pub fn status(&self, index: u32) -> Result<SlotStatus> {
        Ok(self.slot(index)?.status())
    }

    /// Move a slot from `from` to `to`, rejecting any other predecessor.
    pub fn transition(&self, index: u32, from: SlotStatus, to: SlotStatus) -> Result<()> {
        let slot = self.slot(index)?;
        let mut state = slot.state.lock();
        if state.status != from {
            return Err(CodecError::Unknown(format!(
                "{} slot {} is {:?}, expected {:?}",
                self.label, index, state.status, from
            )));
        }
        state.status = to;
        Ok(())
    }

    /// Record client-filled input and move it from the client to the worker.
    ///
    /// Fails with [`CodecError::Unknown`] if the slot is already in transfer or
    /// is not owned by the client, and with [`CodecError::InvalidVal`] if `info`
    /// does not fit the slot.
    pub fn queue_from_client(&self, index: u32, info: BufferInfo, flag: BufferFlag) -> Result<()> {
        let slot = self.slot(index)?;
        info.validate(self.capacity)?;

        let mut state = slot.state.lock();
        if state.in_use {
            return Err(CodecError::Unknown(format!(
                "{} slot {} already QueueInputBuffer, please don't do it again",
                self.label, index
            )));
        }
        if state.status != SlotStatus::OwnedByClient {
            return Err(CodecError::Unknown(format!(
                "{} slot {} is {:?}, not owned by client",
                self.label, index, state.status
            )));
        }
        state.in_use = true;
        state.info = info;
        state.flag = flag;
        state.status = SlotStatus::OwnedByWorker;
        Ok(())
    }

    /// Claim the lowest-indexed free slot for the engine.
    pub fn acquire_free(&self) -> Option<u32> {
        self.slots.iter().find_map(|slot| {
            let mut state = slot.state.lock();
            if state.status == SlotStatus::Free {
                state.status = SlotStatus::OwnedByEngine;
                state.info = BufferInfo::default();
                state.flag = BufferFlag::NONE;
                Some(slot.index)
            } else {
                None
            }
        })
    }

    /// Returns `true` if at least one slot is free.
    pub fn has_free(&self) -> bool {
        self.slots
            .iter()
            .any(|slot| slot.status() == SlotStatus::Free)
    }

    /// Store attributes produced for a slot.
    pub fn set_attributes(&self, index: u32, info: BufferInfo, flag: BufferFlag) -> Result<()> {
        self.slot(index)?.set_attributes(info, flag);
        Ok(())
    }

    /// Return a slot to [`SlotStatus::Free`] from `from`, clearing its guard.
    pub fn release(&self, index: u32, from: SlotStatus) -> Result<()> {
        let slot = self.slot(index)?;
        let mut state = slot.state.lock();
        if state.status != from {
            return Err(CodecError::Unknown(format!(
                "{} slot {} is {:?}, expected {:?}",
                self.label, index, state.status, from
            )));
        }
        state.status = SlotStatus::Free;
        state.in_use = false;
        state.info = BufferInfo::default();
        state.flag = BufferFlag::NONE;
        Ok(())
    }

    /// Force every slot back to [`SlotStatus::Free`].
    ///
    /// Returns the number of slots that were held by someone.
    pub fn reclaim_all(&self) -> usize {
        let mut reclaimed = 0;
        for slot in &self.slots {
            let mut state = slot.state.lock();
            if state.status != SlotStatus::Free || state.in_use {
                reclaimed += 1;
            }
            state.status = SlotStatus::Free;
            state.in_use = false;
            state.info = BufferInfo::default();
            state.flag = BufferFlag::NONE;
        }
        reclaimed
    }

    /// Number of slots currently tagged `status`.
    pub fn count(&self, status: SlotStatus) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.status() == status)
            .count()
    }

    /// Number of slots not in [`SlotStatus::Free`].
    pub fn live_slots(&self) -> usize {
        self.len() - self.count(SlotStatus::Free)
    }
}
