//! Single-writer, multi-reader ring buffer in named shared memory.
//!
//! Segment layout (all offsets from the page-aligned mapping base):
//!
//! ```text
//! [ RingHeader ][ SlotHeader; entries ][ pad ][ entry data; entries * stride ]
//! ```
//!
//! Each slot carries its own occupancy word: `0` is free, `WRITER_HELD`
//! means the writer owns it, anything else is a reader count. The writer
//! never reuses a slot that has readers, and readers never block: a slot the
//! writer holds reads as "not available".

use std::fmt;
use std::mem::{align_of, size_of};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use super::options::{make_name_safe, BackendType, RingBufferOptions};
use super::shm::SharedSegment;
use crate::error::{RingBufferError, RingResult};

const RING_MAGIC: u32 = 0x5652_5242; // "VRRB"
const ABI_REVISION: u32 = 1;

/// Layout fingerprint; two builds with different values refuse to share
/// segments.
pub const ABI_LEVEL: u32 =
    (ABI_REVISION << 16) | ((size_of::<RingHeader>() as u32) << 8) | size_of::<SlotHeader>() as u32;

const WRITER_HELD: u32 = u32::MAX;
const SLOT_FREE: u32 = 0;
const CLAIM_SWEEPS: usize = 3;

#[repr(C)]
struct RingHeader {
    magic: AtomicU32,
    abi_level: u32,
    backend: u8,
    _reserved: u8,
    alignment: u16,
    entries: u16,
    _reserved2: u16,
    entry_size: u32,
    data_offset: u32,
    next_sequence: AtomicU32,
    writer_active: AtomicU32,
    last_slot: AtomicU32,
    published: AtomicU32,
}

#[repr(C)]
struct SlotHeader {
    state: AtomicU32,
    valid: AtomicU32,
    sequence: AtomicU32,
    length: AtomicU32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SegmentLayout {
    slots_offset: usize,
    data_offset: usize,
    stride: usize,
    total: usize,
}

fn round_up(value: usize, align: usize) -> usize {
    (value + align - 1) / align * align
}

fn compute_layout(alignment: usize, entries: usize, entry_size: usize) -> SegmentLayout {
    let slots_offset = round_up(size_of::<RingHeader>(), align_of::<SlotHeader>());
    let data_offset = round_up(
        slots_offset + entries * size_of::<SlotHeader>(),
        alignment.max(align_of::<u64>()),
    );
    let stride = round_up(entry_size, alignment);
    SegmentLayout {
        slots_offset,
        data_offset,
        stride,
        total: data_offset + entries * stride,
    }
}

/// `seq` is inside the window of the last `capacity` published sequences.
/// Uses wrapping distance so it stays correct across `u32` overflow.
pub fn sequence_in_window(next: u32, seq: u32, capacity: usize) -> bool {
    let age = next.wrapping_sub(seq);
    age >= 1 && (age as usize) <= capacity
}

pub struct IpcRingBuffer {
    segment: SharedSegment,
    backend: BackendType,
    alignment: usize,
    entries: usize,
    entry_size: usize,
    layout: SegmentLayout,
}

impl IpcRingBuffer {
    /// Create and own a new segment. The segment is removed when the
    /// returned handle (and every proxy holding it) is dropped.
    pub fn create(options: &RingBufferOptions) -> RingResult<Arc<Self>> {
        let backend = options.backend()?;
        let name = make_name_safe(options.name());
        let layout = compute_layout(options.alignment(), options.entries(), options.entry_size());
        let segment = SharedSegment::create(&name, layout.total)?;

        let header = RingHeader {
            magic: AtomicU32::new(0),
            abi_level: ABI_LEVEL,
            backend: backend.id(),
            _reserved: 0,
            alignment: options.alignment() as u16,
            entries: options.entries() as u16,
            _reserved2: 0,
            entry_size: options.entry_size() as u32,
            data_offset: layout.data_offset as u32,
            next_sequence: AtomicU32::new(options.initial_sequence()),
            writer_active: AtomicU32::new(0),
            last_slot: AtomicU32::new(options.entries() as u32 - 1),
            published: AtomicU32::new(0),
        };
        // SAFETY: the mapping is page aligned and at least `layout.total`
        // bytes; nobody else can see the header until the magic is stored.
        unsafe {
            std::ptr::write(segment.as_ptr() as *mut RingHeader, header);
        }

        let ring = Self {
            segment,
            backend,
            alignment: options.alignment(),
            entries: options.entries(),
            entry_size: options.entry_size(),
            layout,
        };
        ring.header().magic.store(RING_MAGIC, Ordering::Release);
        log::info!(
            "[RING] Created {} ({} x {} bytes, align {}, abi {:#x})",
            name,
            ring.entries,
            ring.entry_size,
            ring.alignment,
            ABI_LEVEL
        );
        Ok(Arc::new(ring))
    }

    /// Attach to an existing segment by name.
    ///
    /// A segment with a foreign ABI level or no valid header is refused and
    /// reported as an error; callers treat that like a missing segment.
    pub fn find(options: &RingBufferOptions) -> RingResult<Arc<Self>> {
        let name = make_name_safe(options.name());
        let segment = SharedSegment::open(&name)?;
        if segment.len() < size_of::<RingHeader>() {
            return Err(RingBufferError::SegmentTooSmall {
                required: size_of::<RingHeader>(),
                actual: segment.len(),
            });
        }

        // SAFETY: length checked above, mapping base is page aligned.
        let header = unsafe { &*(segment.as_ptr() as *const RingHeader) };
        if header.magic.load(Ordering::Acquire) != RING_MAGIC {
            log::warn!("[RING] Segment {} has no ring buffer header", name);
            return Err(RingBufferError::BadMagic);
        }
        if header.abi_level != ABI_LEVEL {
            log::warn!(
                "[RING] Refusing segment {}: ABI level {:#x}, this build uses {:#x}",
                name,
                header.abi_level,
                ABI_LEVEL
            );
            return Err(RingBufferError::AbiMismatch {
                expected: ABI_LEVEL,
                found: header.abi_level,
            });
        }
        let backend = BackendType::from_id(header.backend)
            .ok_or(RingBufferError::UnsupportedBackend(header.backend))?;
        backend.ensure_supported()?;

        let alignment = header.alignment as usize;
        let entries = header.entries as usize;
        let entry_size = header.entry_size as usize;
        if entries == 0 || entry_size == 0 || !alignment.is_power_of_two() {
            log::warn!("[RING] Segment {} has a corrupt header", name);
            return Err(RingBufferError::BadMagic);
        }
        let layout = compute_layout(alignment, entries, entry_size);
        if layout.total > segment.len() || layout.data_offset != header.data_offset as usize {
            return Err(RingBufferError::SegmentTooSmall {
                required: layout.total,
                actual: segment.len(),
            });
        }

        log::info!(
            "[RING] Found {} ({} x {} bytes, align {})",
            name,
            entries,
            entry_size,
            alignment
        );
        Ok(Arc::new(Self {
            segment,
            backend,
            alignment,
            entries,
            entry_size,
            layout,
        }))
    }

    fn header(&self) -> &RingHeader {
        // SAFETY: validated or written during construction.
        unsafe { &*(self.segment.as_ptr() as *const RingHeader) }
    }

    fn slot(&self, index: usize) -> &SlotHeader {
        debug_assert!(index < self.entries);
        // SAFETY: the slot table lies inside the validated layout.
        unsafe {
            &*(self
                .segment
                .as_ptr()
                .add(self.layout.slots_offset + index * size_of::<SlotHeader>())
                as *const SlotHeader)
        }
    }

    fn slot_data(&self, index: usize) -> *mut u8 {
        // SAFETY: in bounds of the mapping for any index < entries.
        unsafe {
            self.segment
                .as_ptr()
                .add(self.layout.data_offset + index * self.layout.stride)
        }
    }

    pub fn name(&self) -> &str {
        self.segment.name()
    }

    pub fn capacity(&self) -> usize {
        self.entries
    }

    pub fn entry_size(&self) -> usize {
        self.entry_size
    }

    pub fn alignment(&self) -> usize {
        self.alignment
    }

    pub fn backend(&self) -> BackendType {
        self.backend
    }

    pub fn abi_level(&self) -> u32 {
        ABI_LEVEL
    }

    pub fn is_creator(&self) -> bool {
        self.segment.is_owner()
    }

    /// Most recently published sequence number, if anything was published
    pub fn latest_sequence(&self) -> Option<u32> {
        let header = self.header();
        if header.published.load(Ordering::Acquire) == 0 {
            return None;
        }
        Some(header.next_sequence.load(Ordering::Acquire).wrapping_sub(1))
    }

    /// Reserve the next slot for writing. The entry is published when the
    /// proxy drops. Fails with `AllSlotsBusy` instead of waiting when readers
    /// hold every slot.
    pub fn put(self: &Arc<Self>) -> RingResult<WriteProxy> {
        let header = self.header();
        if header
            .writer_active
            .compare_exchange(0, 1, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return Err(RingBufferError::WriterBusy);
        }

        let sequence = header.next_sequence.load(Ordering::Acquire);
        let slot = match self.claim_slot() {
            Some(slot) => slot,
            None => {
                header.writer_active.store(0, Ordering::Release);
                log::warn!("[RING] All {} slots held by readers, frame not written", self.entries);
                return Err(RingBufferError::AllSlotsBusy(self.entries));
            }
        };
        Ok(WriteProxy {
            ring: Arc::clone(self),
            slot,
            sequence,
            len: self.entry_size,
        })
    }

    /// Copy `data` into the next slot and publish it
    pub fn put_bytes(self: &Arc<Self>, data: &[u8]) -> RingResult<u32> {
        if data.len() > self.entry_size {
            return Err(RingBufferError::EntryTooLarge {
                len: data.len(),
                capacity: self.entry_size,
            });
        }
        let mut proxy = self.put()?;
        proxy[..data.len()].copy_from_slice(data);
        proxy.set_len(data.len());
        Ok(proxy.sequence_number())
    }

    /// Round robin from the slot after the last one written, skipping slots
    /// that readers hold. Gives up after `CLAIM_SWEEPS` passes over the table.
    fn claim_slot(&self) -> Option<usize> {
        let start = (self.header().last_slot.load(Ordering::Relaxed) as usize + 1) % self.entries;
        for sweep in 0..CLAIM_SWEEPS {
            if sweep > 0 {
                std::thread::yield_now();
            }
            for offset in 0..self.entries {
                let index = (start + offset) % self.entries;
                let slot = self.slot(index);
                match slot.state.compare_exchange(
                    SLOT_FREE,
                    WRITER_HELD,
                    Ordering::Acquire,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        slot.valid.store(0, Ordering::Release);
                        return Some(index);
                    }
                    Err(readers) => {
                        log::debug!("[RING] Slot {} busy ({} readers), skipping", index, readers);
                    }
                }
            }
        }
        None
    }

    fn publish(&self, slot_index: usize, sequence: u32, len: usize) {
        let header = self.header();
        let slot = self.slot(slot_index);
        slot.sequence.store(sequence, Ordering::Relaxed);
        slot.length.store(len as u32, Ordering::Relaxed);
        slot.valid.store(1, Ordering::Release);
        slot.state.store(SLOT_FREE, Ordering::Release);
        header.last_slot.store(slot_index as u32, Ordering::Relaxed);
        header
            .next_sequence
            .store(sequence.wrapping_add(1), Ordering::Release);
        header.published.store(1, Ordering::Release);
        header.writer_active.store(0, Ordering::Release);
    }

    /// Read access to the entry with exactly this sequence number.
    ///
    /// Returns `None` right away if the entry was recycled, is not written
    /// yet, or the writer is currently filling its slot.
    pub fn get(self: &Arc<Self>, sequence: u32) -> Option<ReadProxy> {
        let header = self.header();
        if header.published.load(Ordering::Acquire) == 0 {
            return None;
        }
        let next = header.next_sequence.load(Ordering::Acquire);
        if !sequence_in_window(next, sequence, self.entries) {
            return None;
        }

        for index in 0..self.entries {
            let slot = self.slot(index);
            if slot.valid.load(Ordering::Acquire) == 0
                || slot.sequence.load(Ordering::Acquire) != sequence
            {
                continue;
            }
            if !self.try_pin(slot) {
                return None;
            }
            // The writer may have recycled the slot before we pinned it.
            if slot.valid.load(Ordering::Acquire) == 0
                || slot.sequence.load(Ordering::Acquire) != sequence
            {
                slot.state.fetch_sub(1, Ordering::Release);
                return None;
            }
            let len = (slot.length.load(Ordering::Acquire) as usize).min(self.entry_size);
            return Some(ReadProxy {
                ring: Arc::clone(self),
                slot: index,
                sequence,
                len,
            });
        }
        None
    }

    /// Read access to the newest published entry
    pub fn get_latest(self: &Arc<Self>) -> Option<ReadProxy> {
        // One retry covers the writer publishing between the two loads.
        for _ in 0..2 {
            let latest = self.latest_sequence()?;
            if let Some(proxy) = self.get(latest) {
                return Some(proxy);
            }
        }
        None
    }

    fn try_pin(&self, slot: &SlotHeader) -> bool {
        loop {
            let current = slot.state.load(Ordering::Acquire);
            if current == WRITER_HELD || current == WRITER_HELD - 1 {
                return false;
            }
            if slot
                .state
                .compare_exchange_weak(current, current + 1, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return true;
            }
        }
    }
}

impl fmt::Debug for IpcRingBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IpcRingBuffer")
            .field("name", &self.name())
            .field("backend", &self.backend)
            .field("alignment", &self.alignment)
            .field("entries", &self.entries)
            .field("entry_size", &self.entry_size)
            .field("creator", &self.is_creator())
            .finish()
    }
}

/// Exclusive access to one slot while it is being filled.
///
/// Dereferences to the slot's full capacity; `set_len` controls how many
/// bytes readers will see. Dropping the proxy publishes the entry.
pub struct WriteProxy {
    ring: Arc<IpcRingBuffer>,
    slot: usize,
    sequence: u32,
    len: usize,
}

impl WriteProxy {
    /// Sequence number the entry will be published under
    pub fn sequence_number(&self) -> u32 {
        self.sequence
    }

    /// Number of bytes to publish, clamped to the entry size
    pub fn set_len(&mut self, len: usize) {
        self.len = len.min(self.ring.entry_size);
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: the slot is marked WRITER_HELD, so no reader can pin it
        // and no other writer proxy exists.
        unsafe { std::slice::from_raw_parts_mut(self.ring.slot_data(self.slot), self.ring.entry_size) }
    }
}

impl Deref for WriteProxy {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        // SAFETY: see `as_mut_slice`.
        unsafe { std::slice::from_raw_parts(self.ring.slot_data(self.slot), self.ring.entry_size) }
    }
}

impl DerefMut for WriteProxy {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.as_mut_slice()
    }
}

impl Drop for WriteProxy {
    fn drop(&mut self) {
        self.ring.publish(self.slot, self.sequence, self.len);
    }
}

/// Shared access to one published entry. The writer will not reuse the
/// slot while any read proxy for it is alive.
pub struct ReadProxy {
    ring: Arc<IpcRingBuffer>,
    slot: usize,
    sequence: u32,
    len: usize,
}

impl ReadProxy {
    pub fn sequence_number(&self) -> u32 {
        self.sequence
    }

    pub fn ring(&self) -> &Arc<IpcRingBuffer> {
        &self.ring
    }
}

impl Deref for ReadProxy {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        // SAFETY: the slot is pinned by this proxy; the writer skips it.
        unsafe { std::slice::from_raw_parts(self.ring.slot_data(self.slot), self.len) }
    }
}

impl Drop for ReadProxy {
    fn drop(&mut self) {
        self.ring.slot(self.slot).state.fetch_sub(1, Ordering::Release);
    }
}

impl fmt::Debug for ReadProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadProxy")
            .field("sequence", &self.sequence)
            .field("slot", &self.slot)
            .field("len", &self.len)
            .finish()
    }
}
