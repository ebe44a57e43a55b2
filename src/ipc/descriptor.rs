//! Out-of-band frame description sent alongside (or instead of) shared memory.
//!
//! The byte encoding is fixed-order little-endian so it can cross process
//! and machine boundaries independent of struct layout.

use serde::{Deserialize, Serialize};

use super::options::RingBufferOptions;
use super::ring_buffer::IpcRingBuffer;
use crate::error::DescriptorError;

const TAG_SHARED: u8 = 0;
const TAG_INLINE: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FrameMetadata {
    pub width: u16,
    pub height: u16,
    pub channels: u8,
    /// Bytes per channel
    pub depth: u8,
    pub timestamp_us: i64,
}

impl FrameMetadata {
    pub const ENCODED_LEN: usize = 2 + 2 + 1 + 1 + 8;

    /// Payload size implied by the dimensions
    pub fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * self.channels as usize * self.depth as usize
    }

    fn write(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.width.to_le_bytes());
        buf.extend_from_slice(&self.height.to_le_bytes());
        buf.push(self.channels);
        buf.push(self.depth);
        buf.extend_from_slice(&self.timestamp_us.to_le_bytes());
    }

    fn read(r: &mut Reader<'_>) -> Result<Self, DescriptorError> {
        Ok(Self {
            width: r.u16()?,
            height: r.u16()?,
            channels: r.u8()?,
            depth: r.u8()?,
            timestamp_us: r.i64()?,
        })
    }
}

/// Where a frame lives in shared memory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedBufferDescriptor {
    pub metadata: FrameMetadata,
    pub sequence_number: u32,
    pub sensor: u32,
    pub abi_level: u32,
    pub backend: u8,
    pub shm_name: String,
}

impl SharedBufferDescriptor {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(FrameMetadata::ENCODED_LEN + 15 + self.shm_name.len());
        self.write(&mut buf);
        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DescriptorError> {
        let mut r = Reader::new(bytes);
        let descriptor = Self::read(&mut r)?;
        r.finish()?;
        Ok(descriptor)
    }

    fn write(&self, buf: &mut Vec<u8>) {
        self.metadata.write(buf);
        buf.extend_from_slice(&self.sequence_number.to_le_bytes());
        buf.extend_from_slice(&self.sensor.to_le_bytes());
        buf.extend_from_slice(&self.abi_level.to_le_bytes());
        buf.push(self.backend);
        let name = self.shm_name.as_bytes();
        let len = name.len().min(u16::MAX as usize);
        buf.extend_from_slice(&(len as u16).to_le_bytes());
        buf.extend_from_slice(&name[..len]);
    }

    fn read(r: &mut Reader<'_>) -> Result<Self, DescriptorError> {
        let metadata = FrameMetadata::read(r)?;
        let sequence_number = r.u32()?;
        let sensor = r.u32()?;
        let abi_level = r.u32()?;
        let backend = r.u8()?;
        let name_len = r.u16()? as usize;
        let shm_name = String::from_utf8(r.take(name_len)?.to_vec())
            .map_err(|_| DescriptorError::InvalidName)?;
        Ok(Self {
            metadata,
            sequence_number,
            sensor,
            abi_level,
            backend,
            shm_name,
        })
    }
}

/// One frame on the wire: either a pointer into shared memory or the bytes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameTransport {
    Shared(SharedBufferDescriptor),
    Inline {
        metadata: FrameMetadata,
        sensor: u32,
        data: Vec<u8>,
    },
}

impl FrameTransport {
    pub fn metadata(&self) -> &FrameMetadata {
        match self {
            FrameTransport::Shared(d) => &d.metadata,
            FrameTransport::Inline { metadata, .. } => metadata,
        }
    }

    pub fn sensor(&self) -> u32 {
        match self {
            FrameTransport::Shared(d) => d.sensor,
            FrameTransport::Inline { sensor, .. } => *sensor,
        }
    }

    pub fn is_shared(&self) -> bool {
        matches!(self, FrameTransport::Shared(_))
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        match self {
            FrameTransport::Shared(descriptor) => {
                buf.push(TAG_SHARED);
                descriptor.write(&mut buf);
            }
            FrameTransport::Inline {
                metadata,
                sensor,
                data,
            } => {
                buf.reserve(1 + FrameMetadata::ENCODED_LEN + 8 + data.len());
                buf.push(TAG_INLINE);
                metadata.write(&mut buf);
                buf.extend_from_slice(&sensor.to_le_bytes());
                buf.extend_from_slice(&(data.len() as u32).to_le_bytes());
                buf.extend_from_slice(data);
            }
        }
        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DescriptorError> {
        let mut r = Reader::new(bytes);
        let transport = match r.u8()? {
            TAG_SHARED => FrameTransport::Shared(SharedBufferDescriptor::read(&mut r)?),
            TAG_INLINE => {
                let metadata = FrameMetadata::read(&mut r)?;
                let sensor = r.u32()?;
                let len = r.u32()? as usize;
                let data = r.take(len)?.to_vec();
                FrameTransport::Inline {
                    metadata,
                    sensor,
                    data,
                }
            }
            other => return Err(DescriptorError::UnknownTag(other)),
        };
        r.finish()?;
        Ok(transport)
    }
}

/// Publish a frame, through shared memory when possible.
///
/// Falls back to inline transport when no ring is available, the frame does
/// not fit a slot, or the writer is busy.
pub fn publish_frame(
    ring: Option<&std::sync::Arc<IpcRingBuffer>>,
    metadata: FrameMetadata,
    sensor: u32,
    data: &[u8],
) -> FrameTransport {
    if let Some(ring) = ring {
        match ring.put_bytes(data) {
            Ok(sequence_number) => {
                return FrameTransport::Shared(SharedBufferDescriptor {
                    metadata,
                    sequence_number,
                    sensor,
                    abi_level: ring.abi_level(),
                    backend: ring.backend().id(),
                    shm_name: ring.name().to_string(),
                });
            }
            Err(e) => log::debug!("[IPC] Sending frame inline: {}", e),
        }
    }
    FrameTransport::Inline {
        metadata,
        sensor,
        data: data.to_vec(),
    }
}

/// Recover the frame bytes described by `transport`.
///
/// `find` attaches to a segment by options; pass a closure that caches
/// handles to avoid remapping on every frame. Returns `None` when the
/// segment is unavailable, was built by an incompatible ABI, or the entry
/// has already been recycled.
pub fn resolve_frame<F>(transport: &FrameTransport, mut find: F) -> Option<Vec<u8>>
where
    F: FnMut(&RingBufferOptions) -> Option<std::sync::Arc<IpcRingBuffer>>,
{
    match transport {
        FrameTransport::Inline { data, .. } => Some(data.clone()),
        FrameTransport::Shared(descriptor) => {
            if descriptor.abi_level != super::ring_buffer::ABI_LEVEL {
                log::warn!(
                    "[IPC] Frame descriptor for {} has ABI level {:#x}, ignoring",
                    descriptor.shm_name,
                    descriptor.abi_level
                );
                return None;
            }
            let options = RingBufferOptions::new(&descriptor.shm_name).with_backend(descriptor.backend);
            let ring = find(&options)?;
            let entry = ring.get(descriptor.sequence_number)?;
            Some(entry.to_vec())
        }
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DescriptorError> {
        let end = self.pos.checked_add(n).ok_or(DescriptorError::Truncated)?;
        let slice = self
            .bytes
            .get(self.pos..end)
            .ok_or(DescriptorError::Truncated)?;
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], DescriptorError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, DescriptorError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, DescriptorError> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    fn u32(&mut self) -> Result<u32, DescriptorError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn i64(&mut self) -> Result<i64, DescriptorError> {
        Ok(i64::from_le_bytes(self.array()?))
    }

    fn finish(&self) -> Result<(), DescriptorError> {
        match self.bytes.len() - self.pos {
            0 => Ok(()),
            extra => Err(DescriptorError::TrailingBytes(extra)),
        }
    }
}
