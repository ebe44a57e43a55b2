//! Shared memory frame transport
//!
//! A camera (or any producer) writes frames into an [`IpcRingBuffer`] and
//! announces them with a [`FrameTransport`] message; consumers resolve the
//! message back into bytes, falling back to inline payloads when shared
//! memory is unavailable.

pub mod descriptor;
pub mod options;
pub mod ring_buffer;
pub mod shm;

pub use descriptor::{publish_frame, resolve_frame, FrameMetadata, FrameTransport, SharedBufferDescriptor};
pub use options::{make_name_safe, BackendType, RingBufferOptions};
pub use ring_buffer::{sequence_in_window, IpcRingBuffer, ReadProxy, WriteProxy, ABI_LEVEL};
