//! Core frame definitions for the mediaflow pipeline.
//!
//! A frame is an opaque media buffer with a used length and a fixed capacity. Frames
//! are allocated once per queue slot and reused in place for the life of the queue,
//! so every accessor here works on preallocated storage.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Unique identifier source for frame instances
static FRAME_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a unique frame ID
fn obj_id() -> u64 {
    FRAME_COUNTER.fetch_add(1, Ordering::Relaxed) + 1
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("length {length} exceeds frame capacity {max_length}")]
    LengthExceedsCapacity { length: usize, max_length: usize },
    #[error("operation requires a contiguous frame")]
    NotContiguous,
    #[error("sample cast failed: {0}")]
    Cast(String),
    #[error("source and destination frames have different layouts")]
    LayoutMismatch,
}

/// Base frame trait for every buffer travelling through a frame queue.
///
/// Callers must check [`Frame::is_planar`] before choosing between the contiguous
/// accessors (`data_buf*`) and the per-plane accessors (`plane*`).
pub trait Frame: Send + Sync + fmt::Debug {
    /// Get the unique identifier for this frame
    fn id(&self) -> u64;

    /// Valid bytes of a contiguous frame. `None` for planar frames.
    fn data_buf(&self) -> Option<&[u8]>;

    /// The whole capacity of a contiguous frame, for writers that fill it and then
    /// call [`Frame::set_length`]. `None` for planar frames.
    fn data_buf_mut(&mut self) -> Option<&mut [u8]>;

    /// Number of planes. Contiguous frames report zero.
    fn plane_count(&self) -> usize {
        0
    }

    /// Valid bytes of plane `index`.
    fn plane(&self, _index: usize) -> Option<&[u8]> {
        None
    }

    /// Whole capacity of plane `index`.
    fn plane_mut(&mut self, _index: usize) -> Option<&mut [u8]> {
        None
    }

    /// Bytes currently valid (per plane for planar frames).
    fn length(&self) -> usize;

    /// Capacity in bytes (per plane for planar frames).
    fn max_length(&self) -> usize;

    /// Set the valid length.
    ///
    /// # Errors
    /// Returns [`FrameError::LengthExceedsCapacity`] and leaves the frame untouched
    /// when `length > max_length`.
    fn set_length(&mut self, length: usize) -> Result<(), FrameError>;

    fn is_planar(&self) -> bool;

    /// Get the presentation timestamp in nanoseconds
    fn pts(&self) -> Option<u64>;

    /// Set the presentation timestamp
    fn set_pts(&mut self, pts: Option<u64>);

    fn sequence_number(&self) -> u64;

    fn set_sequence_number(&mut self, sequence_number: u64);

    /// Copy `bytes` into a contiguous frame and set its length accordingly.
    ///
    /// # Errors
    /// Fails on planar frames and when `bytes` does not fit.
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), FrameError> {
        let max_length = self.max_length();
        if bytes.len() > max_length {
            return Err(FrameError::LengthExceedsCapacity {
                length: bytes.len(),
                max_length,
            });
        }
        let buf = self.data_buf_mut().ok_or(FrameError::NotContiguous)?;
        buf[..bytes.len()].copy_from_slice(bytes);
        self.set_length(bytes.len())
    }
}

/// Timing fields shared by the concrete frame types.
#[derive(Debug, Clone, Default)]
struct FrameMeta {
    pts: Option<u64>,
    sequence_number: u64,
}

/// Contiguous frame backed by a single preallocated buffer.
#[derive(Debug, Clone)]
pub struct RawFrame {
    id: u64,
    buffer: Vec<u8>,
    length: usize,
    meta: FrameMeta,
}

impl RawFrame {
    pub fn new(max_length: usize) -> Self {
        Self {
            id: obj_id(),
            buffer: vec![0u8; max_length],
            length: 0,
            meta: FrameMeta::default(),
        }
    }

    /// Boxed constructor, handy as a queue slot allocator.
    pub fn boxed(max_length: usize) -> Box<dyn Frame> {
        Box::new(Self::new(max_length))
    }

    /// View the valid bytes as a slice of plain-old-data samples (e.g. `i16` PCM).
    pub fn samples<T: bytemuck::Pod>(&self) -> Result<&[T], FrameError> {
        bytemuck::try_cast_slice(&self.buffer[..self.length])
            .map_err(|e| FrameError::Cast(format!("{:?}", e)))
    }

    /// Copy the valid bytes out as samples, whatever the buffer's alignment.
    pub fn read_samples<T: bytemuck::Pod>(&self) -> Result<Vec<T>, FrameError> {
        let size = std::mem::size_of::<T>();
        let bytes = &self.buffer[..self.length];
        if size == 0 || bytes.len() % size != 0 {
            return Err(FrameError::Cast(format!(
                "{} bytes is not a whole number of {}-byte samples",
                bytes.len(),
                size
            )));
        }
        Ok(bytes
            .chunks_exact(size)
            .map(bytemuck::pod_read_unaligned)
            .collect())
    }
}

impl Frame for RawFrame {
    fn id(&self) -> u64 {
        self.id
    }

    fn data_buf(&self) -> Option<&[u8]> {
        Some(&self.buffer[..self.length])
    }

    fn data_buf_mut(&mut self) -> Option<&mut [u8]> {
        Some(&mut self.buffer[..])
    }

    fn length(&self) -> usize {
        self.length
    }

    fn max_length(&self) -> usize {
        self.buffer.len()
    }

    fn set_length(&mut self, length: usize) -> Result<(), FrameError> {
        if length > self.buffer.len() {
            return Err(FrameError::LengthExceedsCapacity {
                length,
                max_length: self.buffer.len(),
            });
        }
        self.length = length;
        Ok(())
    }

    fn is_planar(&self) -> bool {
        false
    }

    fn pts(&self) -> Option<u64> {
        self.meta.pts
    }

    fn set_pts(&mut self, pts: Option<u64>) {
        self.meta.pts = pts;
    }

    fn sequence_number(&self) -> u64 {
        self.meta.sequence_number
    }

    fn set_sequence_number(&mut self, sequence_number: u64) {
        self.meta.sequence_number = sequence_number;
    }
}

impl fmt::Display for RawFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RawFrame#{}(length: {}/{}, seq: {})",
            self.id,
            self.length,
            self.buffer.len(),
            self.meta.sequence_number
        )
    }
}

/// Planar frame: independent equally sized planes (e.g. Y/U/V, or one plane per audio
/// channel). `length` and `max_length` describe each plane.
#[derive(Debug, Clone)]
pub struct PlanarFrame {
    id: u64,
    planes: Vec<Vec<u8>>,
    max_length: usize,
    length: usize,
    meta: FrameMeta,
}

impl PlanarFrame {
    pub fn new(plane_count: usize, max_length: usize) -> Self {
        Self {
            id: obj_id(),
            planes: vec![vec![0u8; max_length]; plane_count],
            max_length,
            length: 0,
            meta: FrameMeta::default(),
        }
    }

    pub fn boxed(plane_count: usize, max_length: usize) -> Box<dyn Frame> {
        Box::new(Self::new(plane_count, max_length))
    }
}

impl Frame for PlanarFrame {
    fn id(&self) -> u64 {
        self.id
    }

    fn data_buf(&self) -> Option<&[u8]> {
        None
    }

    fn data_buf_mut(&mut self) -> Option<&mut [u8]> {
        None
    }

    fn plane_count(&self) -> usize {
        self.planes.len()
    }

    fn plane(&self, index: usize) -> Option<&[u8]> {
        self.planes.get(index).map(|p| &p[..self.length])
    }

    fn plane_mut(&mut self, index: usize) -> Option<&mut [u8]> {
        self.planes.get_mut(index).map(|p| &mut p[..])
    }

    fn length(&self) -> usize {
        self.length
    }

    fn max_length(&self) -> usize {
        self.max_length
    }

    fn set_length(&mut self, length: usize) -> Result<(), FrameError> {
        if length > self.max_length {
            return Err(FrameError::LengthExceedsCapacity {
                length,
                max_length: self.max_length,
            });
        }
        self.length = length;
        Ok(())
    }

    fn is_planar(&self) -> bool {
        true
    }

    fn pts(&self) -> Option<u64> {
        self.meta.pts
    }

    fn set_pts(&mut self, pts: Option<u64>) {
        self.meta.pts = pts;
    }

    fn sequence_number(&self) -> u64 {
        self.meta.sequence_number
    }

    fn set_sequence_number(&mut self, sequence_number: u64) {
        self.meta.sequence_number = sequence_number;
    }
}

/// Copy the valid content and timing fields of `src` into `dst`.
///
/// # Errors
/// Fails when the layouts differ (contiguous vs planar, or fewer destination planes)
/// or when `src` does not fit in `dst`.
pub fn copy_frame(src: &dyn Frame, dst: &mut dyn Frame) -> Result<(), FrameError> {
    if src.is_planar() != dst.is_planar() {
        return Err(FrameError::LayoutMismatch);
    }

    if src.is_planar() {
        if src.plane_count() > dst.plane_count() {
            return Err(FrameError::LayoutMismatch);
        }
        if src.length() > dst.max_length() {
            return Err(FrameError::LengthExceedsCapacity {
                length: src.length(),
                max_length: dst.max_length(),
            });
        }
        for index in 0..src.plane_count() {
            let from = src.plane(index).ok_or(FrameError::LayoutMismatch)?;
            let to = dst.plane_mut(index).ok_or(FrameError::LayoutMismatch)?;
            to[..from.len()].copy_from_slice(from);
        }
        dst.set_length(src.length())?;
    } else {
        dst.write_bytes(src.data_buf().ok_or(FrameError::NotContiguous)?)?;
    }

    dst.set_pts(src.pts());
    dst.set_sequence_number(src.sequence_number());
    Ok(())
}

/// A frame as stored in a queue: either a slot-owned buffer or a reference-counted
/// handle shared read-only across several queues.
#[derive(Debug)]
pub enum FrameHandle {
    Owned(Box<dyn Frame>),
    Shared(Arc<dyn Frame>),
}

impl FrameHandle {
    pub fn as_frame(&self) -> &dyn Frame {
        match self {
            FrameHandle::Owned(frame) => frame.as_ref(),
            FrameHandle::Shared(frame) => frame.as_ref(),
        }
    }

    /// Mutable access; only possible for owned frames or a shared frame nobody else
    /// references any more.
    pub fn as_frame_mut(&mut self) -> Option<&mut dyn Frame> {
        match self {
            FrameHandle::Owned(frame) => Some(frame.as_mut()),
            FrameHandle::Shared(frame) => Arc::get_mut(frame).map(|frame| -> &mut dyn Frame { frame }),
        }
    }

    pub fn is_shared(&self) -> bool {
        matches!(self, FrameHandle::Shared(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_frame_creation() {
        let frame = RawFrame::new(16);
        assert_eq!(frame.length(), 0);
        assert_eq!(frame.max_length(), 16);
        assert!(!frame.is_planar());
        assert_eq!(frame.data_buf(), Some(&[][..]));
        assert!(frame.id() > 0);
    }

    #[test]
    fn test_frame_ids_are_unique() {
        let a = RawFrame::new(4);
        let b = RawFrame::new(4);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_set_length_rejects_overflow() {
        let mut frame = RawFrame::new(4);
        frame.set_length(3).unwrap();

        let err = frame.set_length(5).unwrap_err();
        assert_eq!(
            err,
            FrameError::LengthExceedsCapacity {
                length: 5,
                max_length: 4
            }
        );
        assert_eq!(frame.length(), 3);
    }

    #[test]
    fn test_write_bytes() {
        let mut frame = RawFrame::new(8);
        frame.write_bytes(&[1, 2, 3]).unwrap();
        assert_eq!(frame.data_buf(), Some(&[1u8, 2, 3][..]));

        assert!(frame.write_bytes(&[0u8; 9]).is_err());
        assert_eq!(frame.length(), 3);
    }

    #[test]
    fn test_planar_frame_accessors() {
        let mut frame = PlanarFrame::new(3, 8);
        assert!(frame.is_planar());
        assert!(frame.data_buf().is_none());
        assert_eq!(frame.plane_count(), 3);

        frame.plane_mut(1).unwrap()[..2].copy_from_slice(&[7, 9]);
        frame.set_length(2).unwrap();
        assert_eq!(frame.plane(1), Some(&[7u8, 9][..]));
        assert!(frame.plane(3).is_none());
        assert_eq!(frame.write_bytes(&[1]), Err(FrameError::NotContiguous));
    }

    #[test]
    fn test_samples_view() {
        let mut frame = RawFrame::new(8);
        frame.write_bytes(&[44, 1, 0, 0]).unwrap();
        assert_eq!(frame.samples::<u8>().unwrap(), &[44, 1, 0, 0]);
        assert_eq!(frame.read_samples::<i16>().unwrap(), vec![300, 0]);

        frame.set_length(3).unwrap();
        assert!(frame.samples::<i16>().is_err());
        assert!(frame.read_samples::<i16>().is_err());
    }

    #[test]
    fn test_timing_fields() {
        let mut frame = RawFrame::new(4);
        frame.set_pts(Some(40_000_000));
        frame.set_sequence_number(7);
        assert_eq!(frame.pts(), Some(40_000_000));
        assert_eq!(frame.sequence_number(), 7);
        assert!(format!("{}", frame).contains("seq: 7"));
    }

    #[test]
    fn test_copy_frame() {
        let mut src = RawFrame::new(8);
        src.write_bytes(&[1, 2, 3]).unwrap();
        src.set_pts(Some(5));
        src.set_sequence_number(9);

        let mut dst = RawFrame::new(4);
        copy_frame(&src, &mut dst).unwrap();
        assert_eq!(dst.data_buf(), Some(&[1u8, 2, 3][..]));
        assert_eq!(dst.pts(), Some(5));
        assert_eq!(dst.sequence_number(), 9);

        let mut planar = PlanarFrame::new(2, 8);
        assert_eq!(copy_frame(&src, &mut planar), Err(FrameError::LayoutMismatch));
    }

    #[test]
    fn test_copy_planar_frame() {
        let mut src = PlanarFrame::new(2, 4);
        src.plane_mut(0).unwrap()[..2].copy_from_slice(&[1, 2]);
        src.plane_mut(1).unwrap()[..2].copy_from_slice(&[3, 4]);
        src.set_length(2).unwrap();

        let mut dst = PlanarFrame::new(2, 4);
        copy_frame(&src, &mut dst).unwrap();
        assert_eq!(dst.plane(1), Some(&[3u8, 4][..]));

        let mut small = PlanarFrame::new(2, 1);
        assert!(copy_frame(&src, &mut small).is_err());
    }

    #[test]
    fn test_shared_handle_is_read_only_while_shared() {
        let frame: Arc<dyn Frame> = Arc::from(RawFrame::boxed(4));
        let mut handle = FrameHandle::Shared(Arc::clone(&frame));
        assert!(handle.is_shared());
        assert!(handle.as_frame_mut().is_none());

        drop(frame);
        assert!(handle.as_frame_mut().is_some());
    }
}
