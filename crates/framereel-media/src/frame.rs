//! The frame value object.

use framereel_core::{DecodeType, PixelFormat};

use crate::backend::{DecodedPicture, FfmpegPicture};

/// One plane of decoded pixel data.
#[derive(Debug, Clone, Copy)]
pub struct Plane<'a> {
    /// Raw pixel rows, `stride` bytes apart.
    pub data: &'a [u8],
    /// Bytes per row, including padding.
    pub stride: usize,
}

/// An immutable view of one decoded picture.
///
/// Carries the wall-clock time (microseconds from stream start) and the
/// zero-based frame index computed by the decode pump. The underlying picture
/// handle is owned exclusively; dropping the last reference to the frame
/// releases the decoder's picture. Frames hold no reference back to the
/// stream that produced them.
pub struct Frame<P = FfmpegPicture> {
    picture: P,
    time: i64,
    frame_index: i64,
}

impl<P: DecodedPicture> Frame<P> {
    pub(crate) fn new(picture: P, time: i64, frame_index: i64) -> Self {
        Self {
            picture,
            time,
            frame_index,
        }
    }

    /// Presentation time in microseconds from stream start.
    #[inline]
    pub fn time(&self) -> i64 {
        self.time
    }

    /// Zero-based frame index.
    #[inline]
    pub fn frame_index(&self) -> i64 {
        self.frame_index
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.picture.width()
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.picture.height()
    }

    /// Picture aspect ratio.
    pub fn aspect_ratio(&self) -> f64 {
        f64::from(self.picture.width()) / f64::from(self.picture.height())
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.picture.pixel_format()
    }

    /// Number of readable planes. Zero for pictures in device memory.
    pub fn plane_count(&self) -> usize {
        self.picture.plane_count()
    }

    /// Pixel data for one plane, or `None` when the plane is not in host
    /// memory or the index is out of range.
    pub fn plane(&self, index: usize) -> Option<Plane<'_>> {
        self.picture
            .plane(index)
            .map(|(data, stride)| Plane { data, stride })
    }

    /// Whether the picture lives in host or CUDA memory.
    pub fn decode_type(&self) -> DecodeType {
        self.picture.decode_type()
    }
}

impl<P> std::fmt::Debug for Frame<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("time", &self.time)
            .field("frame_index", &self.frame_index)
            .finish()
    }
}
