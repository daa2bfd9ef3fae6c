//! Pixel format and decode type tags for decoded frames.

use serde::{Deserialize, Serialize};

/// Pixel format of a decoded picture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PixelFormat {
    /// YUV 4:2:0 planar
    #[default]
    Yuv420P,
    /// YUV 4:2:0 planar 10-bit
    Yuv420P10,
    /// YUV 4:2:2 planar
    Yuv422P,
    /// YUV 4:4:4 planar
    Yuv444P,
    /// NV12: Y plane plus interleaved UV plane
    Nv12,
    /// 8-bit grayscale
    Gray8,
    /// Packed 24-bit RGB
    Rgb24,
    /// Anything the reader does not classify
    Unknown,
}

impl PixelFormat {
    /// Number of planes for this format.
    pub fn plane_count(self) -> usize {
        match self {
            Self::Yuv420P | Self::Yuv420P10 | Self::Yuv422P | Self::Yuv444P => 3,
            Self::Nv12 => 2,
            Self::Gray8 | Self::Rgb24 => 1,
            Self::Unknown => 0,
        }
    }
}

/// Where a decoded picture lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DecodeType {
    /// Host memory, produced by a software decoder (or copied back from GPU).
    #[default]
    Software,
    /// CUDA device memory.
    Cuda,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plane_counts() {
        assert_eq!(PixelFormat::Yuv420P.plane_count(), 3);
        assert_eq!(PixelFormat::Nv12.plane_count(), 2);
        assert_eq!(PixelFormat::Rgb24.plane_count(), 1);
        assert_eq!(PixelFormat::Unknown.plane_count(), 0);
    }
}
