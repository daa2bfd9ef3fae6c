//! Decoder configuration.

use framereel_core::DecodeType;
use serde::{Deserialize, Serialize};

/// Options controlling how a stream is opened and decoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecoderOptions {
    /// Capacity of each of the two frame buffers. Larger values trade memory
    /// for fewer decode bursts; decoded frames are big, keep this small.
    pub buffer_length: usize,
    /// Software or CUDA hardware decoding.
    pub decode_type: DecodeType,
    /// When decoding on the GPU, copy finished frames back to host memory.
    /// Ignored for software decoding.
    pub output_host: bool,
}

impl Default for DecoderOptions {
    fn default() -> Self {
        Self {
            buffer_length: 10,
            decode_type: DecodeType::Software,
            output_host: true,
        }
    }
}

impl DecoderOptions {
    /// Software decoding with the default buffer size.
    pub fn software() -> Self {
        Self::default()
    }

    /// CUDA decoding, frames copied back to host memory.
    pub fn cuda() -> Self {
        Self {
            decode_type: DecodeType::Cuda,
            ..Self::default()
        }
    }
}
