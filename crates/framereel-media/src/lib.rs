//! Framereel Media - random-access decoded frame reading
//!
//! This crate turns a container file into a cursor over fully decoded video
//! frames:
//! - Open a stream through the [`Manager`] or [`Stream::open`]
//! - Read frames in presentation order with [`Stream::get_next_frame`]
//! - Seek to a microsecond timestamp or a frame index
//!
//! Decoding is double-buffered: reads consume one buffer while the decode
//! pump fills the other. Hardware (CUDA) decoding is a configuration switch,
//! not an API change.

pub mod backend;
pub(crate) mod buffer;
pub mod frame;
pub mod manager;
pub mod options;
mod probe;
mod seek;
pub mod stream;
pub mod testing;

pub use backend::{
    DecodedPicture, EncodedPacket, FfmpegBackend, Received, SeekMode, StreamDescriptor,
    VideoBackend,
};
pub use frame::{Frame, Plane};
pub use manager::Manager;
pub use options::DecoderOptions;
pub use stream::Stream;

pub use framereel_core::{DecodeType, PixelFormat, ReelError, Result};

/// Initialize the codec backend. Called implicitly on first open; exposed for
/// callers that want the cost paid up front.
pub fn init() -> Result<()> {
    backend::init_ffmpeg()
}
