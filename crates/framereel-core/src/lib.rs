//! Framereel Core - Foundation types for the frame reader
//!
//! This crate provides the fundamental types used throughout framereel:
//! - Time arithmetic between native ticks, microseconds and frame indices
//! - Pixel format and decode type tags
//! - The error taxonomy shared by all crates

pub mod error;
pub mod pixel;
pub mod time;

pub use error::{ReelError, Result};
pub use pixel::{DecodeType, PixelFormat};
pub use time::{rescale, FrameRate, Rational, StreamClock, TimeBase};
