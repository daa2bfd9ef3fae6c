//! Time arithmetic for frame-accurate stream access
//!
//! A stream position exists in three coordinate systems at once: native
//! timestamp ticks (whatever the container counts in), wall-clock
//! microseconds from the first frame, and a zero-based frame index. All
//! conversions funnel through [`rescale`] and re-base against the stream's
//! discovered start timestamp, so every public coordinate starts at zero
//! even when the container does not.

use num_rational::Rational64;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Rational value used for time bases and frame rates.
pub type Rational = Rational64;

/// One microsecond expressed as a time base (1/1_000_000 seconds per tick).
const MICROSECONDS: Rational = Rational::new_raw(1, 1_000_000);

/// Rescale `value` from units of `from` into units of `to`.
///
/// Round-to-nearest with ties to even. The intermediate product is computed
/// in `i128`, which cannot overflow for any realistic media timestamp.
pub fn rescale(value: i64, from: Rational, to: Rational) -> i64 {
    let n = value as i128 * *from.numer() as i128 * *to.denom() as i128;
    let d = *from.denom() as i128 * *to.numer() as i128;
    div_round_half_even(n, d)
}

fn div_round_half_even(mut n: i128, mut d: i128) -> i64 {
    debug_assert!(d != 0);
    if d < 0 {
        n = -n;
        d = -d;
    }
    let q = n.div_euclid(d);
    let r = n.rem_euclid(d);
    let rounded = match (2 * r).cmp(&d) {
        std::cmp::Ordering::Greater => q + 1,
        std::cmp::Ordering::Equal if q & 1 != 0 => q + 1,
        _ => q,
    };
    rounded as i64
}

/// A stream time base: seconds per native tick, as a rational.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeBase(Rational);

impl TimeBase {
    /// Microsecond time base.
    pub const MICROSECONDS: Self = Self(MICROSECONDS);

    /// Create a time base of `num/den` seconds per tick.
    #[inline]
    pub fn new(num: i64, den: i64) -> Self {
        Self(Rational::new(num, den))
    }

    /// The underlying rational.
    #[inline]
    pub fn ratio(self) -> Rational {
        self.0
    }

    /// Seconds per tick as `f64`.
    pub fn as_secs_f64(self) -> f64 {
        *self.0.numer() as f64 / *self.0.denom() as f64
    }
}

impl fmt::Display for TimeBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.0.numer(), self.0.denom())
    }
}

/// Frame rate as a rational number (e.g. 30000/1001 for 29.97 fps).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameRate(Rational);

impl FrameRate {
    /// Create a frame rate of `num/den` frames per second.
    ///
    /// The numerator must be positive; a stream without a usable frame rate
    /// has no frame coordinate system.
    #[inline]
    pub fn new(num: i64, den: i64) -> Self {
        debug_assert!(num > 0 && den > 0);
        Self(Rational::new(num, den))
    }

    /// The underlying rational (frames per second).
    #[inline]
    pub fn ratio(self) -> Rational {
        self.0
    }

    /// Seconds per frame, usable as a [`TimeBase`].
    #[inline]
    pub fn period(self) -> TimeBase {
        TimeBase(self.0.recip())
    }

    /// Frames per second as `f64`.
    pub fn as_f64(self) -> f64 {
        *self.0.numer() as f64 / *self.0.denom() as f64
    }
}

impl fmt::Display for FrameRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fps = self.as_f64();
        if (fps - fps.round()).abs() < 0.001 {
            write!(f, "{} fps", fps.round() as i64)
        } else {
            write!(f, "{fps:.3} fps")
        }
    }
}

/// Conversion table for one stream.
///
/// Immutable once built; all four conversions are pure. Zero-based outputs
/// subtract `start_timestamp` *before* rescaling, otherwise the asymmetric
/// rounding drifts by one tick on long streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamClock {
    start_timestamp: i64,
    time_base: TimeBase,
    frame_rate: FrameRate,
}

impl StreamClock {
    /// Build a clock from the stream's discovered start timestamp, its time
    /// base and its frame rate.
    pub fn new(start_timestamp: i64, time_base: TimeBase, frame_rate: FrameRate) -> Self {
        Self {
            start_timestamp,
            time_base,
            frame_rate,
        }
    }

    /// The stream's start timestamp in native ticks.
    #[inline]
    pub fn start_timestamp(&self) -> i64 {
        self.start_timestamp
    }

    /// The stream's time base.
    #[inline]
    pub fn time_base(&self) -> TimeBase {
        self.time_base
    }

    /// The stream's frame rate.
    #[inline]
    pub fn frame_rate(&self) -> FrameRate {
        self.frame_rate
    }

    /// Microseconds from stream start to a native timestamp.
    pub fn time_to_native(&self, time_micros: i64) -> i64 {
        self.start_timestamp + rescale(time_micros, MICROSECONDS, self.time_base.ratio())
    }

    /// Native timestamp to microseconds from stream start.
    pub fn native_to_time(&self, timestamp: i64) -> i64 {
        rescale(
            timestamp - self.start_timestamp,
            self.time_base.ratio(),
            MICROSECONDS,
        )
    }

    /// Zero-based frame index to a native timestamp.
    pub fn frame_to_native(&self, frame: i64) -> i64 {
        self.start_timestamp
            + rescale(
                frame,
                self.frame_rate.period().ratio(),
                self.time_base.ratio(),
            )
    }

    /// Native timestamp to a zero-based frame index.
    pub fn native_to_frame(&self, timestamp: i64) -> i64 {
        rescale(
            timestamp - self.start_timestamp,
            self.time_base.ratio(),
            self.frame_rate.period().ratio(),
        )
    }

    /// Frame index to microseconds. Independent of the start timestamp.
    pub fn frame_to_time(&self, frame: i64) -> i64 {
        rescale(
            frame,
            Rational::new_raw(1_000_000, 1),
            self.frame_rate.ratio(),
        )
    }

    /// Microseconds to frame index. Independent of the start timestamp.
    pub fn time_to_frame(&self, time_micros: i64) -> i64 {
        rescale(time_micros, MICROSECONDS, self.frame_rate.period().ratio())
    }

    /// Display duration of a single frame in microseconds.
    #[inline]
    pub fn frame_duration(&self) -> i64 {
        self.frame_to_time(1)
    }
}
