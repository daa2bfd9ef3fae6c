//! Stream introspection.
//!
//! Computes the start timestamp, total frame count and total duration at
//! stream construction. Each scalar is an ordered cascade of fallbacks:
//! trust the container metadata when it is present and plausible, otherwise
//! probe the packet stream directly. Probes that fail log once and leave the
//! scalar at zero; they never prevent construction.

use framereel_core::StreamClock;
use tracing::warn;

use crate::backend::{EncodedPacket, SeekMode, StreamDescriptor, VideoBackend};

/// Frame index used to aim the tail probe past the last keyframe.
const TAIL_PROBE_FRAME: i64 = 1 << 29;

/// Discover the stream's start timestamp in native ticks.
///
/// Preference order: the container-reported start time; the minimum valid
/// PTS (DTS fallback) over the first `codec_delay` packets of the stream;
/// zero.
pub(crate) fn discover_start_timestamp<B: VideoBackend>(backend: &mut B) -> i64 {
    if let Some(ts) = backend.descriptor().start_time {
        return ts;
    }
    scan_head(backend).unwrap_or_else(|| {
        warn!("failed to determine stream start time");
        0
    })
}

/// Discover the total number of frames.
pub(crate) fn discover_total_frames<B: VideoBackend>(backend: &mut B, clock: &StreamClock) -> i64 {
    let descriptor = backend.descriptor().clone();
    frames_from_container_duration(&descriptor, clock)
        .or_else(|| frames_from_stream_metadata(&descriptor, clock))
        .or_else(|| frames_from_stream_duration(&descriptor, clock))
        .or_else(|| {
            // Last frame index observed on the wire, plus one.
            scan_tail(backend, clock).map(|ts| 1 + clock.native_to_frame(ts))
        })
        .unwrap_or_else(|| {
            warn!("failed to determine number of frames in stream");
            0
        })
}

/// Discover the total duration in microseconds.
pub(crate) fn discover_total_duration<B: VideoBackend>(
    backend: &mut B,
    clock: &StreamClock,
) -> i64 {
    let descriptor = backend.descriptor().clone();
    duration_from_container(&descriptor, clock)
        .or_else(|| duration_from_stream(&descriptor, clock))
        .or_else(|| {
            // Timestamp of the last packet plus one frame of display time.
            scan_tail(backend, clock).map(|ts| clock.native_to_time(ts) + clock.frame_to_time(1))
        })
        .unwrap_or_else(|| {
            warn!("failed to determine stream duration");
            0
        })
}

// ── metadata fallbacks ──────────────────────────────────────────

fn frames_from_container_duration(
    descriptor: &StreamDescriptor,
    clock: &StreamClock,
) -> Option<i64> {
    if descriptor.container_duration <= 0 {
        return None;
    }
    let frames = clock.time_to_frame(descriptor.container_duration);
    // The container duration is rounded to its own time base; when it agrees
    // with the stream's frame count to within one frame, the count is the
    // more precise source.
    if (frames - descriptor.frame_count).abs() > 1 {
        // The doubled start cancels the subtraction built into the
        // conversion; totals are normalized by exactly one start offset.
        Some(frames - clock.native_to_frame(2 * clock.start_timestamp()))
    } else {
        None
    }
}

fn frames_from_stream_metadata(
    descriptor: &StreamDescriptor,
    clock: &StreamClock,
) -> Option<i64> {
    (descriptor.frame_count > 0)
        .then(|| descriptor.frame_count - clock.native_to_frame(2 * clock.start_timestamp()))
}

fn frames_from_stream_duration(
    descriptor: &StreamDescriptor,
    clock: &StreamClock,
) -> Option<i64> {
    (descriptor.stream_duration > 0).then(|| clock.native_to_frame(descriptor.stream_duration))
}

fn duration_from_container(
    descriptor: &StreamDescriptor,
    clock: &StreamClock,
) -> Option<i64> {
    (descriptor.container_duration > 0).then(|| {
        descriptor.container_duration - clock.native_to_time(2 * clock.start_timestamp())
    })
}

fn duration_from_stream(
    descriptor: &StreamDescriptor,
    clock: &StreamClock,
) -> Option<i64> {
    (descriptor.stream_duration > 0).then(|| clock.native_to_time(descriptor.stream_duration))
}

// ── packet probes ───────────────────────────────────────────────

/// Read the first `codec_delay` packets of the stream and return the minimum
/// valid timestamp. Iterating past one packet tolerates B-frame reordering.
fn scan_head<B: VideoBackend>(backend: &mut B) -> Option<i64> {
    let descriptor = backend.descriptor().clone();
    let origin = descriptor.first_dts.unwrap_or(0).min(0);

    backend.flush();
    backend.seek(origin, SeekMode::Backward).ok()?;

    let mut earliest: Option<i64> = None;
    let mut seen = 0;
    while seen < descriptor.codec_delay {
        let Some(packet) = backend.read_packet().ok().flatten() else {
            break;
        };
        if packet.is_selected_stream() {
            if let Some(ts) = packet.pts().or_else(|| packet.dts()) {
                earliest = Some(earliest.map_or(ts, |e| e.min(ts)));
            }
            seen += 1;
        }
    }

    // Future reads continue from the start of the stream.
    backend.seek(origin, SeekMode::Backward).ok();
    earliest.or(Some(0))
}

/// Seek near the end of the stream and read out the remaining packets,
/// tracking the maximum valid PTS (DTS fallback). Restores the read position
/// to the origin on exit.
fn scan_tail<B: VideoBackend>(backend: &mut B, clock: &StreamClock) -> Option<i64> {
    backend.flush();
    backend
        .seek(clock.frame_to_native(TAIL_PROBE_FRAME), SeekMode::Backward)
        .ok()?;

    let mut latest = clock.start_timestamp();
    while let Some(packet) = backend.read_packet().ok().flatten() {
        if packet.is_selected_stream() {
            if let Some(ts) = packet.pts().or_else(|| packet.dts()) {
                latest = latest.max(ts);
            }
        }
    }

    backend.seek(0, SeekMode::Time).ok();
    Some(latest)
}
