//! The seek engine.
//!
//! Both entry points try three strategies in order: advance within the
//! active buffer, decode forward over a short window, or flush the decoder
//! and reposition the container. Repositioning happens at most once per
//! request; if the target is still not reachable afterwards the seek fails
//! and the stream is left valid but at an unspecified position.
//!
//! Frame-indexed container seeks are not supported everywhere. The first
//! failure latches `frame_seek_supported` off for the stream's lifetime and
//! every frame seek from then on is translated to a timestamp seek.

use framereel_core::{ReelError, Result};
use tracing::{error, warn};

use crate::backend::{SeekMode, VideoBackend};
use crate::stream::{State, Stream};

/// Forward-seek window for timestamp targets, in frames.
const FORWARD_SEEK_FRAMES: i64 = 25;

impl<B: VideoBackend> Stream<B> {
    /// Position the cursor so the next frame's display interval covers
    /// `time_micros` (or, between frames, the next frame at or after it).
    pub fn seek(&self, time_micros: i64) -> Result<()> {
        if time_micros < 0 {
            return Err(ReelError::InvalidArgument(format!(
                "seek target {time_micros} is negative"
            )));
        }
        if self.duration() > 0 && time_micros >= self.duration() {
            return Err(ReelError::InvalidArgument(format!(
                "seek target {time_micros} is past the end of the stream"
            )));
        }
        let mut state = self.state.lock();
        self.seek_time_locked(&mut state, time_micros)
    }

    /// Position the cursor on the frame with the given zero-based index.
    pub fn seek_frame(&self, frame: i64) -> Result<()> {
        if frame < 0 {
            return Err(ReelError::InvalidArgument(format!(
                "seek target frame {frame} is negative"
            )));
        }
        if self.total_frames() > 0 && frame >= self.total_frames() {
            return Err(ReelError::InvalidArgument(format!(
                "seek target frame {frame} is past the end of the stream"
            )));
        }
        let mut state = self.state.lock();
        self.seek_frame_locked(&mut state, frame)
    }

    fn seek_time_locked(&self, state: &mut State<B>, target: i64) -> Result<()> {
        let mut repositioned = false;
        loop {
            if !state.active.is_empty() {
                let front = state.active.front().map(|f| f.time()).unwrap_or(i64::MAX);
                let back = state.active.back().map(|f| f.time()).unwrap_or(i64::MIN);

                // The buffer covers the target when it falls anywhere up to
                // the end of the last frame's display interval.
                if target >= front && target < back + self.frame_duration() {
                    return self.scan_to_time(state, target);
                }

                // Close enough ahead that decoding forward beats a container
                // seek back to the previous keyframe.
                if target > back && target <= back + self.clock().frame_to_time(FORWARD_SEEK_FRAMES)
                {
                    state.active.clear();
                    self.refill_active(state)?;
                    if state.active.is_empty() {
                        return Err(ReelError::EndOfStream);
                    }
                    repositioned = true;
                    continue;
                }
            }

            if repositioned {
                error!("failed to seek to time {target}");
                return Err(ReelError::Backend(format!(
                    "failed to seek to time {target}"
                )));
            }

            // Full flush and container seek. The start offset is added on
            // top of the conversion's own re-basing; the container expects
            // un-rebased ticks here.
            state.backend.flush();
            let native = self.clock().time_to_native(target) + self.clock().start_timestamp();
            state.backend.seek(native, SeekMode::Time).map_err(|e| {
                error!("failed seeking to time {target}: {e}");
                e
            })?;
            state.active.clear();
            self.refill_active(state)?;
            if state.active.is_empty() {
                return Err(ReelError::EndOfStream);
            }
            repositioned = true;
        }
    }

    fn seek_frame_locked(&self, state: &mut State<B>, target: i64) -> Result<()> {
        let mut repositioned = false;
        loop {
            if !state.active.is_empty() {
                let front = state
                    .active
                    .front()
                    .map(|f| f.frame_index())
                    .unwrap_or(i64::MAX);
                let back = state
                    .active
                    .back()
                    .map(|f| f.frame_index())
                    .unwrap_or(i64::MIN);

                if target >= front && target <= back {
                    return self.scan_to_frame(state, target);
                }

                // Within two buffers ahead: read on from where we are.
                if target > back && target <= back + 2 * self.buffer_length() as i64 {
                    return self.scan_to_frame(state, target);
                }
            }

            if repositioned || !state.frame_seek_supported {
                if state.frame_seek_supported {
                    state.frame_seek_supported = false;
                    warn!("frame-indexed seek not supported here, retrying by timestamp");
                } else if repositioned {
                    error!("failed to seek to frame {target}");
                    return Err(ReelError::Backend(format!(
                        "failed to seek to frame {target}"
                    )));
                }
                let time = self.clock().frame_to_time(target);
                return self.seek_time_locked(state, time);
            }

            state.backend.flush();
            let native = target + self.clock().native_to_frame(self.clock().start_timestamp());
            if let Err(e) = state.backend.seek(native, SeekMode::FrameIndex) {
                state.frame_seek_supported = false;
                warn!("frame-indexed seek to {target} failed ({e}), retrying by timestamp");
                let time = self.clock().frame_to_time(target);
                return self.seek_time_locked(state, time);
            }
            state.active.clear();
            self.refill_active(state)?;
            if state.active.is_empty() {
                return Err(ReelError::EndOfStream);
            }
            repositioned = true;
        }
    }

    /// Pop frames until the front frame's display interval covers `target`,
    /// or the front frame is the first at or after it.
    fn scan_to_time(&self, state: &mut State<B>, target: i64) -> Result<()> {
        loop {
            let frame = self
                .peek_locked(state)?
                .ok_or(ReelError::EndOfStream)?;
            if target <= frame.time() || target < frame.time() + self.frame_duration() {
                return Ok(());
            }
            state.active.pop();
        }
    }

    /// Pop frames until the front frame's index reaches `target`.
    fn scan_to_frame(&self, state: &mut State<B>, target: i64) -> Result<()> {
        loop {
            let frame = self
                .peek_locked(state)?
                .ok_or(ReelError::EndOfStream)?;
            if target <= frame.frame_index() {
                return Ok(());
            }
            state.active.pop();
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::options::DecoderOptions;
    use crate::stream::Stream;
    use crate::testing::ScriptedBackend;
    use framereel_core::ReelError;

    fn make(backend: ScriptedBackend, buffer_length: usize) -> Stream<ScriptedBackend> {
        let options = DecoderOptions {
            buffer_length,
            ..DecoderOptions::default()
        };
        Stream::from_backend(backend, &options).unwrap()
    }

    fn backend_seek_count(stream: &Stream<ScriptedBackend>) -> usize {
        stream.state.lock().backend.seeks.len()
    }

    fn peek_index(stream: &Stream<ScriptedBackend>) -> i64 {
        stream.peek_next_frame().unwrap().unwrap().frame_index()
    }

    #[test]
    fn test_seek_by_time_lands_on_the_frame() {
        let stream = make(ScriptedBackend::standard(300), 10);
        stream.seek(5_000_000).unwrap();
        let frame = stream.peek_next_frame().unwrap().unwrap();
        assert_eq!(frame.frame_index(), 150);
        assert_eq!(frame.time(), 5_000_000);
    }

    #[test]
    fn test_seek_passes_unrebased_ticks_to_the_container() {
        let stream = make(ScriptedBackend::standard(300), 10);
        stream.seek(5_000_000).unwrap();
        let state = stream.state.lock();
        let (target, _) = state.backend.seeks[0];
        assert_eq!(target, 450_000);
    }

    #[test]
    fn test_seek_frame_then_sequential_reads() {
        let stream = make(ScriptedBackend::standard(300), 10);
        stream.seek_frame(150).unwrap();
        assert_eq!(stream.get_next_frame().unwrap().unwrap().frame_index(), 150);
        assert_eq!(stream.get_next_frame().unwrap().unwrap().frame_index(), 151);
    }

    #[test]
    fn test_seek_within_buffer_does_not_touch_the_container() {
        let stream = make(ScriptedBackend::standard(300), 10);
        stream.get_next_frame().unwrap();
        assert_eq!(backend_seek_count(&stream), 0);

        stream.seek_frame(5).unwrap();
        assert_eq!(backend_seek_count(&stream), 0);
        assert_eq!(peek_index(&stream), 5);
    }

    #[test]
    fn test_seek_time_within_display_interval() {
        let stream = make(ScriptedBackend::standard(300), 10);
        stream.get_next_frame().unwrap();
        // one third into frame 7's display interval
        let target = stream.frame_to_time(7) + 10_000;
        stream.seek(target).unwrap();
        assert_eq!(backend_seek_count(&stream), 0);
        assert_eq!(peek_index(&stream), 7);
    }

    #[test]
    fn test_short_forward_frame_seek_reads_on() {
        let stream = make(ScriptedBackend::standard(300), 4);
        stream.get_next_frame().unwrap();
        // just past the buffer but within two buffer lengths
        stream.seek_frame(9).unwrap();
        assert_eq!(backend_seek_count(&stream), 0);
        assert_eq!(peek_index(&stream), 9);
    }

    #[test]
    fn test_short_forward_time_seek_decodes_on() {
        let stream = make(ScriptedBackend::standard(300), 10);
        stream.get_next_frame().unwrap();
        // 20 frames ahead: outside the buffer, inside the forward window
        stream.seek(stream.frame_to_time(20)).unwrap();
        assert_eq!(backend_seek_count(&stream), 0);
        assert_eq!(peek_index(&stream), 20);
    }

    #[test]
    fn test_far_seek_repositions_the_container() {
        let stream = make(ScriptedBackend::standard(300), 10);
        stream.seek(stream.frame_to_time(200)).unwrap();
        assert_eq!(peek_index(&stream), 200);
        let state = stream.state.lock();
        assert!(!state.backend.seeks.is_empty());
        assert!(state.backend.flushes > 0);
    }

    #[test]
    fn test_backward_seek_after_reading_forward() {
        let stream = make(ScriptedBackend::standard(300), 10);
        stream.seek_frame(120).unwrap();
        assert_eq!(peek_index(&stream), 120);
        stream.seek_frame(30).unwrap();
        assert_eq!(peek_index(&stream), 30);
    }

    #[test]
    fn test_seek_between_frames_picks_the_covering_frame() {
        let stream = make(ScriptedBackend::standard(300), 10);
        stream.seek(4_987_654).unwrap();
        let frame = stream.peek_next_frame().unwrap().unwrap();
        assert_eq!(frame.frame_index(), 149);
        assert!(frame.time() <= 4_987_654);
        assert!(4_987_654 < frame.time() + stream.frame_duration());
    }

    #[test]
    fn test_seek_is_idempotent() {
        let stream = make(ScriptedBackend::standard(300), 10);
        stream.seek(5_000_000).unwrap();
        let first = peek_index(&stream);
        stream.seek(5_000_000).unwrap();
        assert_eq!(peek_index(&stream), first);
    }

    #[test]
    fn test_frame_seek_failure_latches_time_fallback() {
        let stream = make(ScriptedBackend::standard(300).with_failing_frame_seek(), 10);
        stream.seek_frame(150).unwrap();
        assert_eq!(peek_index(&stream), 150);
        assert_eq!(stream.state.lock().backend.frame_seek_attempts(), 1);

        // the latch keeps later frame seeks off the frame-indexed path
        stream.seek_frame(270).unwrap();
        assert_eq!(peek_index(&stream), 270);
        assert_eq!(stream.state.lock().backend.frame_seek_attempts(), 1);
    }

    #[test]
    fn test_seek_past_known_end_fails_and_stream_survives() {
        let stream = make(ScriptedBackend::standard(300), 10);
        let result = stream.seek_frame(1_000_000_000_000);
        assert!(matches!(result, Err(ReelError::InvalidArgument(_))));

        stream.seek_frame(0).unwrap();
        assert_eq!(peek_index(&stream), 0);
    }

    #[test]
    fn test_negative_targets_are_rejected() {
        let stream = make(ScriptedBackend::standard(300), 10);
        assert!(matches!(
            stream.seek(-1),
            Err(ReelError::InvalidArgument(_))
        ));
        assert!(matches!(
            stream.seek_frame(-1),
            Err(ReelError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_seek_time_past_known_duration_is_rejected() {
        let stream = make(ScriptedBackend::standard(300), 10);
        assert_eq!(stream.duration(), 10_000_000);
        assert!(matches!(
            stream.seek(10_000_000),
            Err(ReelError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_sequence_matches_individual_seeks() {
        let offsets = [5, 40, 80];
        let sequenced = make(ScriptedBackend::standard(300), 10)
            .get_next_frame_sequence(&offsets)
            .unwrap();

        let stream = make(ScriptedBackend::standard(300), 10);
        for (offset, frame) in offsets.iter().zip(&sequenced) {
            stream.seek_frame(*offset).unwrap();
            let sought = stream.get_next_frame().unwrap().unwrap();
            assert_eq!(sought.frame_index(), frame.frame_index());
            assert_eq!(sought.time(), frame.time());
        }
    }

    #[test]
    fn test_seek_with_offset_start_adds_the_offset_twice() {
        let stream = make(ScriptedBackend::new(300, 6_000), 10);
        let target = stream.frame_to_time(200);
        stream.seek(target).unwrap();
        assert_eq!(peek_index(&stream), 200);
        let state = stream.state.lock();
        let (native, _) = state.backend.seeks[0];
        assert_eq!(native, stream.time_to_native(target) + 6_000);
    }
}
