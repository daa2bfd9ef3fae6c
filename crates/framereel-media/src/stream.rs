//! The per-stream decode pipeline.
//!
//! A [`Stream`] owns the demuxer/decoder pair and two frame buffers. Reads
//! consume the active buffer; when it runs dry the decode pump fills the
//! other buffer and the two are swapped. All public operations take the
//! stream's mutex for their full duration; two distinct streams are
//! independent.

use std::path::Path;
use std::sync::Arc;

use framereel_core::{FrameRate, ReelError, Result, StreamClock};
use parking_lot::Mutex;
use tracing::error;

use crate::backend::{DecodedPicture, EncodedPacket, FfmpegBackend, Received, VideoBackend};
use crate::buffer::FrameQueue;
use crate::frame::Frame;
use crate::options::DecoderOptions;
use crate::probe;

/// Scalars cached at construction; constant for the stream's lifetime.
struct StreamProps {
    width: u32,
    height: u32,
    aspect_ratio: f64,
    total_frames: i64,
    total_duration: i64,
    buffer_length: usize,
    codec_delay: i64,
}

/// Mutable pipeline state, guarded by the stream mutex.
///
/// The buffers are declared before the backend so dropping a stream releases
/// every held picture before the decoder that produced them closes.
pub(crate) struct State<B: VideoBackend> {
    pub(crate) active: FrameQueue<B::Picture>,
    pub(crate) fill: FrameQueue<B::Picture>,
    pub(crate) frame_seek_supported: bool,
    pub(crate) backend: B,
}

/// A cursor over the decoded frames of one video stream.
pub struct Stream<B: VideoBackend = FfmpegBackend> {
    props: StreamProps,
    clock: StreamClock,
    pub(crate) state: Mutex<State<B>>,
}

impl Stream<FfmpegBackend> {
    /// Open the best video stream of the container at `path`.
    pub fn open(path: impl AsRef<Path>, options: &DecoderOptions) -> Result<Self> {
        let backend = FfmpegBackend::open(path.as_ref(), options)?;
        Self::from_backend(backend, options)
    }
}

impl<B: VideoBackend> Stream<B> {
    /// Build a stream over an already-opened backend.
    ///
    /// Runs introspection once: start-timestamp discovery, then the total
    /// frame and duration cascades against the resulting clock.
    pub fn from_backend(mut backend: B, options: &DecoderOptions) -> Result<Self> {
        if options.buffer_length == 0 {
            return Err(ReelError::InvalidArgument(
                "buffer length must be positive".into(),
            ));
        }

        let descriptor = backend.descriptor().clone();
        let start_timestamp = probe::discover_start_timestamp(&mut backend);
        let clock = StreamClock::new(start_timestamp, descriptor.time_base, descriptor.frame_rate);
        let total_frames = probe::discover_total_frames(&mut backend, &clock);
        let total_duration = probe::discover_total_duration(&mut backend, &clock);

        let frame_aspect = f64::from(descriptor.width) / f64::from(descriptor.height);
        let aspect_ratio = match descriptor.sample_aspect {
            Some(sar) => frame_aspect * *sar.numer() as f64 / *sar.denom() as f64,
            None => frame_aspect,
        };

        Ok(Self {
            props: StreamProps {
                width: descriptor.width,
                height: descriptor.height,
                aspect_ratio,
                total_frames,
                total_duration,
                buffer_length: options.buffer_length,
                codec_delay: descriptor.codec_delay,
            },
            clock,
            state: Mutex::new(State {
                active: FrameQueue::with_capacity(options.buffer_length),
                fill: FrameQueue::with_capacity(options.buffer_length),
                frame_seek_supported: true,
                backend,
            }),
        })
    }

    // ── accessors ───────────────────────────────────────────────

    pub fn width(&self) -> u32 {
        self.props.width
    }

    pub fn height(&self) -> u32 {
        self.props.height
    }

    /// Display aspect ratio.
    pub fn aspect_ratio(&self) -> f64 {
        self.props.aspect_ratio
    }

    /// Total number of frames, or 0 when it could not be determined.
    pub fn total_frames(&self) -> i64 {
        self.props.total_frames
    }

    /// Total duration in microseconds, or 0 when it could not be determined.
    pub fn duration(&self) -> i64 {
        self.props.total_duration
    }

    pub fn frame_rate(&self) -> FrameRate {
        self.clock.frame_rate()
    }

    /// Display duration of one frame in microseconds.
    pub fn frame_duration(&self) -> i64 {
        self.clock.frame_duration()
    }

    /// Capacity of each of the two frame buffers.
    pub fn buffer_length(&self) -> usize {
        self.props.buffer_length
    }

    /// The stream's conversion table between native ticks, microseconds and
    /// frame indices.
    pub fn clock(&self) -> &StreamClock {
        &self.clock
    }

    pub fn frame_to_time(&self, frame: i64) -> i64 {
        self.clock.frame_to_time(frame)
    }

    pub fn time_to_frame(&self, time_micros: i64) -> i64 {
        self.clock.time_to_frame(time_micros)
    }

    pub fn time_to_native(&self, time_micros: i64) -> i64 {
        self.clock.time_to_native(time_micros)
    }

    pub fn native_to_time(&self, timestamp: i64) -> i64 {
        self.clock.native_to_time(timestamp)
    }

    pub fn frame_to_native(&self, frame: i64) -> i64 {
        self.clock.frame_to_native(frame)
    }

    pub fn native_to_frame(&self, timestamp: i64) -> i64 {
        self.clock.native_to_frame(timestamp)
    }

    // ── cursor ──────────────────────────────────────────────────

    /// The next frame in presentation order, without advancing the cursor.
    /// `Ok(None)` at end of stream.
    pub fn peek_next_frame(&self) -> Result<Option<Arc<Frame<B::Picture>>>> {
        let mut state = self.state.lock();
        self.peek_locked(&mut state)
    }

    /// The next frame in presentation order, advancing the cursor.
    /// `Ok(None)` at end of stream.
    pub fn get_next_frame(&self) -> Result<Option<Arc<Frame<B::Picture>>>> {
        let mut state = self.state.lock();
        let frame = self.peek_locked(&mut state)?;
        if frame.is_some() {
            state.active.pop();
        }
        Ok(frame)
    }

    /// Read the frames at the given zero-based `offsets` relative to the
    /// current cursor, advancing past all of them.
    ///
    /// Offsets must be strictly ascending; a repeated offset cannot be
    /// satisfied because each emitted frame is consumed. The whole sequence
    /// runs under one lock; partial progress is not observable from other
    /// threads. Running out of stream before the sequence completes is an
    /// error.
    pub fn get_next_frame_sequence(&self, offsets: &[i64]) -> Result<Vec<Arc<Frame<B::Picture>>>> {
        if offsets.windows(2).any(|w| w[1] <= w[0]) || offsets.first().is_some_and(|&o| o < 0) {
            return Err(ReelError::InvalidArgument(
                "frame sequence offsets must be non-negative and strictly ascending".into(),
            ));
        }

        let mut state = self.state.lock();
        let mut frames = Vec::with_capacity(offsets.len());
        let mut position = 0;
        for &offset in offsets {
            while position < offset {
                self.peek_locked(&mut state)?
                    .ok_or(ReelError::EndOfStream)?;
                state.active.pop();
                position += 1;
            }
            let frame = self
                .peek_locked(&mut state)?
                .ok_or(ReelError::EndOfStream)?;
            state.active.pop();
            position = offset + 1;
            frames.push(frame);
        }
        Ok(frames)
    }

    // ── pipeline internals ──────────────────────────────────────

    pub(crate) fn peek_locked(
        &self,
        state: &mut State<B>,
    ) -> Result<Option<Arc<Frame<B::Picture>>>> {
        if state.active.is_empty() {
            self.refill_active(state)?;
            if state.active.is_empty() {
                return Ok(None);
            }
        }
        Ok(state.active.front().cloned())
    }

    /// Run one pump cycle into the fill buffer, then swap it in.
    pub(crate) fn refill_active(&self, state: &mut State<B>) -> Result<()> {
        self.pump(state).map_err(|e| {
            error!("decode pump failed: {e}");
            e
        })?;
        std::mem::swap(&mut state.active, &mut state.fill);
        state.fill.clear();
        Ok(())
    }

    /// Fill the fill buffer with the next run of frames from the current
    /// decoder position.
    ///
    /// Returns once at least `buffer_length` frames are buffered or the
    /// stream is exhausted. The decoder is allowed to produce more than
    /// requested while it completes a reorder flush; that overflow is kept,
    /// bounded by `codec_delay` extra frames.
    fn pump(&self, state: &mut State<B>) -> Result<()> {
        state.fill.clear();
        let target = self.props.buffer_length;
        let limit = target + self.props.codec_delay.max(0) as usize;

        loop {
            let packet = match state.backend.read_packet()? {
                Some(packet) => packet,
                None => {
                    // Demuxer end of file: drain the decoder's reorder queue
                    // so the trailing frames still come out.
                    state.backend.send_eof()?;
                    loop {
                        match state.backend.receive_frame()? {
                            Received::Frame(picture) => {
                                let frame = self.wrap_picture(picture);
                                state.fill.push(frame);
                                if state.fill.len() >= limit {
                                    return Ok(());
                                }
                            }
                            Received::Again | Received::Eof => return Ok(()),
                        }
                    }
                }
            };

            if !packet.is_selected_stream() {
                continue;
            }
            state.backend.send_packet(&packet)?;

            loop {
                match state.backend.receive_frame()? {
                    Received::Frame(picture) => {
                        let frame = self.wrap_picture(picture);
                        state.fill.push(frame);
                        if state.fill.len() >= limit {
                            return Ok(());
                        }
                    }
                    Received::Again | Received::Eof => {
                        if state.fill.len() >= target {
                            return Ok(());
                        }
                        break;
                    }
                }
            }
        }
    }

    fn wrap_picture(&self, picture: B::Picture) -> Arc<Frame<B::Picture>> {
        // A picture without any timestamp pins to the stream start.
        let timestamp = picture
            .best_effort_timestamp()
            .unwrap_or_else(|| self.clock.start_timestamp());
        let time = self.clock.native_to_time(timestamp);
        let frame_index = self.clock.native_to_frame(timestamp);
        Arc::new(Frame::new(picture, time, frame_index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedBackend;
    use framereel_core::DecodeType;

    fn make(backend: ScriptedBackend, buffer_length: usize) -> Stream<ScriptedBackend> {
        let options = DecoderOptions {
            buffer_length,
            ..DecoderOptions::default()
        };
        Stream::from_backend(backend, &options).unwrap()
    }

    fn read_all_indices(stream: &Stream<ScriptedBackend>) -> Vec<i64> {
        let mut indices = Vec::new();
        while let Some(frame) = stream.get_next_frame().unwrap() {
            indices.push(frame.frame_index());
        }
        indices
    }

    #[test]
    fn test_zero_buffer_length_is_rejected() {
        let options = DecoderOptions {
            buffer_length: 0,
            ..DecoderOptions::default()
        };
        let result = Stream::from_backend(ScriptedBackend::standard(30), &options);
        assert!(matches!(result, Err(ReelError::InvalidArgument(_))));
    }

    #[test]
    fn test_sequential_reads_number_every_frame() {
        let stream = make(ScriptedBackend::standard(300), 10);
        let indices = read_all_indices(&stream);
        assert_eq!(indices, (0..300).collect::<Vec<_>>());
        // end of stream is sticky
        assert!(stream.get_next_frame().unwrap().is_none());
        assert!(stream.peek_next_frame().unwrap().is_none());
    }

    #[test]
    fn test_reordered_decode_still_presents_in_order() {
        let backend = ScriptedBackend::standard(300)
            .with_delay(2)
            .with_bframe_cadence();
        let stream = make(backend, 10);
        assert_eq!(read_all_indices(&stream), (0..300).collect::<Vec<_>>());
    }

    #[test]
    fn test_foreign_stream_packets_are_skipped() {
        let stream = make(ScriptedBackend::standard(90).with_other_stream_packets(3), 10);
        assert_eq!(read_all_indices(&stream), (0..90).collect::<Vec<_>>());
    }

    #[test]
    fn test_first_frame_is_origin() {
        let stream = make(ScriptedBackend::standard(30), 10);
        let frame = stream.get_next_frame().unwrap().unwrap();
        assert_eq!(frame.frame_index(), 0);
        assert_eq!(frame.time(), 0);
        assert_eq!(frame.width(), 1920);
        assert_eq!(frame.height(), 1080);
        assert_eq!(frame.decode_type(), DecodeType::Software);
    }

    #[test]
    fn test_offset_start_is_rebased_to_zero() {
        let stream = make(ScriptedBackend::new(60, 9_000), 10);
        assert_eq!(stream.clock().start_timestamp(), 9_000);
        let frame = stream.get_next_frame().unwrap().unwrap();
        assert_eq!(frame.frame_index(), 0);
        assert_eq!(frame.time(), 0);
    }

    #[test]
    fn test_start_probe_discovers_offset() {
        let backend = ScriptedBackend::new(60, 9_000).with_unknown_start();
        let stream = make(backend, 10);
        assert_eq!(stream.clock().start_timestamp(), 9_000);
        let frame = stream.get_next_frame().unwrap().unwrap();
        assert_eq!(frame.frame_index(), 0);
        assert_eq!(frame.time(), 0);
    }

    #[test]
    fn test_peek_does_not_advance() {
        let stream = make(ScriptedBackend::standard(30), 10);
        assert_eq!(stream.peek_next_frame().unwrap().unwrap().frame_index(), 0);
        assert_eq!(stream.peek_next_frame().unwrap().unwrap().frame_index(), 0);
        assert_eq!(stream.get_next_frame().unwrap().unwrap().frame_index(), 0);
        assert_eq!(stream.peek_next_frame().unwrap().unwrap().frame_index(), 1);
    }

    #[test]
    fn test_total_frames_prefers_stream_count_when_close() {
        // container duration says 300, the stream says 299: trust the stream
        let backend = ScriptedBackend::standard(300).with_frame_count_metadata(299);
        assert_eq!(make(backend, 10).total_frames(), 299);
    }

    #[test]
    fn test_total_frames_prefers_container_duration_when_far_off() {
        let backend = ScriptedBackend::standard(300).with_frame_count_metadata(100);
        assert_eq!(make(backend, 10).total_frames(), 300);
    }

    #[test]
    fn test_total_frames_from_stream_duration() {
        let backend = ScriptedBackend::standard(300)
            .without_frame_metadata()
            .with_stream_duration(900_000);
        assert_eq!(make(backend, 10).total_frames(), 300);
    }

    #[test]
    fn test_total_frames_probed_matches_exhaustive_read() {
        let stream = make(ScriptedBackend::standard(300).without_frame_metadata(), 10);
        assert_eq!(stream.total_frames(), 300);
        assert_eq!(read_all_indices(&stream).len() as i64, stream.total_frames());
    }

    #[test]
    fn test_duration_probed_from_packets() {
        let stream = make(ScriptedBackend::standard(300).without_frame_metadata(), 10);
        assert_eq!(stream.duration(), 10_000_000);
    }

    #[test]
    fn test_duration_from_container_metadata() {
        let stream = make(ScriptedBackend::standard(300), 10);
        assert_eq!(stream.duration(), 10_000_000);
        assert_eq!(stream.frame_duration(), 33_333);
        assert_eq!(stream.frame_rate().as_f64(), 30.0);
    }

    #[test]
    fn test_geometry_accessors() {
        let stream = make(ScriptedBackend::standard(30), 10);
        assert_eq!(stream.width(), 1920);
        assert_eq!(stream.height(), 1080);
        assert!((stream.aspect_ratio() - 16.0 / 9.0).abs() < 1e-9);
    }

    #[test]
    fn test_sequence_from_origin() {
        let stream = make(ScriptedBackend::standard(90), 10);
        let frames = stream.get_next_frame_sequence(&[0, 30, 60]).unwrap();
        let indices: Vec<i64> = frames.iter().map(|f| f.frame_index()).collect();
        assert_eq!(indices, vec![0, 30, 60]);
    }

    #[test]
    fn test_sequence_is_relative_to_cursor() {
        let stream = make(ScriptedBackend::standard(90), 10);
        stream.get_next_frame().unwrap();
        stream.get_next_frame().unwrap();
        let frames = stream.get_next_frame_sequence(&[0, 1, 5]).unwrap();
        let indices: Vec<i64> = frames.iter().map(|f| f.frame_index()).collect();
        assert_eq!(indices, vec![2, 3, 7]);
    }

    #[test]
    fn test_sequence_rejects_invalid_offsets() {
        let stream = make(ScriptedBackend::standard(90), 10);
        let result = stream.get_next_frame_sequence(&[10, 5]);
        assert!(matches!(result, Err(ReelError::InvalidArgument(_))));
        let result = stream.get_next_frame_sequence(&[-1, 5]);
        assert!(matches!(result, Err(ReelError::InvalidArgument(_))));
        // a repeated offset cannot be satisfied and must not return the
        // following frame in its place
        let result = stream.get_next_frame_sequence(&[5, 5]);
        assert!(matches!(result, Err(ReelError::InvalidArgument(_))));
        // nothing was consumed by the rejected calls
        assert_eq!(stream.get_next_frame().unwrap().unwrap().frame_index(), 0);
    }

    #[test]
    fn test_sequence_past_end_is_an_error() {
        let stream = make(ScriptedBackend::standard(20), 10);
        let result = stream.get_next_frame_sequence(&[0, 50]);
        assert_eq!(result.unwrap_err(), ReelError::EndOfStream);
    }

    #[test]
    fn test_frames_and_streams_are_shareable_across_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Arc<Frame<crate::testing::FakePicture>>>();
        assert_send_sync::<Stream<ScriptedBackend>>();
    }

    #[test]
    fn test_frames_in_active_buffer_are_ordered() {
        let backend = ScriptedBackend::standard(60)
            .with_delay(3)
            .with_bframe_cadence();
        let stream = make(backend, 10);
        let mut last = -1;
        while let Some(frame) = stream.get_next_frame().unwrap() {
            assert!(frame.frame_index() > last);
            last = frame.frame_index();
        }
        assert_eq!(last, 59);
    }
}
