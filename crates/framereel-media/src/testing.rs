//! Scripted in-memory backend for tests and benchmarks.
//!
//! Models a demuxer/decoder pair precisely enough to exercise the pump and
//! seek engine without media fixtures: packets in decode order, a reorder
//! queue of configurable depth (frames emerge in presentation order once the
//! queue exceeds the delay), keyframe-aligned seeks, and container metadata
//! that can be selectively withheld.

use framereel_core::{
    rescale, DecodeType, FrameRate, PixelFormat, Rational, ReelError, Result, TimeBase,
};

use crate::backend::{
    DecodedPicture, EncodedPacket, Received, SeekMode, StreamDescriptor, VideoBackend,
};

pub struct FakePacket {
    pts: Option<i64>,
    dts: Option<i64>,
    selected: bool,
}

impl EncodedPacket for FakePacket {
    fn is_selected_stream(&self) -> bool {
        self.selected
    }

    fn pts(&self) -> Option<i64> {
        self.pts
    }

    fn dts(&self) -> Option<i64> {
        self.dts
    }
}

pub struct FakePicture {
    pts: i64,
    width: u32,
    height: u32,
}

impl FakePicture {
    pub fn at(pts: i64) -> Self {
        Self {
            pts,
            width: 1920,
            height: 1080,
        }
    }
}

impl DecodedPicture for FakePicture {
    fn best_effort_timestamp(&self) -> Option<i64> {
        Some(self.pts)
    }

    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn pixel_format(&self) -> PixelFormat {
        PixelFormat::Yuv420P
    }

    fn plane_count(&self) -> usize {
        0
    }

    fn plane(&self, _index: usize) -> Option<(&[u8], usize)> {
        None
    }

    fn decode_type(&self) -> DecodeType {
        DecodeType::Software
    }
}

pub struct ScriptedBackend {
    descriptor: StreamDescriptor,
    /// Presentation timestamps in decode order.
    packet_pts: Vec<i64>,
    keyframe_interval: usize,
    /// Next packet to hand out.
    cursor: usize,
    /// Decoder reorder queue.
    pending: Vec<i64>,
    delay: usize,
    eof_sent: bool,
    /// Emit a packet for a foreign stream every n-th read.
    other_stream_every: Option<usize>,
    reads: usize,
    fail_frame_seek: bool,
    /// Every `seek` call observed, in order.
    pub seeks: Vec<(i64, SeekMode)>,
    pub flushes: usize,
}

impl ScriptedBackend {
    /// 30 fps in 1/90000 ticks starting at tick `start`, `frame_count`
    /// frames, container metadata fully populated.
    pub fn new(frame_count: i64, start: i64) -> Self {
        let time_base = TimeBase::new(1, 90_000);
        let frame_rate = FrameRate::new(30, 1);
        let ticks_per_frame = rescale(1, frame_rate.period().ratio(), time_base.ratio());
        let packet_pts = (0..frame_count)
            .map(|i| start + i * ticks_per_frame)
            .collect();
        let container_duration = rescale(frame_count, Rational::new(1_000_000, 1), frame_rate.ratio());
        Self {
            descriptor: StreamDescriptor {
                time_base,
                frame_rate,
                width: 1920,
                height: 1080,
                sample_aspect: None,
                start_time: Some(start),
                first_dts: None,
                frame_count,
                stream_duration: 0,
                container_duration,
                codec_delay: 1,
            },
            packet_pts,
            keyframe_interval: 10,
            cursor: 0,
            pending: Vec::new(),
            delay: 0,
            eof_sent: false,
            other_stream_every: None,
            reads: 0,
            fail_frame_seek: false,
            seeks: Vec::new(),
            flushes: 0,
        }
    }

    /// The common case: starts at tick zero.
    pub fn standard(frame_count: i64) -> Self {
        Self::new(frame_count, 0)
    }

    /// Simulate a decoder with `delay` frames of reordering latency.
    pub fn with_delay(mut self, delay: usize) -> Self {
        self.delay = delay;
        self.descriptor.codec_delay = delay.max(1) as i64;
        self
    }

    /// Reorder packet timestamps pairwise past the first frame, the way a
    /// P/B cadence arrives in decode order. Requires a delay of at least 1.
    pub fn with_bframe_cadence(mut self) -> Self {
        for pair in self.packet_pts[1..].chunks_exact_mut(2) {
            pair.swap(0, 1);
        }
        self
    }

    /// Withhold the container's start time so introspection has to probe.
    pub fn with_unknown_start(mut self) -> Self {
        self.descriptor.start_time = None;
        self
    }

    /// Withhold frame count and durations so introspection has to scan.
    pub fn without_frame_metadata(mut self) -> Self {
        self.descriptor.frame_count = 0;
        self.descriptor.stream_duration = 0;
        self.descriptor.container_duration = 0;
        self
    }

    pub fn with_frame_count_metadata(mut self, frame_count: i64) -> Self {
        self.descriptor.frame_count = frame_count;
        self
    }

    pub fn with_container_duration(mut self, micros: i64) -> Self {
        self.descriptor.container_duration = micros;
        self
    }

    pub fn with_stream_duration(mut self, ticks: i64) -> Self {
        self.descriptor.stream_duration = ticks;
        self
    }

    pub fn with_other_stream_packets(mut self, every: usize) -> Self {
        self.other_stream_every = Some(every);
        self
    }

    pub fn with_failing_frame_seek(mut self) -> Self {
        self.fail_frame_seek = true;
        self
    }

    pub fn frame_seek_attempts(&self) -> usize {
        self.seeks
            .iter()
            .filter(|(_, mode)| *mode == SeekMode::FrameIndex)
            .count()
    }

    fn is_keyframe(&self, index: usize) -> bool {
        index % self.keyframe_interval == 0
    }

    fn keyframe_at_or_before_pts(&self, target: i64) -> usize {
        self.packet_pts
            .iter()
            .enumerate()
            .filter(|(i, pts)| self.is_keyframe(*i) && **pts <= target)
            .map(|(i, _)| i)
            .max()
            .unwrap_or(0)
    }

    fn keyframe_at_or_before_index(&self, target: i64) -> usize {
        if self.packet_pts.is_empty() {
            return 0;
        }
        let clamped = (target.max(0) as usize).min(self.packet_pts.len() - 1);
        clamped / self.keyframe_interval * self.keyframe_interval
    }
}

impl VideoBackend for ScriptedBackend {
    type Packet = FakePacket;
    type Picture = FakePicture;

    fn descriptor(&self) -> &StreamDescriptor {
        &self.descriptor
    }

    fn read_packet(&mut self) -> Result<Option<FakePacket>> {
        self.reads += 1;
        if let Some(every) = self.other_stream_every {
            if self.reads % every == 0 {
                return Ok(Some(FakePacket {
                    pts: None,
                    dts: None,
                    selected: false,
                }));
            }
        }
        if self.cursor >= self.packet_pts.len() {
            return Ok(None);
        }
        let pts = self.packet_pts[self.cursor];
        self.cursor += 1;
        Ok(Some(FakePacket {
            pts: Some(pts),
            dts: Some(pts),
            selected: true,
        }))
    }

    fn send_packet(&mut self, packet: &FakePacket) -> Result<()> {
        if let Some(pts) = packet.pts {
            self.pending.push(pts);
        }
        Ok(())
    }

    fn send_eof(&mut self) -> Result<()> {
        self.eof_sent = true;
        Ok(())
    }

    fn receive_frame(&mut self) -> Result<Received<FakePicture>> {
        let ready = if self.eof_sent {
            !self.pending.is_empty()
        } else {
            self.pending.len() > self.delay
        };
        if !ready {
            return Ok(if self.eof_sent {
                Received::Eof
            } else {
                Received::Again
            });
        }
        // Presentation order is restored as frames leave the queue.
        let earliest = self
            .pending
            .iter()
            .enumerate()
            .min_by_key(|(_, pts)| **pts)
            .map(|(i, _)| i)
            .unwrap_or(0);
        let pts = self.pending.remove(earliest);
        Ok(Received::Frame(FakePicture::at(pts)))
    }

    fn flush(&mut self) {
        self.pending.clear();
        self.eof_sent = false;
        self.flushes += 1;
    }

    fn seek(&mut self, target: i64, mode: SeekMode) -> Result<()> {
        self.seeks.push((target, mode));
        match mode {
            SeekMode::Time | SeekMode::Backward => {
                self.cursor = self.keyframe_at_or_before_pts(target);
            }
            SeekMode::FrameIndex => {
                if self.fail_frame_seek {
                    return Err(ReelError::Backend("frame seek unsupported".into()));
                }
                self.cursor = self.keyframe_at_or_before_index(target);
            }
        }
        Ok(())
    }
}
