//! Codec backend seam.
//!
//! The decode pipeline consumes a deliberately narrow interface over the
//! demuxer/decoder pair: read a packet, submit it, receive a picture, flush,
//! seek. [`FfmpegBackend`] is the production implementation; the traits keep
//! the pump and seek engine independent of FFmpeg so they can be driven by a
//! scripted backend in tests.
//!
//! All unsafe FFmpeg code is isolated in this module.

use std::path::Path;
use std::sync::OnceLock;

use ffmpeg_next as ffmpeg;

use ffmpeg::ffi::{
    av_frame_copy_props, av_hwdevice_ctx_create, av_hwframe_transfer_data, av_seek_frame,
    avformat_seek_file, AVHWDeviceType, AVSEEK_FLAG_BACKWARD, AVSEEK_FLAG_FRAME,
    AV_CODEC_CAP_DELAY, AV_NOPTS_VALUE,
};
use ffmpeg::media::Type;
use ffmpeg::util::frame::video::Video as RawFrame;
use framereel_core::{DecodeType, FrameRate, PixelFormat, Rational, ReelError, Result, TimeBase};
use tracing::debug;

use crate::options::DecoderOptions;

/// Everything the pipeline needs to know about the selected stream before the
/// first packet is read. Captured once at open.
#[derive(Debug, Clone)]
pub struct StreamDescriptor {
    pub time_base: TimeBase,
    pub frame_rate: FrameRate,
    pub width: u32,
    pub height: u32,
    /// Sample aspect ratio, when the container declares a meaningful one.
    pub sample_aspect: Option<Rational>,
    /// Container-reported stream start timestamp, in native ticks.
    pub start_time: Option<i64>,
    /// First decode timestamp, when the demuxer exposes it.
    pub first_dts: Option<i64>,
    /// `nb_frames`; 0 when the container does not record it.
    pub frame_count: i64,
    /// Stream duration in native ticks; 0 when unknown.
    pub stream_duration: i64,
    /// Container duration in microseconds; 0 when unknown.
    pub container_duration: i64,
    /// Packets that must be submitted before the first picture emerges.
    pub codec_delay: i64,
}

/// Result of a decoder drain step.
pub enum Received<P> {
    /// A decoded picture.
    Frame(P),
    /// The decoder wants more input.
    Again,
    /// The decoder is fully drained.
    Eof,
}

/// How a backend seek target is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekMode {
    /// Native timestamp, backward-biased keyframe search.
    Time,
    /// Native timestamp, strictly backward (`AVSEEK_FLAG_BACKWARD`).
    Backward,
    /// Frame index (`AVSEEK_FLAG_FRAME`); not every container supports it.
    FrameIndex,
}

/// An encoded packet as read from the demuxer.
pub trait EncodedPacket {
    /// Whether the packet belongs to the selected video stream.
    fn is_selected_stream(&self) -> bool;
    fn pts(&self) -> Option<i64>;
    fn dts(&self) -> Option<i64>;
}

/// A decoded picture handle. Immutable after emission; the frame value object
/// owns it exclusively and dropping it releases the decoder's reference.
pub trait DecodedPicture: Send + Sync {
    /// Presentation timestamp with decode-timestamp fallback, native ticks.
    fn best_effort_timestamp(&self) -> Option<i64>;
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    fn pixel_format(&self) -> PixelFormat;
    fn plane_count(&self) -> usize;
    /// Plane data and stride. `None` for planes that live in device memory.
    fn plane(&self, index: usize) -> Option<(&[u8], usize)>;
    fn decode_type(&self) -> DecodeType;
}

/// The narrow demuxer/decoder interface the pipeline is written against.
pub trait VideoBackend: Send {
    type Packet: EncodedPacket;
    type Picture: DecodedPicture;

    fn descriptor(&self) -> &StreamDescriptor;

    /// Read the next encoded packet. `Ok(None)` at demuxer end of file.
    fn read_packet(&mut self) -> Result<Option<Self::Packet>>;

    /// Submit a packet to the decoder.
    fn send_packet(&mut self, packet: &Self::Packet) -> Result<()>;

    /// Signal end of input so the decoder drains its reorder queue.
    fn send_eof(&mut self) -> Result<()>;

    /// Drain one picture from the decoder.
    fn receive_frame(&mut self) -> Result<Received<Self::Picture>>;

    /// Discard decoder state ahead of a reposition.
    fn flush(&mut self);

    /// Reposition the demuxer. The target is interpreted per `mode`.
    fn seek(&mut self, target: i64, mode: SeekMode) -> Result<()>;
}

// ── FFmpeg implementation ───────────────────────────────────────

static FFMPEG_INIT: OnceLock<std::result::Result<(), String>> = OnceLock::new();

/// Initialize libav once per process.
pub(crate) fn init_ffmpeg() -> Result<()> {
    FFMPEG_INIT
        .get_or_init(|| ffmpeg::init().map_err(|e| e.to_string()))
        .clone()
        .map_err(ReelError::Backend)
}

/// Demuxer plus opened video decoder for one file.
pub struct FfmpegBackend {
    input: ffmpeg::format::context::Input,
    decoder: ffmpeg::decoder::Video,
    stream_index: usize,
    descriptor: StreamDescriptor,
    output_host: bool,
}

// The contexts are only ever driven from behind the stream's mutex.
unsafe impl Send for FfmpegBackend {}

impl FfmpegBackend {
    /// Open `path` and prepare a decoder for its best video stream.
    pub fn open(path: &Path, options: &DecoderOptions) -> Result<Self> {
        init_ffmpeg()?;

        let input = ffmpeg::format::input(path)
            .map_err(|e| ReelError::Backend(format!("failed to open {}: {e}", path.display())))?;
        let stream = input
            .streams()
            .best(Type::Video)
            .ok_or_else(|| ReelError::Backend(format!("no video stream in {}", path.display())))?;
        let stream_index = stream.index();

        let time_base = rational_from(stream.time_base());
        let frame_rate = stream.rate();
        let frame_rate = if frame_rate.numerator() > 0 && frame_rate.denominator() > 0 {
            FrameRate::new(frame_rate.numerator() as i64, frame_rate.denominator() as i64)
        } else {
            debug!("stream reports no frame rate, assuming 25 fps");
            FrameRate::new(25, 1)
        };

        let start_time = valid_timestamp(stream.start_time());
        let frame_count = stream.frames().max(0);
        let stream_duration = valid_timestamp(stream.duration()).unwrap_or(0).max(0);
        let container_duration = valid_timestamp(input.duration()).unwrap_or(0).max(0);

        let mut context =
            ffmpeg::codec::context::Context::from_parameters(stream.parameters())
                .map_err(ReelError::backend)?;

        if options.decode_type == DecodeType::Cuda {
            attach_cuda_device(&mut context)?;
        }

        let decoder = context
            .decoder()
            .video()
            .map_err(|e| ReelError::Backend(format!("failed to open decoder: {e}")))?;

        let sample_aspect = {
            let sar = decoder.aspect_ratio();
            (sar.numerator() > 0 && sar.denominator() > 0)
                .then(|| Rational::new(sar.numerator() as i64, sar.denominator() as i64))
        };

        let codec_delay = unsafe {
            let ctx = decoder.as_ptr();
            let caps = (*(*ctx).codec).capabilities;
            let delay = if caps & AV_CODEC_CAP_DELAY as i32 != 0 {
                (*ctx).delay
            } else {
                0
            };
            i64::from((delay + (*ctx).has_b_frames).max(1))
        };

        let descriptor = StreamDescriptor {
            time_base: TimeBase::new(time_base.0, time_base.1),
            frame_rate,
            width: decoder.width(),
            height: decoder.height(),
            sample_aspect,
            start_time,
            // Not exposed by modern libavformat; the start probe falls back
            // to the origin.
            first_dts: None,
            frame_count,
            stream_duration,
            container_duration,
            codec_delay,
        };

        Ok(Self {
            input,
            decoder,
            stream_index,
            descriptor,
            output_host: options.output_host,
        })
    }
}

impl VideoBackend for FfmpegBackend {
    type Packet = FfmpegPacket;
    type Picture = FfmpegPicture;

    fn descriptor(&self) -> &StreamDescriptor {
        &self.descriptor
    }

    fn read_packet(&mut self) -> Result<Option<FfmpegPacket>> {
        let mut packet = ffmpeg::Packet::empty();
        match packet.read(&mut self.input) {
            Ok(()) => {
                let selected = packet.stream() == self.stream_index;
                Ok(Some(FfmpegPacket { packet, selected }))
            }
            Err(ffmpeg::Error::Eof) => Ok(None),
            Err(e) => Err(ReelError::Backend(format!("failed to read packet: {e}"))),
        }
    }

    fn send_packet(&mut self, packet: &FfmpegPacket) -> Result<()> {
        self.decoder
            .send_packet(&packet.packet)
            .map_err(|e| ReelError::Backend(format!("failed to send packet to decoder: {e}")))
    }

    fn send_eof(&mut self) -> Result<()> {
        match self.decoder.send_eof() {
            Ok(()) | Err(ffmpeg::Error::Eof) => Ok(()),
            Err(e) => Err(ReelError::Backend(format!("failed to flush decoder: {e}"))),
        }
    }

    fn receive_frame(&mut self) -> Result<Received<FfmpegPicture>> {
        let mut decoded = RawFrame::empty();
        match self.decoder.receive_frame(&mut decoded) {
            Ok(()) => Ok(Received::Frame(FfmpegPicture::wrap(
                decoded,
                self.output_host,
            )?)),
            Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => {
                Ok(Received::Again)
            }
            Err(ffmpeg::Error::Eof) => Ok(Received::Eof),
            Err(e) => Err(ReelError::Backend(format!(
                "failed to receive decoded frame: {e}"
            ))),
        }
    }

    fn flush(&mut self) {
        self.decoder.flush();
    }

    fn seek(&mut self, target: i64, mode: SeekMode) -> Result<()> {
        let index = self.stream_index as i32;
        let ret = unsafe {
            match mode {
                SeekMode::Time => avformat_seek_file(
                    self.input.as_mut_ptr(),
                    index,
                    i64::MIN,
                    target,
                    target,
                    0,
                ),
                SeekMode::Backward => {
                    av_seek_frame(self.input.as_mut_ptr(), index, target, AVSEEK_FLAG_BACKWARD as i32)
                }
                SeekMode::FrameIndex => avformat_seek_file(
                    self.input.as_mut_ptr(),
                    index,
                    i64::MIN,
                    target,
                    target,
                    AVSEEK_FLAG_FRAME as i32,
                ),
            }
        };
        if ret < 0 {
            return Err(ReelError::Backend(format!(
                "seek to {target} failed: {}",
                ffmpeg::Error::from(ret)
            )));
        }
        Ok(())
    }
}

/// One encoded packet plus whether it belongs to the selected stream.
pub struct FfmpegPacket {
    packet: ffmpeg::Packet,
    selected: bool,
}

impl EncodedPacket for FfmpegPacket {
    fn is_selected_stream(&self) -> bool {
        self.selected
    }

    fn pts(&self) -> Option<i64> {
        self.packet.pts()
    }

    fn dts(&self) -> Option<i64> {
        self.packet.dts()
    }
}

/// An owned decoded picture.
pub struct FfmpegPicture {
    frame: RawFrame,
    decode_type: DecodeType,
}

// Pictures are immutable after emission.
unsafe impl Send for FfmpegPicture {}
unsafe impl Sync for FfmpegPicture {}

impl FfmpegPicture {
    fn wrap(decoded: RawFrame, output_host: bool) -> Result<Self> {
        let is_hw = unsafe { !(*decoded.as_ptr()).hw_frames_ctx.is_null() };
        if is_hw && output_host {
            let mut host = RawFrame::empty();
            unsafe {
                let ret = av_hwframe_transfer_data(host.as_mut_ptr(), decoded.as_ptr(), 0);
                if ret < 0 {
                    return Err(ReelError::Backend(format!(
                        "failed to copy frame to host memory: {}",
                        ffmpeg::Error::from(ret)
                    )));
                }
                av_frame_copy_props(host.as_mut_ptr(), decoded.as_ptr());
            }
            return Ok(Self {
                frame: host,
                decode_type: DecodeType::Software,
            });
        }
        let decode_type = if is_hw {
            DecodeType::Cuda
        } else {
            DecodeType::Software
        };
        Ok(Self {
            frame: decoded,
            decode_type,
        })
    }
}

impl DecodedPicture for FfmpegPicture {
    fn best_effort_timestamp(&self) -> Option<i64> {
        let ts = unsafe { (*self.frame.as_ptr()).best_effort_timestamp };
        (ts != AV_NOPTS_VALUE).then_some(ts)
    }

    fn width(&self) -> u32 {
        self.frame.width()
    }

    fn height(&self) -> u32 {
        self.frame.height()
    }

    fn pixel_format(&self) -> PixelFormat {
        match self.frame.format() {
            ffmpeg::format::Pixel::YUV420P => PixelFormat::Yuv420P,
            ffmpeg::format::Pixel::YUV420P10LE | ffmpeg::format::Pixel::YUV420P10BE => {
                PixelFormat::Yuv420P10
            }
            ffmpeg::format::Pixel::YUV422P => PixelFormat::Yuv422P,
            ffmpeg::format::Pixel::YUV444P => PixelFormat::Yuv444P,
            ffmpeg::format::Pixel::NV12 => PixelFormat::Nv12,
            ffmpeg::format::Pixel::GRAY8 => PixelFormat::Gray8,
            ffmpeg::format::Pixel::RGB24 => PixelFormat::Rgb24,
            _ => PixelFormat::Unknown,
        }
    }

    fn plane_count(&self) -> usize {
        if self.decode_type == DecodeType::Cuda {
            0
        } else {
            self.frame.planes()
        }
    }

    fn plane(&self, index: usize) -> Option<(&[u8], usize)> {
        if index >= self.plane_count() {
            return None;
        }
        Some((self.frame.data(index), self.frame.stride(index)))
    }

    fn decode_type(&self) -> DecodeType {
        self.decode_type
    }
}

fn rational_from(r: ffmpeg::Rational) -> (i64, i64) {
    (i64::from(r.numerator()), i64::from(r.denominator()))
}

fn valid_timestamp(ts: i64) -> Option<i64> {
    (ts != AV_NOPTS_VALUE).then_some(ts)
}

fn attach_cuda_device(context: &mut ffmpeg::codec::context::Context) -> Result<()> {
    unsafe {
        let mut device = std::ptr::null_mut();
        let ret = av_hwdevice_ctx_create(
            &mut device,
            AVHWDeviceType::AV_HWDEVICE_TYPE_CUDA,
            std::ptr::null(),
            std::ptr::null_mut(),
            0,
        );
        if ret < 0 {
            return Err(ReelError::Backend(format!(
                "failed to create CUDA device context: {}",
                ffmpeg::Error::from(ret)
            )));
        }
        // The context takes ownership of the device reference.
        (*context.as_mut_ptr()).hw_device_ctx = device;
    }
    Ok(())
}
