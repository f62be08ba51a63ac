//! Audio probing and PCM decoding using symphonia
//!
//! The resource codec only sniffs container headers. Devices that need more
//! (the clock device needs the clip duration, real output needs samples) use
//! this module on the bytes of an attached [`ResourceRef`].
//!
//! # Sample Format
//!
//! `decode_pcm` produces stereo f32 samples (interleaved: [L, R, L, R, ...]):
//! - Mono clips: duplicated to stereo
//! - Multi-channel: first two channels kept

use super::codec::AudioMime;
use crate::error::{Error, Result};
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, warn};

/// Basic properties of a decoded clip
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipInfo {
    /// Native sample rate in Hz
    pub sample_rate: u32,
    /// Channel count
    pub channels: usize,
    /// Number of frames (samples per channel)
    pub frames: u64,
}

impl ClipInfo {
    /// Playback duration at the native sample rate
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frames as f64 / self.sample_rate as f64)
    }
}

/// Decoded PCM, stereo interleaved
#[derive(Debug, Clone)]
pub struct PcmClip {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl PcmClip {
    /// Number of stereo frames
    pub fn frames(&self) -> usize {
        self.samples.len() / 2
    }
}

/// Open a format reader over in-memory bytes
fn open(bytes: Arc<[u8]>, mime: AudioMime) -> Result<(Box<dyn FormatReader>, u32)> {
    let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());

    let mut hint = Hint::new();
    hint.mime_type(mime.as_str());
    hint.with_extension(mime.extension());

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| Error::Probe(format!("Failed to probe {} stream: {}", mime, e)))?;

    let format = probed.format;
    let track_id = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .map(|t| t.id)
        .ok_or_else(|| Error::Probe("No audio track found".to_string()))?;

    Ok((format, track_id))
}

fn is_end_of_stream(err: &SymphoniaError) -> bool {
    matches!(err, SymphoniaError::IoError(e) if e.kind() == std::io::ErrorKind::UnexpectedEof)
}

/// Read sample rate, channel count and exact length of a clip
///
/// When the container does not declare a frame count (common for MP3
/// without a Xing/Info header) the packets are walked and their durations
/// summed.
pub fn probe(bytes: Arc<[u8]>, mime: AudioMime) -> Result<ClipInfo> {
    let (mut format, track_id) = open(bytes, mime)?;

    let params = format
        .tracks()
        .iter()
        .find(|t| t.id == track_id)
        .map(|t| t.codec_params.clone())
        .ok_or_else(|| Error::Probe("Audio track disappeared".to_string()))?;

    let sample_rate = params
        .sample_rate
        .ok_or_else(|| Error::Probe("Stream does not declare a sample rate".to_string()))?;
    let channels = params.channels.map(|c| c.count()).unwrap_or(2);

    let frames = match params.n_frames {
        Some(n) => n,
        None => {
            let mut total = 0u64;
            loop {
                match format.next_packet() {
                    Ok(packet) if packet.track_id() == track_id => total += packet.dur,
                    Ok(_) => continue,
                    Err(ref e) if is_end_of_stream(e) => break,
                    Err(e) => return Err(Error::Probe(format!("Failed to read packet: {}", e))),
                }
            }
            total
        }
    };

    debug!(
        "Probed {} clip: {} Hz, {} channels, {} frames",
        mime, sample_rate, channels, frames
    );

    Ok(ClipInfo {
        sample_rate,
        channels,
        frames,
    })
}

/// Decode a whole clip to stereo interleaved f32 samples
pub fn decode_pcm(bytes: Arc<[u8]>, mime: AudioMime) -> Result<PcmClip> {
    let (mut format, track_id) = open(bytes, mime)?;

    let params = format
        .tracks()
        .iter()
        .find(|t| t.id == track_id)
        .map(|t| t.codec_params.clone())
        .ok_or_else(|| Error::Probe("Audio track disappeared".to_string()))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&params, &DecoderOptions::default())
        .map_err(|e| Error::Probe(format!("Failed to create decoder: {}", e)))?;

    let mut sample_rate = params.sample_rate.unwrap_or(44100);
    let mut samples = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(ref e) if is_end_of_stream(e) => break,
            Err(SymphoniaError::ResetRequired) => {
                decoder.reset();
                continue;
            }
            Err(e) => return Err(Error::Probe(format!("Failed to read packet: {}", e))),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                // Corrupt frame: skip it and keep going
                warn!("Skipping undecodable packet: {}", e);
                continue;
            }
            Err(e) => return Err(Error::Probe(format!("Decode failed: {}", e))),
        };

        let spec = *decoded.spec();
        sample_rate = spec.rate;
        let channels = spec.channels.count().max(1);

        let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        buffer.copy_interleaved_ref(decoded);

        for frame in buffer.samples().chunks(channels) {
            let left = frame[0];
            let right = if channels > 1 { frame[1] } else { left };
            samples.push(left);
            samples.push(right);
        }
    }

    Ok(PcmClip {
        samples,
        sample_rate,
    })
}
