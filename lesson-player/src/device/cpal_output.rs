//! Audio output using cpal
//!
//! Decodes the attached clip to PCM up front and feeds it to the output
//! stream from the audio callback. The stream keeps running while paused and
//! outputs silence, so resume is immediate.

use super::{EndOfStreamListener, ListenerSlot, PlaybackDevice};
use crate::audio::{probe, PcmClip, ResourceId, ResourceRef};
use crate::error::{Error, PlaybackRejected, Result};
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Read position into the current clip, shared with the audio callback
#[derive(Default)]
struct Playhead {
    clip: Option<Arc<PcmClip>>,
    resource: Option<ResourceId>,
    /// Position in source frames (fractional while resampling)
    position: f64,
    /// Source frames advanced per output frame
    step: f64,
    playing: bool,
    at_end: bool,
}

/// Playback device writing to a cpal output stream
pub struct CpalDevice {
    device: Device,
    config: StreamConfig,
    stream: Option<Stream>,
    source: Option<ResourceRef>,
    playhead: Arc<Mutex<Playhead>>,
    listener: ListenerSlot,
}

impl CpalDevice {
    /// Open an output device (None = default device)
    ///
    /// Falls back to the default device when the named one is missing.
    pub fn new(device_name: Option<&str>) -> Result<Self> {
        let host = cpal::default_host();

        let device = match device_name {
            Some(name) => {
                let mut devices = host
                    .output_devices()
                    .map_err(|e| Error::AudioOutput(format!("Failed to enumerate devices: {}", e)))?;
                match devices.find(|d| d.name().ok().as_deref() == Some(name)) {
                    Some(dev) => dev,
                    None => {
                        warn!("Requested device '{}' not found, falling back to default device", name);
                        host.default_output_device().ok_or_else(|| {
                            Error::AudioOutput(format!(
                                "Device '{}' not found and no default device available",
                                name
                            ))
                        })?
                    }
                }
            }
            None => host
                .default_output_device()
                .ok_or_else(|| Error::AudioOutput("No default output device found".to_string()))?,
        };

        info!(
            "Using audio device: {}",
            device.name().unwrap_or_else(|_| "Unknown".to_string())
        );

        let config = Self::f32_config(&device)?;
        debug!(
            "Audio config: sample_rate={}, channels={}",
            config.sample_rate.0, config.channels
        );

        Ok(Self {
            device,
            config,
            stream: None,
            source: None,
            playhead: Arc::new(Mutex::new(Playhead::default())),
            listener: ListenerSlot::new(),
        })
    }

    /// Pick an f32 output configuration, preferring 44.1kHz stereo
    fn f32_config(device: &Device) -> Result<StreamConfig> {
        let supported: Vec<_> = device
            .supported_output_configs()
            .map_err(|e| Error::AudioOutput(format!("Failed to get device configs: {}", e)))?
            .filter(|c| c.sample_format() == SampleFormat::F32)
            .collect();

        let preferred = supported.iter().find(|c| {
            c.channels() == 2 && c.min_sample_rate().0 <= 44100 && c.max_sample_rate().0 >= 44100
        });

        match preferred.or_else(|| supported.first()) {
            Some(c) if c.min_sample_rate().0 <= 44100 && c.max_sample_rate().0 >= 44100 => {
                Ok(c.clone().with_sample_rate(cpal::SampleRate(44100)).config())
            }
            Some(c) => Ok(c.clone().with_max_sample_rate().config()),
            None => Err(Error::AudioOutput(
                "Output device offers no f32 configuration".to_string(),
            )),
        }
    }

    fn ensure_stream(&mut self) -> std::result::Result<(), PlaybackRejected> {
        if self.stream.is_some() {
            return Ok(());
        }

        let channels = self.config.channels as usize;
        let playhead = Arc::clone(&self.playhead);
        let listener = self.listener.clone();

        let stream = self
            .device
            .build_output_stream(
                &self.config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let mut finished = None;
                    {
                        let mut head = playhead.lock();
                        for frame in data.chunks_mut(channels) {
                            let (left, right) = next_frame(&mut head, &mut finished);
                            frame[0] = left;
                            if channels > 1 {
                                frame[1] = right;
                            }
                            for sample in frame.iter_mut().skip(2) {
                                *sample = (left + right) * 0.5;
                            }
                        }
                    }
                    if let Some(resource) = finished {
                        listener.fire(resource);
                    }
                },
                move |err| {
                    error!("Audio stream error: {}", err);
                },
                None,
            )
            .map_err(|e| PlaybackRejected::Refused(format!("Failed to build stream: {}", e)))?;

        stream
            .play()
            .map_err(|e| PlaybackRejected::Refused(format!("Failed to start stream: {}", e)))?;

        self.stream = Some(stream);
        info!("Audio stream started");
        Ok(())
    }
}

/// Produce one output frame and advance the playhead
fn next_frame(head: &mut Playhead, finished: &mut Option<ResourceId>) -> (f32, f32) {
    if !head.playing {
        return (0.0, 0.0);
    }
    let Some(clip) = head.clip.as_ref() else {
        return (0.0, 0.0);
    };

    let index = head.position as usize;
    if index >= clip.frames() {
        head.playing = false;
        head.at_end = true;
        *finished = head.resource;
        return (0.0, 0.0);
    }

    let left = clip.samples[index * 2];
    let right = clip.samples[index * 2 + 1];
    head.position += head.step;
    (left, right)
}

#[async_trait(?Send)]
impl PlaybackDevice for CpalDevice {
    fn set_source(&mut self, source: ResourceRef) {
        let mut head = self.playhead.lock();
        *head = Playhead {
            resource: Some(source.id()),
            ..Playhead::default()
        };
        drop(head);
        self.source = Some(source);
    }

    fn clear_source(&mut self) {
        *self.playhead.lock() = Playhead::default();
        self.source = None;
    }

    fn source(&self) -> Option<ResourceId> {
        self.source.as_ref().map(ResourceRef::id)
    }

    fn load(&mut self) -> std::result::Result<(), PlaybackRejected> {
        let source = self.source.as_ref().ok_or(PlaybackRejected::NoSource)?;
        let bytes = source.bytes()?;
        let clip = probe::decode_pcm(bytes, source.mime())
            .map_err(|e| PlaybackRejected::Unplayable(source.id(), e.to_string()))?;

        let output_rate = self.config.sample_rate.0.max(1) as f64;
        let mut head = self.playhead.lock();
        head.step = clip.sample_rate as f64 / output_rate;
        head.clip = Some(Arc::new(clip));
        head.position = 0.0;
        head.playing = false;
        head.at_end = false;
        Ok(())
    }

    async fn play(&mut self) -> std::result::Result<(), PlaybackRejected> {
        let source = self.source.as_ref().ok_or(PlaybackRejected::NoSource)?;
        source.bytes()?;

        let loaded = self.playhead.lock().clip.is_some();
        if !loaded {
            self.load()?;
        }
        self.ensure_stream()?;

        let mut head = self.playhead.lock();
        if head.at_end {
            head.position = 0.0;
            head.at_end = false;
        }
        head.playing = true;
        Ok(())
    }

    fn pause(&mut self) {
        self.playhead.lock().playing = false;
    }

    fn is_at_end(&self) -> bool {
        self.playhead.lock().at_end
    }

    fn on_end_of_stream(&mut self, listener: EndOfStreamListener) {
        self.listener.set(listener);
    }

    fn clear_end_of_stream(&mut self) {
        self.listener.clear();
    }
}
