//! Continuous waveform output on a local sound device.
//!
//! The stream callback runs on the host's audio thread and reads the latest
//! [`SignalParameters`] from a [`SharedSignal`]. Each tick only swaps those
//! parameters; the generator keeps its phase across changes.

mod generator;

use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SampleRate, StreamConfig, SupportedStreamConfig};
use tracing::{debug, info, warn};

use super::OutputBackend;
use crate::cancel::CancelToken;
use crate::config::AudioConfig;
use crate::encode::{Frame, ProtocolEncoder, SignalEncoder, SignalParameters};
use crate::error::{Error, Result};

use generator::{f32_to_i16, f32_to_u16};
pub use generator::{SharedSignal, SignalGenerator, balance_gains, sample};

/// Names of the output devices the default host exposes.
pub fn list_audio_devices() -> Result<Vec<String>> {
    let host = cpal::default_host();
    let devices = host
        .output_devices()
        .map_err(|e| Error::Audio(e.to_string()))?;
    Ok(devices.filter_map(|d| d.name().ok()).collect())
}

fn open_device(name: Option<&str>) -> Result<cpal::Device> {
    let host = cpal::default_host();
    match name {
        None => host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no default output device".into())),
        Some(wanted) => {
            let mut devices = host
                .output_devices()
                .map_err(|e| Error::Audio(e.to_string()))?;
            devices
                .find(|d| d.name().is_ok_and(|n| n == wanted))
                .ok_or_else(|| Error::Audio(format!("output device \"{}\" not found", wanted)))
        }
    }
}

/// Prefer an f32 config at the requested rate, else the device default.
fn pick_config(device: &cpal::Device, sample_rate: u32) -> Result<SupportedStreamConfig> {
    if let Ok(ranges) = device.supported_output_configs() {
        let mut fallback = None;
        for range in ranges.filter(|r| {
            r.min_sample_rate().0 <= sample_rate && sample_rate <= r.max_sample_rate().0
        }) {
            if range.sample_format() == SampleFormat::F32 {
                return Ok(range.with_sample_rate(SampleRate(sample_rate)));
            }
            fallback.get_or_insert(range);
        }
        if let Some(range) = fallback {
            return Ok(range.with_sample_rate(SampleRate(sample_rate)));
        }
    }

    device
        .default_output_config()
        .map_err(|e| Error::Audio(e.to_string()))
}

pub struct AudioBackend {
    config: AudioConfig,
    encoder: SignalEncoder,
    label: String,
    signal: SharedSignal,
    previous: SignalParameters,
    stream_error: Arc<Mutex<Option<String>>>,
    stream: Option<cpal::Stream>,
}

impl AudioBackend {
    pub fn new(config: AudioConfig) -> Self {
        let encoder = config.signal.clone();
        let initial = encoder.initial();
        let label = match &config.device {
            Some(name) => format!("audio {}", name),
            None => "audio default".to_string(),
        };
        Self {
            config,
            encoder,
            label,
            signal: SharedSignal::new(initial),
            previous: initial,
            stream_error: Arc::new(Mutex::new(None)),
            stream: None,
        }
    }

    /// Parameters currently read by the stream callback.
    pub fn parameters(&self) -> SignalParameters {
        self.signal.load()
    }

    fn build_stream(&self, device: &cpal::Device) -> Result<cpal::Stream> {
        let supported = pick_config(device, self.config.sample_rate)?;
        let format = supported.sample_format();
        let stream_config: StreamConfig = supported.into();
        let channels = stream_config.channels as usize;
        let rate = stream_config.sample_rate.0;
        info!(
            "Opening audio stream: {} channel(s) at {} Hz ({:?})",
            channels, rate, format
        );

        let errors = Arc::clone(&self.stream_error);
        let on_error = move |e: cpal::StreamError| {
            warn!("Audio stream error: {}", e);
            if let Ok(mut slot) = errors.lock() {
                slot.get_or_insert_with(|| e.to_string());
            }
        };

        let mut generator = SignalGenerator::new(self.signal.clone(), rate);
        let stream = match format {
            SampleFormat::F32 => device.build_output_stream(
                &stream_config,
                move |out: &mut [f32], _| generator.fill(out, channels, |v| v),
                on_error,
                None,
            ),
            SampleFormat::I16 => device.build_output_stream(
                &stream_config,
                move |out: &mut [i16], _| generator.fill(out, channels, f32_to_i16),
                on_error,
                None,
            ),
            SampleFormat::U16 => device.build_output_stream(
                &stream_config,
                move |out: &mut [u16], _| generator.fill(out, channels, f32_to_u16),
                on_error,
                None,
            ),
            other => {
                return Err(Error::Audio(format!("unsupported sample format {:?}", other)));
            }
        };
        stream.map_err(|e| Error::Audio(e.to_string()))
    }
}

impl OutputBackend for AudioBackend {
    type Payload = SignalParameters;

    fn name(&self) -> &str {
        &self.label
    }

    fn connect(&mut self, cancel: &CancelToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let device = open_device(self.config.device.as_deref())?;
        if let Ok(name) = device.name() {
            info!("Using audio device \"{}\"", name);
        }

        self.previous = self.encoder.initial();
        self.signal.store(&self.previous);
        if let Ok(mut slot) = self.stream_error.lock() {
            *slot = None;
        }

        let stream = self.build_stream(&device)?;
        stream.play().map_err(|e| Error::Audio(e.to_string()))?;
        self.stream = Some(stream);
        Ok(())
    }

    fn disconnect(&mut self) {
        if self.stream.take().is_some() {
            debug!("Closed audio stream");
        }
        self.previous = self.encoder.initial();
        self.signal.store(&self.previous);
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Surface errors reported by the stream callback.
    fn poll(&mut self) -> Result<()> {
        let failure = self
            .stream_error
            .lock()
            .map_err(|_| Error::Audio("stream error slot poisoned".into()))?
            .take();
        match failure {
            Some(message) => Err(Error::Transport(message)),
            None => Ok(()),
        }
    }

    fn send_dirty_only(&self) -> bool {
        false
    }

    fn encode(&self, frame: &Frame<'_>) -> Option<SignalParameters> {
        let params = self.encoder.encode(frame, &self.previous);
        (params != self.previous).then_some(params)
    }

    fn send(&mut self, payload: SignalParameters, _cancel: &CancelToken) -> Result<()> {
        if self.stream.is_none() {
            return Err(Error::Transport("audio stream is not open".into()));
        }
        self.signal.store(&payload);
        self.previous = payload;
        Ok(())
    }
}
