//! cpal-backed playback device.
//!
//! Opens one output stream per source at the source's negotiated
//! format. The stream callback pulls bytes from the source behind a
//! short-lived lock; control traffic (commands in, events out) goes
//! through the same shared handle from the owning thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use larkspur_core::{ElementEvent, SampleType};
use larkspur_graph::{Device, DeviceStream, PlayerError, Source, SourceCommand, StreamState};

/// The configuration of the cpal output device.
#[derive(Debug, Default, Clone)]
pub struct CpalDeviceConfig {
    /// The name of the output device to use. `None` picks the system
    /// default.
    pub device_name: Option<String>,
}

/// A [`Device`] implementation on top of the system's default cpal
/// host.
#[derive(Default)]
pub struct CpalDevice {
    config: CpalDeviceConfig,
}

impl CpalDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: CpalDeviceConfig) -> Self {
        Self { config }
    }

    fn find_device(&self, host: &cpal::Host) -> Option<cpal::Device> {
        if let Some(wanted) = &self.config.device_name {
            if let Ok(mut devices) = host.output_devices() {
                if let Some(device) =
                    devices.find(|device| device.name().map(|name| name == *wanted).unwrap_or(false))
                {
                    return Some(device);
                }
            }
            log::warn!("requested audio device not found, using default. [device={wanted}]");
        }
        host.default_output_device()
    }
}

struct StreamShared {
    source: Mutex<Box<dyn Source>>,
    complete: AtomicBool,
    failed: AtomicBool,
}

/// Sample formats the byte stream can be decoded into.
trait OutputSample: cpal::SizedSample + Send + 'static {
    const BYTES: usize;
    fn from_le(bytes: &[u8]) -> Self;
}

impl OutputSample for i16 {
    const BYTES: usize = 2;
    fn from_le(bytes: &[u8]) -> Self {
        Self::from_le_bytes([bytes[0], bytes[1]])
    }
}

impl OutputSample for i32 {
    const BYTES: usize = 4;
    fn from_le(bytes: &[u8]) -> Self {
        Self::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }
}

impl OutputSample for f32 {
    const BYTES: usize = 4;
    fn from_le(bytes: &[u8]) -> Self {
        Self::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }
}

fn build_stream<T: OutputSample>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    shared: Arc<StreamShared>,
) -> Result<cpal::Stream, PlayerError> {
    let data_shared = shared.clone();
    let mut scratch: Vec<u8> = Vec::new();
    let stream = device
        .build_output_stream(
            config,
            move |data: &mut [T], _info: &cpal::OutputCallbackInfo| {
                let bytes_needed = data.len() * T::BYTES;
                if scratch.len() < bytes_needed {
                    scratch.resize(bytes_needed, 0);
                }
                let mut filled = 0;
                {
                    let mut source = data_shared.source.lock().unwrap();
                    while filled < bytes_needed {
                        match source.fill_buffer(&mut scratch[filled..bytes_needed]) {
                            Ok(0) => {
                                data_shared.complete.store(true, Ordering::Relaxed);
                                break;
                            }
                            Ok(count) => filled += count,
                            Err(error) => {
                                log::error!("audio stream source failed. [error={error}]");
                                data_shared.failed.store(true, Ordering::Relaxed);
                                break;
                            }
                        }
                    }
                }
                scratch[filled..bytes_needed].fill(0);
                for (sample, chunk) in data
                    .iter_mut()
                    .zip(scratch[..bytes_needed].chunks_exact(T::BYTES))
                {
                    *sample = T::from_le(chunk);
                }
            },
            {
                let error_shared = shared;
                move |error| {
                    log::error!("audio stream error. [error={error}]");
                    error_shared.failed.store(true, Ordering::Relaxed);
                }
            },
            None,
        )
        .map_err(|e| PlayerError::Device(e.to_string()))?;
    Ok(stream)
}

impl Device for CpalDevice {
    fn open_stream(
        &mut self,
        source: Box<dyn Source>,
        _buffer_size_ms: u32,
    ) -> Result<Box<dyn DeviceStream>, PlayerError> {
        let format = source.format();
        if !format.is_valid() {
            return Err(PlayerError::Device(format!(
                "source '{}' has no valid format",
                source.name()
            )));
        }

        let host = cpal::default_host();
        let device = self
            .find_device(&host)
            .ok_or_else(|| PlayerError::Device("no audio output device".into()))?;
        log::debug!(
            "opening audio stream. [device={}, format={}]",
            device.name().unwrap_or_else(|_| "?".into()),
            format
        );

        let config = cpal::StreamConfig {
            channels: format.channel_count as u16,
            sample_rate: cpal::SampleRate(format.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };
        let shared = Arc::new(StreamShared {
            source: Mutex::new(source),
            complete: AtomicBool::new(false),
            failed: AtomicBool::new(false),
        });
        let stream = match format.sample_type {
            SampleType::Int16 => build_stream::<i16>(&device, &config, shared.clone())?,
            SampleType::Int32 => build_stream::<i32>(&device, &config, shared.clone())?,
            SampleType::Float32 => build_stream::<f32>(&device, &config, shared.clone())?,
            SampleType::NotSet => unreachable!("validated above"),
        };
        stream
            .play()
            .map_err(|e| PlayerError::Device(e.to_string()))?;

        Ok(Box::new(CpalStream {
            stream,
            shared,
            paused: false,
        }))
    }
}

struct CpalStream {
    stream: cpal::Stream,
    shared: Arc<StreamShared>,
    paused: bool,
}

impl DeviceStream for CpalStream {
    fn state(&self) -> StreamState {
        if self.shared.failed.load(Ordering::Relaxed) {
            StreamState::Error
        } else if self.shared.complete.load(Ordering::Relaxed) {
            StreamState::Complete
        } else if self.paused {
            StreamState::Paused
        } else {
            StreamState::Playing
        }
    }

    fn pause(&mut self) {
        if let Err(error) = self.stream.pause() {
            log::warn!("failed to pause audio stream. [error={error}]");
            return;
        }
        self.paused = true;
    }

    fn resume(&mut self) {
        if let Err(error) = self.stream.play() {
            log::warn!("failed to resume audio stream. [error={error}]");
            return;
        }
        self.paused = false;
    }

    fn send_command(&mut self, cmd: SourceCommand) {
        self.shared.source.lock().unwrap().recv_command(cmd);
    }

    fn next_event(&mut self) -> Option<ElementEvent> {
        self.shared.source.lock().unwrap().next_event()
    }

    fn shutdown(&mut self) {
        let _ = self.stream.pause();
        self.shared.source.lock().unwrap().shutdown();
    }
}
