//! CPAL input device.

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{SampleFormat, StreamConfig as CpalStreamConfig};
use ringbuf::traits::Producer;

use crate::capture::InputDevice;
use crate::device::{classify_stream_error, DeviceStream, FaultNotifier, StreamThread};
use crate::format::f32_to_i16;
use crate::{AudioFormat, VoiceError};

/// Which input device to use.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
enum DeviceSelection {
    /// The system's default input device.
    #[default]
    SystemDefault,
    /// A specific device by name.
    ByName(String),
}

/// Microphone input through CPAL.
///
/// The device is resolved each time it is opened, so a `CpalInput` can be
/// reused across sessions and follows default-device changes.
#[derive(Debug, Clone, Default)]
pub struct CpalInput {
    selection: DeviceSelection,
}

impl CpalInput {
    /// Uses the system's default input device.
    pub fn default_device() -> Self {
        Self::default()
    }

    /// Uses the input device with the given name.
    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            selection: DeviceSelection::ByName(name.into()),
        }
    }

    fn resolve(selection: &DeviceSelection) -> Result<cpal::Device, VoiceError> {
        let host = cpal::default_host();
        match selection {
            DeviceSelection::SystemDefault => host
                .default_input_device()
                .ok_or_else(|| VoiceError::device_unavailable("default input", "no default input device")),
            DeviceSelection::ByName(name) => {
                let devices = host
                    .input_devices()
                    .map_err(|e| VoiceError::device_unavailable(name, e))?;
                devices
                    .into_iter()
                    .find(|d| d.name().is_ok_and(|n| n == *name))
                    .ok_or_else(|| VoiceError::device_unavailable(name, "device not found"))
            }
        }
    }
}

impl InputDevice for CpalInput {
    fn name(&self) -> String {
        match &self.selection {
            DeviceSelection::SystemDefault => Self::resolve(&self.selection)
                .and_then(|d| d.name().map_err(|e| VoiceError::device_unavailable("input", e)))
                .unwrap_or_else(|_| "default input".to_string()),
            DeviceSelection::ByName(name) => name.clone(),
        }
    }

    fn native_format(&self) -> Result<AudioFormat, VoiceError> {
        let device = Self::resolve(&self.selection)?;
        let config = device
            .default_input_config()
            .map_err(|e| VoiceError::device_unavailable(self.name(), e))?;
        Ok(AudioFormat::new(config.sample_rate().0, config.channels()))
    }

    fn start(
        &self,
        mut producer: ringbuf::HeapProd<i16>,
        on_fault: FaultNotifier,
    ) -> Result<Box<dyn DeviceStream>, VoiceError> {
        let selection = self.selection.clone();
        let name = self.name();
        let device_name = name.clone();

        let thread = StreamThread::spawn(name, move || {
            let device = Self::resolve(&selection)?;
            let supported = device
                .default_input_config()
                .map_err(|e| VoiceError::device_unavailable(&device_name, e))?;
            let sample_format = supported.sample_format();
            let config: CpalStreamConfig = supported.into();

            let error_callback = move |err: cpal::StreamError| {
                tracing::error!("Audio input stream error: {}", err);
                if let Some(reason) = classify_stream_error(&err) {
                    on_fault(reason);
                }
            };

            let stream = match sample_format {
                SampleFormat::I16 => device.build_input_stream(
                    &config,
                    move |data: &[i16], _: &cpal::InputCallbackInfo| {
                        // Non-blocking push - drops samples if the ring is full
                        let _ = producer.push_slice(data);
                    },
                    error_callback,
                    None,
                ),
                SampleFormat::F32 => device.build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        for &sample in data {
                            let _ = producer.try_push(f32_to_i16(sample));
                        }
                    },
                    error_callback,
                    None,
                ),
                format => {
                    return Err(VoiceError::device_unavailable(
                        &device_name,
                        format!("unsupported sample format {format:?}"),
                    ));
                }
            };

            stream.map_err(|e| VoiceError::device_unavailable(&device_name, e))
        })?;

        Ok(Box::new(thread))
    }
}

/// Lists the names of all available input devices.
///
/// # Errors
///
/// Returns an error if the audio host cannot be queried.
pub fn list_input_devices() -> Result<Vec<String>, VoiceError> {
    let devices = cpal::default_host()
        .input_devices()
        .map_err(|e| VoiceError::device_unavailable("input", e))?;
    Ok(devices.filter_map(|d| d.name().ok()).collect())
}
