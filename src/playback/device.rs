//! CPAL output device.

use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{SampleFormat, StreamConfig as CpalStreamConfig};

use crate::device::{classify_stream_error, DeviceStream, FaultNotifier, StreamThread};
use crate::format::f32_to_i16;
use crate::playback::{OutputDevice, Timeline};
use crate::{AudioFormat, VoiceError};

/// Speaker output through CPAL.
///
/// The output callback pulls every frame from the [`Timeline`], so the
/// device's own clock drives playback timing.
#[derive(Debug, Clone, Default)]
pub struct CpalOutput {
    name: Option<String>,
}

impl CpalOutput {
    /// Uses the system's default output device.
    pub fn default_device() -> Self {
        Self::default()
    }

    /// Uses the output device with the given name.
    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
        }
    }

    fn resolve(name: Option<&str>) -> Result<cpal::Device, VoiceError> {
        let host = cpal::default_host();
        match name {
            None => host
                .default_output_device()
                .ok_or_else(|| VoiceError::device_unavailable("default output", "no default output device")),
            Some(name) => host
                .output_devices()
                .map_err(|e| VoiceError::device_unavailable(name, e))?
                .find(|d| d.name().is_ok_and(|n| n == name))
                .ok_or_else(|| VoiceError::device_unavailable(name, "device not found")),
        }
    }
}

impl OutputDevice for CpalOutput {
    fn name(&self) -> String {
        self.name.clone().unwrap_or_else(|| {
            Self::resolve(None)
                .ok()
                .and_then(|d| d.name().ok())
                .unwrap_or_else(|| "default output".to_string())
        })
    }

    fn native_format(&self) -> Result<AudioFormat, VoiceError> {
        let device = Self::resolve(self.name.as_deref())?;
        let config = device
            .default_output_config()
            .map_err(|e| VoiceError::device_unavailable(self.name(), e))?;
        Ok(AudioFormat::new(config.sample_rate().0, config.channels()))
    }

    fn start(
        &self,
        timeline: Arc<Timeline>,
        on_fault: FaultNotifier,
    ) -> Result<Box<dyn DeviceStream>, VoiceError> {
        let selection = self.name.clone();
        let device_name = self.name();

        let thread = StreamThread::spawn(device_name.clone(), move || {
            let device = Self::resolve(selection.as_deref())?;
            let supported = device
                .default_output_config()
                .map_err(|e| VoiceError::device_unavailable(&device_name, e))?;
            let sample_format = supported.sample_format();
            let config: CpalStreamConfig = supported.into();

            let error_callback = move |err: cpal::StreamError| {
                tracing::error!("Audio output stream error: {}", err);
                if let Some(reason) = classify_stream_error(&err) {
                    on_fault(reason);
                }
            };

            let stream = match sample_format {
                SampleFormat::F32 => device.build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        timeline.render(data);
                    },
                    error_callback,
                    None,
                ),
                SampleFormat::I16 => {
                    let mut scratch = Vec::new();
                    device.build_output_stream(
                        &config,
                        move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                            scratch.resize(data.len(), 0.0);
                            timeline.render(&mut scratch);
                            for (out, &sample) in data.iter_mut().zip(&scratch) {
                                *out = f32_to_i16(sample);
                            }
                        },
                        error_callback,
                        None,
                    )
                }
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

/// Lists the names of all available output devices.
///
/// # Errors
///
/// Returns an error if the audio host cannot be queried.
pub fn list_output_devices() -> Result<Vec<String>, VoiceError> {
    let devices = cpal::default_host()
        .output_devices()
        .map_err(|e| VoiceError::device_unavailable("output", e))?;
    Ok(devices.filter_map(|d| d.name().ok()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_devices_doesnt_panic() {
        let _ = list_output_devices();
    }

    #[test]
    #[ignore = "requires audio hardware"]
    fn test_plays_silence_on_default_device() {
        let output = CpalOutput::default_device();
        let format = output.native_format().unwrap();
        let timeline = Arc::new(Timeline::new(format));
        let mut stream = output
            .start(Arc::clone(&timeline), crate::device::log_faults("test"))
            .unwrap();
        std::thread::sleep(std::time::Duration::from_millis(200));
        stream.release();
        assert!(timeline.now() > 0);
    }
}
