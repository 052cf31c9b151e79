//! CPAL sink draining the ring-buffer backend
//!
//! Every render stream is a [`RingStream`]; the device callback sums them
//! into one stereo output. The cpal stream lives on its own thread because
//! it is not `Send` on every platform.

use std::sync::{Arc, Mutex, mpsc};
use std::thread;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use super::dsp::soft_clip;
use super::output::{
    MixScratch, OutputBackend, OutputError, OutputStream, RingBufferBackend, StreamFormat,
    StreamKey,
};

enum StreamCommand {
    Pause,
    Resume,
    Stop,
}

/// Stereo device output fed by per-stream rings
pub struct CpalOutput {
    rings: Arc<RingBufferBackend>,
    device_name: Option<String>,
    sample_rate: u32,
    knee: f32,
    command_tx: Mutex<Option<mpsc::Sender<StreamCommand>>>,
}

impl std::fmt::Debug for CpalOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CpalOutput")
            .field("device_name", &self.device_name)
            .field("sample_rate", &self.sample_rate)
            .finish_non_exhaustive()
    }
}

impl CpalOutput {
    /// Output on the default device (or the device named `device_name`)
    #[must_use]
    pub fn new(device_name: Option<String>, sample_rate: u32, knee: f32) -> Self {
        Self {
            rings: Arc::new(RingBufferBackend::new()),
            device_name,
            sample_rate,
            knee,
            command_tx: Mutex::new(None),
        }
    }

    /// Open the device and start pulling from the rings
    ///
    /// # Errors
    ///
    /// Returns `OutputError` if the device is missing or the stream cannot
    /// be built or started.
    pub fn start(&self) -> Result<(), OutputError> {
        self.stop();

        let host = cpal::default_host();
        let device = match &self.device_name {
            Some(name) => host
                .output_devices()
                .map_err(|e| OutputError::DeviceError(e.to_string()))?
                .find(|d| d.name().ok().as_deref() == Some(name.as_str()))
                .ok_or_else(|| OutputError::DeviceNotFound(name.clone()))?,
            None => host
                .default_output_device()
                .ok_or_else(|| OutputError::DeviceNotFound("default".into()))?,
        };

        let config = cpal::StreamConfig {
            channels: 2,
            sample_rate: cpal::SampleRate(self.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let (tx, rx) = mpsc::channel();
        let (status_tx, status_rx) = mpsc::channel();
        let rings = Arc::clone(&self.rings);
        let knee = self.knee;

        thread::spawn(move || {
            let mut scratch = MixScratch::new();
            let stream = device.build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    rings.mix_into(data, &mut scratch);
                    for sample in data.iter_mut() {
                        *sample = soft_clip(*sample, knee);
                    }
                },
                |err| tracing::error!(error = %err, "CPAL stream error"),
                None,
            );

            let stream = match stream {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = status_tx.send(Err(OutputError::StreamError(e.to_string())));
                    return;
                }
            };
            if let Err(e) = stream.play() {
                let _ = status_tx.send(Err(OutputError::StreamError(e.to_string())));
                return;
            }
            if status_tx.send(Ok(())).is_err() {
                return;
            }

            loop {
                match rx.recv() {
                    Ok(StreamCommand::Stop) | Err(_) => break,
                    Ok(StreamCommand::Pause) => {
                        let _ = stream.pause();
                    }
                    Ok(StreamCommand::Resume) => {
                        let _ = stream.play();
                    }
                }
            }
        });

        status_rx
            .recv()
            .map_err(|_| OutputError::DeviceError("audio thread exited".into()))??;

        if let Ok(mut slot) = self.command_tx.lock() {
            *slot = Some(tx);
        }
        tracing::info!(sample_rate = self.sample_rate, "Audio output started");
        Ok(())
    }

    /// Pause the device stream
    pub fn pause(&self) {
        self.send(StreamCommand::Pause);
    }

    /// Resume the device stream
    pub fn resume(&self) {
        self.send(StreamCommand::Resume);
    }

    /// Close the device stream
    pub fn stop(&self) {
        if let Ok(mut slot) = self.command_tx.lock() {
            if let Some(tx) = slot.take() {
                let _ = tx.send(StreamCommand::Stop);
            }
        }
    }

    fn send(&self, cmd: StreamCommand) {
        if let Ok(slot) = self.command_tx.lock() {
            if let Some(tx) = slot.as_ref() {
                let _ = tx.send(cmd);
            }
        }
    }
}

impl OutputBackend for CpalOutput {
    fn create_stream(
        &self,
        key: StreamKey,
        format: StreamFormat,
    ) -> Result<Arc<dyn OutputStream>, OutputError> {
        self.rings.create_stream(key, format)
    }

    fn destroy_stream(&self, key: StreamKey) {
        self.rings.destroy_stream(key);
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.stop();
    }
}
