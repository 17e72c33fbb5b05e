//! CPAL speaker output. Agent audio is mixed in software so the session can
//! read a playback clock and hear about natural ends.
//!
//! The mixer runs at the session's output rate. When the device runs at a
//! different rate, the mixed signal is resampled as one continuous stream, so
//! chunk boundaries never see filter edges.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use aura_core::pcm::AudioBuffer;
use aura_engine::error::SessionError;
use aura_engine::traits::{AudioOutput, PlaybackId, SpeakerSink};
use tokio::sync::mpsc;

use crate::error::AudioDeviceError;
use crate::mixer::Mixer;
use crate::resample::{ChunkResampler, resample_mono_f32};

// Mix-rate frames rendered per resampler step.
const FEED_BLOCK_FRAMES: usize = 1024;

#[derive(Debug, Clone, Default)]
pub struct CpalSpeaker;

impl CpalSpeaker {
    pub fn new() -> Self {
        Self
    }
}

impl SpeakerSink for CpalSpeaker {
    fn open(
        &self,
        sample_rate_hz: u32,
        ended: mpsc::UnboundedSender<PlaybackId>,
    ) -> Result<Box<dyn AudioOutput>, SessionError> {
        let output = imp::open(sample_rate_hz, ended)
            .map_err(|e| SessionError::OutputDevice(e.to_string()))?;
        Ok(Box::new(output))
    }
}

pub fn list_output_device_names() -> Result<Vec<String>, AudioDeviceError> {
    imp::list_output_device_names()
}

/// Output side shared by every backend: the mixer plus whatever keeps the
/// device stream alive.
pub struct MixerOutput<S: DeviceStream> {
    mixer: Arc<Mutex<Mixer>>,
    stream: Option<S>,
}

/// Keeps a device stream running until `stop` is called.
pub trait DeviceStream: Send {
    fn stop(&mut self);
}

impl<S: DeviceStream> MixerOutput<S> {
    pub fn new(mixer: Arc<Mutex<Mixer>>, stream: S) -> Self {
        Self {
            mixer,
            stream: Some(stream),
        }
    }
}

impl<S: DeviceStream> AudioOutput for MixerOutput<S> {
    fn current_time(&self) -> f64 {
        self.mixer.lock().map(|m| m.current_time()).unwrap_or(0.0)
    }

    fn start(&mut self, id: PlaybackId, buffer: &AudioBuffer, start_at: f64) {
        let Ok(mut mixer) = self.mixer.lock() else {
            return;
        };
        let mix_rate = mixer.sample_rate_hz();
        let mono = buffer.to_mono();
        let samples = match resample_mono_f32(&mono, buffer.sample_rate_hz, mix_rate) {
            Ok(s) => s,
            Err(e) => {
                // An empty voice still ends on the next render, so the session
                // does not wait on it forever.
                log::warn!("Dropping agent audio chunk: {e:#}");
                Vec::new()
            }
        };
        mixer.start(id, samples, start_at);
    }

    fn stop(&mut self, id: PlaybackId) {
        if let Ok(mut mixer) = self.mixer.lock() {
            mixer.stop(id);
        }
    }

    fn close(&mut self) {
        if let Ok(mut mixer) = self.mixer.lock() {
            mixer.stop_all();
        }
        if let Some(mut stream) = self.stream.take() {
            stream.stop();
        }
    }
}

impl<S: DeviceStream> Drop for MixerOutput<S> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Pulls mixed audio for the device callback, converting from the mix rate to
/// the device rate.
pub struct DeviceFeed {
    mixer: Arc<Mutex<Mixer>>,
    resampler: ChunkResampler,
    block: Vec<f32>,
    ready: VecDeque<f32>,
}

impl DeviceFeed {
    pub fn new(
        mixer: Arc<Mutex<Mixer>>,
        mix_rate_hz: u32,
        device_rate_hz: u32,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            mixer,
            resampler: ChunkResampler::new(mix_rate_hz, device_rate_hz, FEED_BLOCK_FRAMES)?,
            block: vec![0.0; FEED_BLOCK_FRAMES],
            ready: VecDeque::new(),
        })
    }

    /// Fill `out` with the next mono device frames.
    pub fn fill(&mut self, out: &mut [f32]) {
        while self.ready.len() < out.len() {
            match self.mixer.lock() {
                Ok(mut m) => m.render(&mut self.block),
                Err(_) => self.block.fill(0.0),
            }
            match self.resampler.push(&self.block) {
                Ok(samples) if !samples.is_empty() => self.ready.extend(samples),
                Ok(_) => break,
                Err(e) => {
                    log::warn!("Speaker resampling failed: {e:#}");
                    break;
                }
            }
        }
        for s in out.iter_mut() {
            *s = self.ready.pop_front().unwrap_or(0.0);
        }
    }
}

#[cfg(any(windows, target_os = "macos"))]
mod imp {
    use std::sync::{Arc, Mutex, mpsc as std_mpsc};
    use std::time::Duration;

    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::{Device, FromSample, Sample, SampleFormat, SizedSample, Stream};
    use tokio::sync::mpsc;

    use super::{DeviceFeed, DeviceStream, MixerOutput};
    use crate::error::AudioDeviceError;
    use crate::mixer::Mixer;
    use aura_engine::traits::PlaybackId;

    enum WorkerMsg {
        Ready,
        Error(String),
    }

    pub struct CpalDeviceStream {
        shutdown_tx: std_mpsc::Sender<()>,
        worker_handle: Option<std::thread::JoinHandle<()>>,
    }

    impl DeviceStream for CpalDeviceStream {
        fn stop(&mut self) {
            let _ = self.shutdown_tx.send(());
            if let Some(h) = self.worker_handle.take() {
                let _ = h.join();
            }
        }
    }

    pub fn list_output_device_names() -> Result<Vec<String>, AudioDeviceError> {
        let host = cpal::default_host();
        let mut out = Vec::new();
        for dev in host.output_devices()? {
            if let Ok(name) = dev.name() {
                out.push(name);
            }
        }
        out.sort();
        out.dedup();
        Ok(out)
    }

    fn pick_config(
        device: &Device,
        target_rate_hz: u32,
    ) -> Result<cpal::SupportedStreamConfig, AudioDeviceError> {
        for range in device.supported_output_configs()? {
            if range.min_sample_rate().0 <= target_rate_hz && range.max_sample_rate().0 >= target_rate_hz {
                return Ok(range.with_sample_rate(cpal::SampleRate(target_rate_hz)));
            }
        }
        Ok(device.default_output_config()?)
    }

    pub fn open(
        target_rate_hz: u32,
        ended: mpsc::UnboundedSender<PlaybackId>,
    ) -> Result<MixerOutput<CpalDeviceStream>, AudioDeviceError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or(AudioDeviceError::NoOutputDevice)?;
        let config = pick_config(&device, target_rate_hz)?;
        let device_rate_hz = config.sample_rate().0;
        if device_rate_hz != target_rate_hz {
            log::info!("Speaker runs at {device_rate_hz} Hz; agent audio will be resampled");
        }

        let mixer = Arc::new(Mutex::new(Mixer::new(target_rate_hz, ended)));
        let feed = DeviceFeed::new(Arc::clone(&mixer), target_rate_hz, device_rate_hz)?;

        let (shutdown_tx, shutdown_rx) = std_mpsc::channel::<()>();
        let (worker_tx, worker_rx) = std_mpsc::channel::<WorkerMsg>();

        let worker_handle = std::thread::spawn(move || {
            let sample_format = config.sample_format();
            let channels = config.channels() as usize;
            let stream_config: cpal::StreamConfig = config.into();

            let stream = match sample_format {
                SampleFormat::I16 => build_output_stream::<i16>(&device, &stream_config, channels, feed),
                SampleFormat::U16 => build_output_stream::<u16>(&device, &stream_config, channels, feed),
                SampleFormat::I8 => build_output_stream::<i8>(&device, &stream_config, channels, feed),
                SampleFormat::U8 => build_output_stream::<u8>(&device, &stream_config, channels, feed),
                SampleFormat::I32 => build_output_stream::<i32>(&device, &stream_config, channels, feed),
                SampleFormat::U32 => build_output_stream::<u32>(&device, &stream_config, channels, feed),
                SampleFormat::F64 => build_output_stream::<f64>(&device, &stream_config, channels, feed),
                _ => build_output_stream::<f32>(&device, &stream_config, channels, feed),
            };

            let stream = match stream {
                Ok(s) => s,
                Err(e) => {
                    let _ = worker_tx.send(WorkerMsg::Error(format!("build stream: {e}")));
                    log::error!("Speaker stream build failed: {e}");
                    return;
                }
            };

            if let Err(e) = stream.play() {
                let _ = worker_tx.send(WorkerMsg::Error(format!("play stream: {e}")));
                log::error!("Speaker stream play failed: {e}");
                return;
            }

            let _ = worker_tx.send(WorkerMsg::Ready);

            // Park until shutdown or until the output handle is dropped.
            let _ = shutdown_rx.recv();
            drop(stream);
        });

        match worker_rx.recv_timeout(Duration::from_secs(2)) {
            Ok(WorkerMsg::Ready) => {}
            Ok(WorkerMsg::Error(e)) => return Err(AudioDeviceError::Worker(e)),
            Err(std_mpsc::RecvTimeoutError::Timeout) => return Err(AudioDeviceError::WorkerTimeout),
            Err(_) => return Err(AudioDeviceError::Channel),
        }

        Ok(MixerOutput::new(
            mixer,
            CpalDeviceStream {
                shutdown_tx,
                worker_handle: Some(worker_handle),
            },
        ))
    }

    fn build_output_stream<T>(
        device: &Device,
        config: &cpal::StreamConfig,
        channels: usize,
        mut feed: DeviceFeed,
    ) -> Result<Stream, cpal::BuildStreamError>
    where
        T: Sample + SizedSample + FromSample<f32> + Send + 'static,
    {
        let channels = channels.max(1);
        let mut scratch: Vec<f32> = Vec::new();

        let cb = move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            let frames = data.len() / channels;
            scratch.resize(frames, 0.0);
            feed.fill(&mut scratch);
            for (frame, &s) in data.chunks_exact_mut(channels).zip(scratch.iter()) {
                let v = T::from_sample(s);
                for out in frame.iter_mut() {
                    *out = v;
                }
            }
        };

        device.build_output_stream(
            config,
            cb,
            |err| log::error!("Speaker stream error: {err}"),
            None,
        )
    }
}

#[cfg(not(any(windows, target_os = "macos")))]
mod imp {
    use tokio::sync::mpsc;

    use super::{DeviceStream, MixerOutput};
    use crate::error::AudioDeviceError;
    use aura_engine::traits::PlaybackId;

    pub struct NoDeviceStream;

    impl DeviceStream for NoDeviceStream {
        fn stop(&mut self) {}
    }

    pub fn list_output_device_names() -> Result<Vec<String>, AudioDeviceError> {
        Err(AudioDeviceError::Unsupported)
    }

    pub fn open(
        _target_rate_hz: u32,
        _ended: mpsc::UnboundedSender<PlaybackId>,
    ) -> Result<MixerOutput<NoDeviceStream>, AudioDeviceError> {
        Err(AudioDeviceError::Unsupported)
    }
}
