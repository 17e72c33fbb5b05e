//! CPAL microphone capture feeding the session's capture pipeline.
//!
//! Supported platforms: Windows and macOS. Elsewhere `open` fails with
//! `AudioDeviceError::Unsupported`.

use aura_engine::error::SessionError;
use aura_engine::traits::{CaptureStream, MicrophoneSource, SampleCallback};

use crate::error::AudioDeviceError;

// Device chunks are re-blocked to this many frames before resampling.
#[cfg_attr(not(any(windows, target_os = "macos")), allow(dead_code))]
const RESAMPLE_CHUNK_FRAMES: usize = 1024;

// Device callbacks queued for the consumer thread; further chunks are dropped.
#[cfg_attr(not(any(windows, target_os = "macos")), allow(dead_code))]
const CAPTURE_QUEUE_CHUNKS: usize = 64;

/// Microphone backed by the system's input device.
#[derive(Debug, Clone, Default)]
pub struct CpalMicrophone {
    device_name: Option<String>,
}

impl CpalMicrophone {
    pub fn new(device_name: Option<String>) -> Self {
        Self { device_name }
    }
}

impl MicrophoneSource for CpalMicrophone {
    fn open(
        &self,
        sample_rate_hz: u32,
        on_samples: SampleCallback,
    ) -> Result<Box<dyn CaptureStream>, SessionError> {
        let stream = imp::open(self.device_name.as_deref(), sample_rate_hz, on_samples)
            .map_err(|e| SessionError::Permission(e.to_string()))?;
        Ok(Box::new(stream))
    }
}

pub fn list_input_device_names() -> Result<Vec<String>, AudioDeviceError> {
    imp::list_input_device_names()
}

#[cfg(any(windows, target_os = "macos"))]
mod imp {
    use std::sync::mpsc;
    use std::time::Duration;

    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::{Device, Sample, SampleFormat, SizedSample, Stream};

    use super::{CAPTURE_QUEUE_CHUNKS, RESAMPLE_CHUNK_FRAMES};
    use crate::error::AudioDeviceError;
    use crate::resample::ChunkResampler;
    use aura_engine::traits::{CaptureStream, SampleCallback};

    enum Cmd {
        Shutdown,
    }

    enum WorkerMsg {
        Ready,
        Error(String),
    }

    pub struct CpalCaptureStream {
        cmd_tx: mpsc::Sender<Cmd>,
        worker_handle: Option<std::thread::JoinHandle<()>>,
    }

    impl CaptureStream for CpalCaptureStream {
        fn close(&mut self) {
            let _ = self.cmd_tx.send(Cmd::Shutdown);
            if let Some(h) = self.worker_handle.take() {
                let _ = h.join();
            }
        }
    }

    impl Drop for CpalCaptureStream {
        fn drop(&mut self) {
            self.close();
        }
    }

    pub fn list_input_device_names() -> Result<Vec<String>, AudioDeviceError> {
        let host = cpal::default_host();
        let mut out = Vec::new();
        for dev in host.input_devices()? {
            if let Ok(name) = dev.name() {
                out.push(name);
            }
        }
        out.sort();
        out.dedup();
        Ok(out)
    }

    fn find_device(device_name: Option<&str>) -> Result<Device, AudioDeviceError> {
        let host = cpal::default_host();

        if let Some(needle) = device_name.map(str::trim).filter(|n| !n.is_empty()) {
            if let Ok(devices) = host.input_devices() {
                for dev in devices {
                    if dev.name().is_ok_and(|name| name == needle) {
                        log::info!("Using input device: {needle}");
                        return Ok(dev);
                    }
                }
            }
            log::warn!("Preferred input device not found, falling back to default: {needle}");
        }

        host.default_input_device()
            .ok_or(AudioDeviceError::NoInputDevice)
    }

    fn pick_config(
        device: &Device,
        target_rate_hz: u32,
    ) -> Result<cpal::SupportedStreamConfig, AudioDeviceError> {
        // Prefer a config that runs at the target rate natively.
        for range in device.supported_input_configs()? {
            if range.min_sample_rate().0 <= target_rate_hz && range.max_sample_rate().0 >= target_rate_hz {
                return Ok(range.with_sample_rate(cpal::SampleRate(target_rate_hz)));
            }
        }
        Ok(device.default_input_config()?)
    }

    pub fn open(
        device_name: Option<&str>,
        target_rate_hz: u32,
        on_samples: SampleCallback,
    ) -> Result<CpalCaptureStream, AudioDeviceError> {
        let device = find_device(device_name)?;
        let config = pick_config(&device, target_rate_hz)?;
        let device_rate_hz = config.sample_rate().0;
        if device_rate_hz != target_rate_hz {
            log::info!("Microphone runs at {device_rate_hz} Hz; resampling to {target_rate_hz} Hz");
        }
        let mut resampler =
            ChunkResampler::new(device_rate_hz, target_rate_hz, RESAMPLE_CHUNK_FRAMES)?;

        let (sample_tx, sample_rx) = mpsc::sync_channel::<Vec<f32>>(CAPTURE_QUEUE_CHUNKS);
        let (cmd_tx, cmd_rx) = mpsc::channel::<Cmd>();
        let (worker_tx, worker_rx) = mpsc::channel::<WorkerMsg>();

        // The stream is not Send on every backend; it lives and dies on this thread.
        let worker_handle = std::thread::spawn(move || {
            let sample_format = config.sample_format();
            let channels = config.channels() as usize;
            let stream_config: cpal::StreamConfig = config.into();

            let stream = match sample_format {
                SampleFormat::I16 => build_input_stream::<i16>(&device, &stream_config, channels, sample_tx),
                SampleFormat::U16 => build_input_stream::<u16>(&device, &stream_config, channels, sample_tx),
                SampleFormat::I8 => build_input_stream::<i8>(&device, &stream_config, channels, sample_tx),
                SampleFormat::U8 => build_input_stream::<u8>(&device, &stream_config, channels, sample_tx),
                SampleFormat::I32 => build_input_stream::<i32>(&device, &stream_config, channels, sample_tx),
                SampleFormat::U32 => build_input_stream::<u32>(&device, &stream_config, channels, sample_tx),
                SampleFormat::F64 => build_input_stream::<f64>(&device, &stream_config, channels, sample_tx),
                _ => build_input_stream::<f32>(&device, &stream_config, channels, sample_tx),
            };

            let stream = match stream {
                Ok(s) => s,
                Err(e) => {
                    let _ = worker_tx.send(WorkerMsg::Error(format!("build stream: {e}")));
                    log::error!("Microphone stream build failed: {e}");
                    return;
                }
            };

            if let Err(e) = stream.play() {
                let _ = worker_tx.send(WorkerMsg::Error(format!("play stream: {e}")));
                log::error!("Microphone stream play failed: {e}");
                return;
            }

            let _ = worker_tx.send(WorkerMsg::Ready);

            run_consumer(sample_rx, cmd_rx, &mut resampler, on_samples);
            drop(stream);
        });

        match worker_rx.recv_timeout(Duration::from_secs(2)) {
            Ok(WorkerMsg::Ready) => {}
            Ok(WorkerMsg::Error(e)) => return Err(AudioDeviceError::Worker(e)),
            Err(mpsc::RecvTimeoutError::Timeout) => return Err(AudioDeviceError::WorkerTimeout),
            Err(_) => return Err(AudioDeviceError::Channel),
        }

        Ok(CpalCaptureStream {
            cmd_tx,
            worker_handle: Some(worker_handle),
        })
    }

    fn build_input_stream<T>(
        device: &Device,
        config: &cpal::StreamConfig,
        channels: usize,
        sample_tx: mpsc::SyncSender<Vec<f32>>,
    ) -> Result<Stream, cpal::BuildStreamError>
    where
        T: Sample + SizedSample + Send + 'static,
        f32: cpal::FromSample<T>,
    {
        let channels = channels.max(1);
        let mut dropped: u64 = 0;
        let cb = move |data: &[T], _: &cpal::InputCallbackInfo| {
            let mono: Vec<f32> = if channels == 1 {
                data.iter().map(|&s| s.to_sample::<f32>()).collect()
            } else {
                data.chunks_exact(channels)
                    .map(|frame| {
                        frame.iter().map(|&s| s.to_sample::<f32>()).sum::<f32>() / channels as f32
                    })
                    .collect()
            };
            if let Err(mpsc::TrySendError::Full(_)) = sample_tx.try_send(mono) {
                dropped += 1;
                if dropped == 1 || dropped % 100 == 0 {
                    log::warn!("Microphone consumer is behind; dropped {dropped} chunks");
                }
            }
        };

        device.build_input_stream(
            config,
            cb,
            |err| log::error!("Microphone stream error: {err}"),
            None,
        )
    }

    fn run_consumer(
        sample_rx: mpsc::Receiver<Vec<f32>>,
        cmd_rx: mpsc::Receiver<Cmd>,
        resampler: &mut ChunkResampler,
        on_samples: SampleCallback,
    ) {
        loop {
            // Drain commands promptly, even if the stream is stalled.
            match cmd_rx.try_recv() {
                Ok(Cmd::Shutdown) | Err(mpsc::TryRecvError::Disconnected) => return,
                Err(mpsc::TryRecvError::Empty) => {}
            }

            match sample_rx.recv_timeout(Duration::from_millis(50)) {
                Ok(samples) => match resampler.push(&samples) {
                    Ok(out) if !out.is_empty() => on_samples(&out),
                    Ok(_) => {}
                    Err(e) => log::warn!("Dropping microphone chunk: {e:#}"),
                },
                Err(mpsc::RecvTimeoutError::Timeout) => continue,
                Err(mpsc::RecvTimeoutError::Disconnected) => return,
            }
        }
    }
}

#[cfg(not(any(windows, target_os = "macos")))]
mod imp {
    use crate::error::AudioDeviceError;
    use aura_engine::traits::{CaptureStream, SampleCallback};

    pub struct CpalCaptureStream;

    impl CaptureStream for CpalCaptureStream {
        fn close(&mut self) {}
    }

    pub fn list_input_device_names() -> Result<Vec<String>, AudioDeviceError> {
        Err(AudioDeviceError::Unsupported)
    }

    pub fn open(
        _device_name: Option<&str>,
        _target_rate_hz: u32,
        _on_samples: SampleCallback,
    ) -> Result<CpalCaptureStream, AudioDeviceError> {
        Err(AudioDeviceError::Unsupported)
    }
}
