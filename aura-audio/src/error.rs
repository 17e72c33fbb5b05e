#[derive(Debug, thiserror::Error)]
pub enum AudioDeviceError {
    #[error("no input device found")]
    NoInputDevice,

    #[error("no output device found")]
    NoOutputDevice,

    #[error("audio devices are not supported on this platform")]
    Unsupported,

    #[cfg(any(windows, target_os = "macos"))]
    #[error("failed to list devices: {0}")]
    ListDevices(#[from] cpal::DevicesError),

    #[cfg(any(windows, target_os = "macos"))]
    #[error("failed to query supported configs: {0}")]
    SupportedConfigs(#[from] cpal::SupportedStreamConfigsError),

    #[cfg(any(windows, target_os = "macos"))]
    #[error("failed to get default config: {0}")]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),

    #[cfg(any(windows, target_os = "macos"))]
    #[error("failed to build stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[cfg(any(windows, target_os = "macos"))]
    #[error("failed to play stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),

    #[error("audio worker failed: {0}")]
    Worker(String),

    #[error("audio worker startup timeout")]
    WorkerTimeout,

    #[error("failed to resample: {0}")]
    Resample(#[from] anyhow::Error),

    #[error("internal channel error")]
    Channel,
}
