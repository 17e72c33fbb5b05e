pub mod capture;
pub mod error;
pub mod mixer;
pub mod output;
pub mod resample;

pub use capture::{CpalMicrophone, list_input_device_names};
pub use error::AudioDeviceError;
pub use output::{CpalSpeaker, list_output_device_names};
