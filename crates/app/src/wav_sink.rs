//! Persists finished call recordings as WAV files.

use std::path::{Path, PathBuf};

use hound::{SampleFormat, WavSpec, WavWriter};
use thiserror::Error;

use crate::tap::RecordingData;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("wav encoding error: {0}")]
    Wav(#[from] hound::Error),
}

pub struct WavSink {
    dir: PathBuf,
    prefix: String,
}

impl WavSink {
    pub fn new(dir: impl AsRef<Path>, prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            prefix: prefix.into(),
        }
    }

    /// Write one recording, timestamped so successive calls never collide.
    pub fn write(&self, recording: &RecordingData) -> Result<PathBuf, SinkError> {
        std::fs::create_dir_all(&self.dir)?;
        let filename = format!(
            "{}_recording_{}.wav",
            self.prefix,
            chrono::Local::now().format("%Y%m%d_%H%M%S")
        );
        let path = self.dir.join(filename);

        let spec = WavSpec {
            channels: recording.channels,
            sample_rate: recording.sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(&path, spec)?;
        for sample in &recording.samples {
            writer.write_sample(*sample)?;
        }
        writer.finalize()?;
        tracing::info!(path = %path.display(), "recording saved");
        Ok(path)
    }
}
