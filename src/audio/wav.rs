use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::warn;

use super::AudioFormat;

/// Streaming 16-bit PCM WAV writer.
///
/// The 44-byte header is written with placeholder sizes on creation and
/// rewritten with the final byte counts when the writer is finished, so a
/// crash mid-session leaves a recoverable file with a stale header rather
/// than no file at all. Finishing before any write produces a valid
/// zero-data container.
pub struct WavFileWriter {
    path: PathBuf,
    writer: Option<hound::WavWriter<BufWriter<File>>>,
    bytes_written: u64,
}

impl WavFileWriter {
    /// Create the file (and any missing parent directories) and write the
    /// placeholder header.
    pub fn create(path: impl Into<PathBuf>, format: &AudioFormat) -> Result<Self> {
        let path = path.into();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {:?}", parent))?;
        }

        let spec = hound::WavSpec {
            channels: format.number_of_channels.max(1),
            sample_rate: format.sample_rate.max(1),
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let writer = hound::WavWriter::create(&path, spec)
            .with_context(|| format!("failed to create WAV file {:?}", path))?;

        Ok(Self {
            path,
            writer: Some(writer),
            bytes_written: 0,
        })
    }

    /// Append samples in arrival order.
    pub fn write_samples(&mut self, samples: &[i16]) -> Result<()> {
        if let Some(writer) = &mut self.writer {
            for &sample in samples {
                writer
                    .write_sample(sample)
                    .with_context(|| format!("failed to write sample to {:?}", self.path))?;
            }
            self.bytes_written += samples.len() as u64 * 2;
        }
        Ok(())
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush, rewrite the header with final sizes and close the file.
    /// Idempotent; the second call is a no-op.
    pub fn finish(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            writer
                .finalize()
                .with_context(|| format!("failed to finalize WAV file {:?}", self.path))?;
        }
        Ok(())
    }
}

impl Drop for WavFileWriter {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            if let Err(e) = writer.finalize() {
                warn!("failed to finalize WAV writer for {:?} on drop: {}", self.path, e);
            }
        }
    }
}
