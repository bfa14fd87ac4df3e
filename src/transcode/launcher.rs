//! Starting encoder processes.

use super::command::{build_args, EncoderJob};
use reelforge_av::{ProcessHandle, SupervisedProcess};
use reelforge_common::{Error, Result};
use std::path::PathBuf;
use std::process::Stdio;

/// Log file the encoder's stderr is redirected to, inside the output directory.
pub const ENCODER_LOG: &str = "encoder.log";

/// Starts the process that produces a job's segments.
pub trait EncoderLauncher: Send + Sync + 'static {
    /// Launch `job`; the process runs with the job's output directory as
    /// working directory.
    ///
    /// # Errors
    ///
    /// [`Error::SpawnError`] when the process cannot be started.
    fn launch(&self, job: &EncoderJob) -> Result<Box<dyn ProcessHandle>>;
}

/// Launches ffmpeg as a supervised process group.
#[derive(Debug, Clone)]
pub struct FfmpegLauncher {
    ffmpeg: PathBuf,
}

impl FfmpegLauncher {
    pub fn new(ffmpeg: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
        }
    }
}

impl EncoderLauncher for FfmpegLauncher {
    fn launch(&self, job: &EncoderJob) -> Result<Box<dyn ProcessHandle>> {
        let args = build_args(job);
        tracing::debug!(
            session_id = %job.session_id,
            "ffmpeg args: {:?}",
            args
        );

        let log = std::fs::File::create(job.output_dir.join(ENCODER_LOG))
            .map_err(|e| Error::directory(&job.output_dir, e))?;

        let mut cmd = tokio::process::Command::new(&self.ffmpeg);
        cmd.args(&args)
            .current_dir(&job.output_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::from(log));

        let process = SupervisedProcess::spawn(cmd, self.ffmpeg.to_string_lossy())?;
        Ok(Box::new(process))
    }
}
