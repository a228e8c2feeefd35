//! External muxer invocation
//!
//! The muxer is an opaque command: it reads an ordered input list of segment
//! files and writes one container file, or exits non-zero with diagnostics on
//! stderr. [`FfmpegMuxer`] drives ffmpeg's concat demuxer.

use async_trait::async_trait;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;

use crate::config::ToolsConfig;
use crate::error::{Error, Result};

/// One muxer run
#[derive(Clone, Debug, PartialEq)]
pub struct MuxJob {
    /// Directory the input list's relative names are resolved against
    pub working_dir: PathBuf,
    /// Input list (`file <name>` per line, in playback order)
    pub input_list: PathBuf,
    /// Where the muxer writes its output
    pub output: PathBuf,
    /// Convert to this frame rate; stream-copy when None
    pub frame_rate: Option<f64>,
    /// Keep the audio track
    pub include_audio: bool,
}

/// Trait for the external process that joins segments
#[async_trait]
pub trait Muxer: Send + Sync {
    /// Fail with [`Error::MuxerUnavailable`] if the muxer cannot be invoked
    async fn ensure_available(&self) -> Result<()>;

    /// Run the muxer; [`Error::MuxerFailed`] on non-zero exit
    async fn mux(&self, job: &MuxJob) -> Result<()>;

    /// Human-readable name for logging
    fn name(&self) -> &'static str;
}

/// [`Muxer`] that runs an ffmpeg binary
///
/// # Examples
///
/// ```no_run
/// use segment_dl::muxer::{FfmpegMuxer, Muxer};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let muxer = FfmpegMuxer::from_path().ok_or("ffmpeg not found in PATH")?;
/// muxer.ensure_available().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct FfmpegMuxer {
    binary_path: PathBuf,
    hwaccel: Option<String>,
}

impl FfmpegMuxer {
    /// Create a muxer with an explicit binary path
    pub fn new(binary_path: PathBuf) -> Self {
        Self {
            binary_path,
            hwaccel: None,
        }
    }

    /// Pass `-hwaccel <method>` to ffmpeg
    pub fn with_hwaccel(mut self, hwaccel: Option<String>) -> Self {
        self.hwaccel = hwaccel;
        self
    }

    /// Attempt to find ffmpeg in PATH
    pub fn from_path() -> Option<Self> {
        which::which("ffmpeg").ok().map(Self::new)
    }

    /// Build from tool settings
    ///
    /// An explicit path wins; otherwise PATH is searched when allowed. If
    /// nothing is found the bare name `ffmpeg` is kept, and the problem surfaces
    /// from [`Muxer::ensure_available`].
    pub fn from_config(tools: &ToolsConfig) -> Self {
        let binary_path = match &tools.ffmpeg_path {
            Some(path) => path.clone(),
            None if tools.search_path => {
                which::which("ffmpeg").unwrap_or_else(|_| PathBuf::from("ffmpeg"))
            }
            None => PathBuf::from("ffmpeg"),
        };
        Self::new(binary_path).with_hwaccel(tools.hwaccel.clone())
    }

    /// Binary this muxer invokes
    pub fn binary_path(&self) -> &std::path::Path {
        &self.binary_path
    }

    /// Command-line arguments for `job`
    pub fn build_args(&self, job: &MuxJob) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["-y".into()];
        if let Some(hwaccel) = &self.hwaccel {
            args.push("-hwaccel".into());
            args.push(hwaccel.into());
        }
        args.extend(["-f", "concat", "-safe", "0", "-i"].map(OsString::from));
        args.push(job.input_list.clone().into_os_string());
        if !job.include_audio {
            args.push("-an".into());
        }
        match job.frame_rate {
            Some(fps) => {
                args.push("-r".into());
                args.push(fps.to_string().into());
            }
            None => {
                args.push("-c".into());
                args.push("copy".into());
            }
        }
        args.push(job.output.clone().into_os_string());
        args
    }
}

#[async_trait]
impl Muxer for FfmpegMuxer {
    async fn ensure_available(&self) -> Result<()> {
        Command::new(&self.binary_path)
            .arg("-version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| {
                Error::MuxerUnavailable(format!(
                    "cannot execute {}: {}",
                    self.binary_path.display(),
                    e
                ))
            })?;
        Ok(())
    }

    async fn mux(&self, job: &MuxJob) -> Result<()> {
        let args = self.build_args(job);
        tracing::debug!(binary = ?self.binary_path, args = ?args, "Running muxer");

        let output = Command::new(&self.binary_path)
            .args(&args)
            .current_dir(&job.working_dir)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| {
                Error::MuxerUnavailable(format!(
                    "failed to execute {}: {}",
                    self.binary_path.display(),
                    e
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim_end().to_string();
            tracing::error!(status = %output.status, stderr = %stderr, "Muxer failed");
            return Err(Error::MuxerFailed {
                status: output.status.to_string(),
                stderr,
            });
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        "ffmpeg"
    }
}
