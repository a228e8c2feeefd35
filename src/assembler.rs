//! Segment assembly into the final artifact
//!
//! The muxer always writes to a `~`-marked sibling inside the working
//! directory. Only a successful run is renamed to the requested output path, so
//! the final path never holds a partial file.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cache::{TEMP_MARKER, WorkingDir};
use crate::error::{Error, Result};
use crate::muxer::{MuxJob, Muxer};

/// Joins committed segments with a [`Muxer`] and promotes the result
#[derive(Clone)]
pub struct Assembler {
    muxer: Arc<dyn Muxer>,
}

impl Assembler {
    /// Assembler using `muxer`
    pub fn new(muxer: Arc<dyn Muxer>) -> Self {
        Self { muxer }
    }

    /// Mux every committed segment in `dir`, in numeric index order, to `output`
    ///
    /// Returns the final output path.
    ///
    /// # Errors
    ///
    /// - [`Error::Other`] when `dir` holds no committed segments or `output` has no file name
    /// - [`Error::MuxerFailed`] / [`Error::MuxerUnavailable`] from the muxer;
    ///   the temporary output is removed first
    /// - [`Error::Io`] for input list, rename or copy failures
    pub async fn combine(
        &self,
        dir: &WorkingDir,
        output: &Path,
        frame_rate: Option<f64>,
        include_audio: bool,
    ) -> Result<PathBuf> {
        let segments = dir.completed_segments().await?;
        if segments.is_empty() {
            return Err(Error::Other(format!(
                "no segments to assemble in {}",
                dir.path().display()
            )));
        }

        let input_list = dir.input_list_path();
        tokio::fs::write(&input_list, render_input_list(&segments)).await?;

        let temp_output = dir.path().join(temp_output_name(output)?);
        remove_if_present(&temp_output).await?;

        tracing::info!(
            muxer = self.muxer.name(),
            segments = segments.len(),
            output = ?output,
            "Assembling segments"
        );

        let job = MuxJob {
            working_dir: dir.path().to_path_buf(),
            input_list,
            output: temp_output.clone(),
            frame_rate,
            include_audio,
        };

        if let Err(e) = self.muxer.mux(&job).await {
            if let Err(cleanup) = remove_if_present(&temp_output).await {
                tracing::warn!(path = ?temp_output, error = %cleanup, "Failed to remove partial output");
            }
            return Err(e);
        }

        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        promote(&temp_output, output).await?;

        tracing::info!(output = ?output, "Artifact ready");
        Ok(output.to_path_buf())
    }
}

/// Muxer input list: one `file <name>` line per segment
fn render_input_list(segments: &[(u64, PathBuf)]) -> String {
    segments
        .iter()
        .filter_map(|(_, path)| path.file_name())
        .map(|name| format!("file {}\n", name.to_string_lossy()))
        .collect()
}

/// `<stem>~.<ext>` for the final output name
fn temp_output_name(output: &Path) -> Result<String> {
    let stem = output
        .file_stem()
        .ok_or_else(|| Error::Other(format!("output path has no file name: {}", output.display())))?
        .to_string_lossy();
    Ok(match output.extension() {
        Some(ext) => format!("{stem}{TEMP_MARKER}.{}", ext.to_string_lossy()),
        None => format!("{stem}{TEMP_MARKER}"),
    })
}

async fn remove_if_present(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Rename `from` to `to`; across filesystems, copy to a sibling of `to` first
async fn promote(from: &Path, to: &Path) -> Result<()> {
    match tokio::fs::rename(from, to).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::CrossesDevices => {
            tracing::debug!(from = ?from, to = ?to, "Output on another filesystem, copying");
            let staging = to.with_file_name(temp_output_name(to)?);
            tokio::fs::copy(from, &staging).await?;
            tokio::fs::rename(&staging, to).await?;
            remove_if_present(from).await
        }
        Err(e) => Err(e.into()),
    }
}
