use crate::error::{Error, Result};
use std::io;
use std::path::Path;
use std::process::{Command, Stdio};
use tracing::debug;

/// Pull the first subtitle stream out of a container as SRT text.
pub fn extract_subtitle_track(path: &Path) -> Result<Vec<u8>> {
    let fail = |reason: String| Error::Extraction {
        path: path.display().to_string(),
        reason,
    };

    debug!("Extracting subtitle stream from {}", path.display());
    let output = Command::new("ffmpeg")
        .args(["-v", "error", "-nostdin", "-i"])
        .arg(path)
        .args(["-map", "0:s:0", "-f", "srt", "-"])
        .stdin(Stdio::null())
        .output()
        .map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => fail("ffmpeg not found on PATH".to_string()),
            _ => fail(format!("could not run ffmpeg: {}", e)),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let reason = stderr
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .unwrap_or("no subtitle stream")
            .trim()
            .to_string();
        return Err(fail(format!("ffmpeg exited with {}: {}", output.status, reason)));
    }
    Ok(output.stdout)
}
