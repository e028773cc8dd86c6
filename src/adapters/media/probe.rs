//! ffprobe stream information.

use serde::Deserialize;
use std::path::Path;
use std::process::{Command, Stdio};

use crate::domain::errors::{PipelineError, PipelineResult};
use crate::domain::stream::StreamInfo;

/// Used when a container reports no usable frame rate.
pub const FALLBACK_FPS: f64 = 30.0;

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    format: Option<FfprobeFormat>,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    nb_frames: Option<String>,
    duration: Option<String>,
}

/// Probes the first video stream of `path`.
pub fn probe_video(path: &Path) -> PipelineResult<StreamInfo> {
    if !path.is_file() {
        return Err(PipelineError::SourceOpen(format!("file not found: {}", path.display())));
    }
    which::which("ffprobe")
        .map_err(|_| PipelineError::SourceOpen("ffprobe not found in PATH".into()))?;

    let output = Command::new("ffprobe")
        .args(["-v", "quiet", "-print_format", "json", "-show_format", "-show_streams"])
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .map_err(|e| PipelineError::SourceOpen(format!("running ffprobe: {}", e)))?;

    if !output.status.success() {
        return Err(PipelineError::SourceOpen(format!(
            "ffprobe could not read {}: {}",
            path.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    parse_probe_output(&output.stdout).map_err(|e| {
        PipelineError::SourceOpen(format!("{}: {}", path.display(), e))
    })
}

/// Builds [`StreamInfo`] from ffprobe's JSON. The frame count comes from
/// `nb_frames` when the container records it, otherwise duration times fps.
pub fn parse_probe_output(json: &[u8]) -> Result<StreamInfo, String> {
    let probe: FfprobeOutput =
        serde_json::from_slice(json).map_err(|e| format!("invalid ffprobe output: {}", e))?;

    let stream = probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| "no video stream found".to_string())?;

    let (width, height) = match (stream.width, stream.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => return Err("video stream has no dimensions".into()),
    };

    let fps = stream
        .avg_frame_rate
        .as_deref()
        .and_then(parse_frame_rate)
        .or_else(|| stream.r_frame_rate.as_deref().and_then(parse_frame_rate))
        .unwrap_or(FALLBACK_FPS);

    let duration = stream
        .duration
        .as_deref()
        .or(probe.format.as_ref().and_then(|f| f.duration.as_deref()))
        .and_then(|d| d.parse::<f64>().ok())
        .filter(|d| *d > 0.0);

    let frames_total = stream
        .nb_frames
        .as_deref()
        .and_then(|n| n.parse::<u64>().ok())
        .filter(|n| *n > 0)
        .or_else(|| duration.map(|d| (d * fps).round() as u64));

    Ok(StreamInfo { width, height, fps, frames_total })
}

/// Parses a frame rate such as `"30/1"`, `"30000/1001"` or `"29.97"`.
/// `"0/0"` and other non-positive rates are `None`.
pub fn parse_frame_rate(s: &str) -> Option<f64> {
    let rate = if let Some((num, den)) = s.split_once('/') {
        let num: f64 = num.trim().parse().ok()?;
        let den: f64 = den.trim().parse().ok()?;
        if den <= 0.0 {
            return None;
        }
        num / den
    } else {
        s.trim().parse().ok()?
    };
    (rate.is_finite() && rate > 0.0).then_some(rate)
}
