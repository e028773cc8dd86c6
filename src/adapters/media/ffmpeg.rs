//! Video file and camera I/O through the `ffmpeg` executable.
//!
//! Frames cross the process boundary as raw `rgb24`, so decoding and encoding
//! (and the only pixel format conversions) happen inside ffmpeg. Every child
//! process is killed and reaped when its source or sink is dropped.

use std::collections::VecDeque;
use std::ffi::OsString;
use std::fs;
use std::io::{self, BufRead, BufReader, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;
use tracing::{debug, info, warn};

use super::probe::{probe_video, FALLBACK_FPS};
use crate::application::ports::{FrameSink, FrameSource, SinkProvider, SourceProvider};
use crate::domain::errors::{PipelineError, PipelineResult};
use crate::domain::stream::{Frame, OutputArtifact, StreamInfo};

const STDERR_TAIL_LINES: usize = 20;

fn ffmpeg_binary() -> Result<PathBuf, String> {
    which::which("ffmpeg").map_err(|_| "ffmpeg not found in PATH".to_string())
}

/// Starts ffmpeg in a process group of its own. A Ctrl-C from the terminal
/// then reaches only this program, which ends the run through its stop
/// signal and lets the encoder write a complete file.
fn ffmpeg_command(binary: &Path) -> Command {
    let mut cmd = Command::new(binary);
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }
    cmd
}

/// Decoder arguments for a video file. Passthrough keeps every decoded
/// frame; the rawvideo muxer would otherwise resample variable frame rate
/// input to a constant rate by duplicating or dropping frames.
fn decode_args(path: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = ["-hide_banner", "-loglevel", "error", "-nostdin", "-noautorotate", "-i"]
        .into_iter()
        .map(OsString::from)
        .collect();
    args.push(path.as_os_str().to_owned());
    args.extend(
        ["-map", "0:v:0", "-fps_mode", "passthrough", "-f", "rawvideo", "-pix_fmt", "rgb24", "-"]
            .into_iter()
            .map(OsString::from),
    );
    args
}

/// Keeps the last lines ffmpeg wrote to stderr for error messages. Draining
/// on a thread keeps the child from blocking on a full pipe.
#[derive(Clone, Default)]
struct StderrTail {
    lines: Arc<Mutex<VecDeque<String>>>,
}

impl StderrTail {
    fn capture(child: &mut Child) -> Self {
        let tail = Self::default();
        if let Some(stderr) = child.stderr.take() {
            let lines = tail.lines.clone();
            thread::spawn(move || {
                for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                    debug!("ffmpeg: {}", line);
                    if let Ok(mut buf) = lines.lock() {
                        if buf.len() == STDERR_TAIL_LINES {
                            buf.pop_front();
                        }
                        buf.push_back(line);
                    }
                }
            });
        }
        tail
    }

    fn text(&self) -> String {
        self.lines
            .lock()
            .map(|buf| buf.iter().cloned().collect::<Vec<_>>().join(" | "))
            .unwrap_or_default()
    }
}

fn reap(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

/// Result of reading one raw frame from a pipe.
#[derive(Debug, PartialEq)]
pub enum RawRead {
    Frame(Vec<u8>),
    /// Clean end of stream at a frame boundary.
    Eof,
    /// Stream ended partway through a frame; holds the bytes that arrived.
    Truncated(usize),
}

/// Reads exactly `frame_len` bytes unless the stream ends first.
pub fn read_raw_frame(reader: &mut impl Read, frame_len: usize) -> io::Result<RawRead> {
    let mut buf = vec![0u8; frame_len];
    let mut filled = 0;
    while filled < frame_len {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(match filled {
        0 => RawRead::Eof,
        n if n < frame_len => RawRead::Truncated(n),
        _ => RawRead::Frame(buf),
    })
}

/// A running ffmpeg decoder emitting rgb24 frames of a known size.
struct RawVideoPipe {
    child: Child,
    stdout: BufReader<ChildStdout>,
    stderr: StderrTail,
    info: StreamInfo,
    label: String,
    frames_read: u64,
    done: bool,
}

impl RawVideoPipe {
    fn spawn(mut cmd: Command, info: StreamInfo, label: String) -> PipelineResult<Self> {
        let mut child = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| PipelineError::SourceOpen(format!("spawning ffmpeg for {}: {}", label, e)))?;
        let stderr = StderrTail::capture(&mut child);
        let Some(stdout) = child.stdout.take() else {
            reap(&mut child);
            return Err(PipelineError::SourceOpen("ffmpeg stdout not captured".into()));
        };
        Ok(Self {
            child,
            stdout: BufReader::with_capacity(info.frame_len().max(8192), stdout),
            stderr,
            info,
            label,
            frames_read: 0,
            done: false,
        })
    }

    fn next_frame(&mut self) -> PipelineResult<Option<Frame>> {
        if self.done {
            return Ok(None);
        }
        let read = read_raw_frame(&mut self.stdout, self.info.frame_len())
            .map_err(|e| PipelineError::SourceRead(format!("{}: {}", self.label, e)))?;

        match read {
            RawRead::Frame(buf) => {
                self.frames_read += 1;
                Frame::from_raw(self.info.width, self.info.height, buf)
                    .map(Some)
                    .ok_or_else(|| PipelineError::SourceRead("frame buffer size mismatch".into()))
            }
            RawRead::Truncated(n) => {
                warn!(
                    "{}: dropping truncated trailing frame ({} of {} bytes)",
                    self.label,
                    n,
                    self.info.frame_len()
                );
                self.done = true;
                Ok(None)
            }
            RawRead::Eof => {
                self.done = true;
                let status = self
                    .child
                    .wait()
                    .map_err(|e| PipelineError::SourceRead(format!("{}: {}", self.label, e)))?;
                if !status.success() && self.frames_read == 0 {
                    return Err(PipelineError::SourceRead(format!(
                        "ffmpeg could not decode {}: {}",
                        self.label,
                        self.stderr.text()
                    )));
                }
                if !status.success() {
                    warn!("{}: decoder exited with {} after {} frames", self.label, status, self.frames_read);
                }
                Ok(None)
            }
        }
    }
}

impl Drop for RawVideoPipe {
    fn drop(&mut self) {
        reap(&mut self.child);
        debug!("{}: decoder released after {} frames", self.label, self.frames_read);
    }
}

/// Finite source decoding a video file front to back.
pub struct FfmpegVideoSource {
    pipe: RawVideoPipe,
}

impl FfmpegVideoSource {
    pub fn open(path: &Path) -> PipelineResult<Self> {
        let info = probe_video(path)?;
        let ffmpeg = ffmpeg_binary().map_err(PipelineError::SourceOpen)?;

        let mut cmd = ffmpeg_command(&ffmpeg);
        cmd.args(decode_args(path));

        info!(
            "Decoding {} ({}x{} @ {:.2} fps)",
            path.display(),
            info.width,
            info.height,
            info.fps
        );
        let pipe = RawVideoPipe::spawn(cmd, info, path.display().to_string())?;
        Ok(Self { pipe })
    }
}

impl FrameSource for FfmpegVideoSource {
    fn info(&self) -> &StreamInfo {
        &self.pipe.info
    }

    fn next_frame(&mut self) -> PipelineResult<Option<Frame>> {
        self.pipe.next_frame()
    }
}

/// Camera capture settings for the ffmpeg v4l2 input.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraSettings {
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

/// Live source reading a V4L2 camera through ffmpeg. Runs until dropped.
pub struct FfmpegCameraSource {
    pipe: RawVideoPipe,
}

impl FfmpegCameraSource {
    pub fn open(settings: &CameraSettings) -> PipelineResult<Self> {
        if settings.width == 0 || settings.height == 0 {
            return Err(PipelineError::SourceOpen("camera size must be positive".into()));
        }
        if !Path::new(&settings.device).exists() {
            return Err(PipelineError::SourceOpen(format!("no camera at {}", settings.device)));
        }
        let ffmpeg = ffmpeg_binary().map_err(PipelineError::SourceOpen)?;
        let size = format!("{}x{}", settings.width, settings.height);
        let fps = settings.fps.max(1);

        let mut cmd = ffmpeg_command(&ffmpeg);
        cmd.args(["-hide_banner", "-loglevel", "error", "-nostdin", "-f", "v4l2"])
            .args(["-video_size", &size, "-framerate", &fps.to_string(), "-i"])
            .arg(&settings.device)
            // drivers may round the mode; the pipe must carry the advertised size
            .args(["-vf", &format!("scale={}:{}", settings.width, settings.height)])
            .args(["-f", "rawvideo", "-pix_fmt", "rgb24", "-"]);

        let info = StreamInfo {
            width: settings.width,
            height: settings.height,
            fps: fps as f64,
            frames_total: None,
        };
        info!("Opening camera {} at {} @ {} fps", settings.device, size, fps);
        let pipe = RawVideoPipe::spawn(cmd, info, settings.device.clone())?;
        Ok(Self { pipe })
    }
}

impl FrameSource for FfmpegCameraSource {
    fn info(&self) -> &StreamInfo {
        &self.pipe.info
    }

    fn next_frame(&mut self) -> PipelineResult<Option<Frame>> {
        self.pipe.next_frame()
    }
}

/// Encodes frames into a video file. The output keeps the source's
/// resolution and frame rate.
pub struct FfmpegVideoSink {
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stderr: StderrTail,
    path: PathBuf,
    info: StreamInfo,
    frames: u64,
}

impl FfmpegVideoSink {
    pub fn create(path: &Path, info: &StreamInfo, codec: &str) -> PipelineResult<Self> {
        let ffmpeg = ffmpeg_binary().map_err(PipelineError::SinkOpen)?;
        Self::create_with(&ffmpeg, path, info, codec)
    }

    fn create_with(ffmpeg: &Path, path: &Path, info: &StreamInfo, codec: &str) -> PipelineResult<Self> {
        if info.width == 0 || info.height == 0 {
            return Err(PipelineError::SinkOpen("output size must be positive".into()));
        }
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|e| PipelineError::SinkOpen(format!("{}: {}", parent.display(), e)))?;
        }

        let fps = if info.fps > 0.0 { info.fps } else { FALLBACK_FPS };
        // 4:2:0 needs even dimensions
        let pix_fmt = if info.width % 2 == 0 && info.height % 2 == 0 { "yuv420p" } else { "yuv444p" };

        let mut child = ffmpeg_command(ffmpeg)
            .args(["-hide_banner", "-loglevel", "error", "-y"])
            .args(["-f", "rawvideo", "-pix_fmt", "rgb24"])
            .args(["-s", &format!("{}x{}", info.width, info.height)])
            .args(["-r", &format!("{}", fps), "-i", "-"])
            .args(["-c:v", codec, "-pix_fmt", pix_fmt])
            .arg(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| PipelineError::SinkOpen(format!("spawning ffmpeg encoder: {}", e)))?;

        let stderr = StderrTail::capture(&mut child);
        let Some(stdin) = child.stdin.take() else {
            reap(&mut child);
            return Err(PipelineError::SinkOpen("ffmpeg stdin not captured".into()));
        };

        info!(
            "Encoding {} ({}x{} @ {:.2} fps, {})",
            path.display(),
            info.width,
            info.height,
            fps,
            codec
        );
        Ok(Self {
            child: Some(child),
            stdin: Some(stdin),
            stderr,
            path: path.to_path_buf(),
            info: StreamInfo { fps, ..info.clone() },
            frames: 0,
        })
    }
}

impl FrameSink for FfmpegVideoSink {
    fn write(&mut self, frame: &Frame) -> PipelineResult<()> {
        if frame.dimensions() != (self.info.width, self.info.height) {
            return Err(PipelineError::SinkWrite(format!(
                "frame is {}x{}, output is {}x{}",
                frame.width(),
                frame.height(),
                self.info.width,
                self.info.height
            )));
        }
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| PipelineError::SinkWrite("encoder already closed".into()))?;
        stdin.write_all(frame.as_raw()).map_err(|e| {
            PipelineError::SinkWrite(format!("{}: {} {}", self.path.display(), e, self.stderr.text()))
        })?;
        self.frames += 1;
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> PipelineResult<Option<OutputArtifact>> {
        // closing stdin ends the input; ffmpeg then writes the trailer
        drop(self.stdin.take());
        let Some(mut child) = self.child.take() else {
            return Err(PipelineError::SinkWrite("encoder already finished".into()));
        };
        let status = child
            .wait()
            .map_err(|e| PipelineError::SinkWrite(format!("waiting for ffmpeg: {}", e)))?;
        if !status.success() {
            return Err(PipelineError::SinkWrite(format!(
                "ffmpeg exited with {}: {}",
                status,
                self.stderr.text()
            )));
        }

        info!("Wrote {} frames to {}", self.frames, self.path.display());
        Ok(Some(OutputArtifact::Video {
            path: self.path.clone(),
            frames: self.frames,
            width: self.info.width,
            height: self.info.height,
            fps: self.info.fps,
        }))
    }
}

impl Drop for FfmpegVideoSink {
    fn drop(&mut self) {
        drop(self.stdin.take());
        if let Some(mut child) = self.child.take() {
            // abandoned before finish: the file is incomplete
            reap(&mut child);
            let _ = fs::remove_file(&self.path);
            warn!("Discarded unfinished output {}", self.path.display());
        }
    }
}

/// Opens a video file for each run.
#[derive(Debug, Clone)]
pub struct VideoFileInput {
    pub path: PathBuf,
}

impl VideoFileInput {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SourceProvider for VideoFileInput {
    fn describe(&self) -> String {
        format!("video {}", self.path.display())
    }

    fn open(&self) -> PipelineResult<Box<dyn FrameSource>> {
        Ok(Box::new(FfmpegVideoSource::open(&self.path)?))
    }
}

/// Opens a camera through ffmpeg for each run.
#[derive(Debug, Clone)]
pub struct CameraInput {
    pub settings: CameraSettings,
}

impl SourceProvider for CameraInput {
    fn describe(&self) -> String {
        format!("camera {}", self.settings.device)
    }

    fn open(&self) -> PipelineResult<Box<dyn FrameSource>> {
        Ok(Box::new(FfmpegCameraSource::open(&self.settings)?))
    }
}

/// Encodes the run into a video file.
#[derive(Debug, Clone)]
pub struct VideoFileOutput {
    pub path: PathBuf,
    pub codec: String,
}

impl VideoFileOutput {
    pub fn new(path: impl Into<PathBuf>, codec: impl Into<String>) -> Self {
        Self { path: path.into(), codec: codec.into() }
    }
}

impl SinkProvider for VideoFileOutput {
    fn create(&self, info: &StreamInfo) -> PipelineResult<Box<dyn FrameSink>> {
        Ok(Box::new(FfmpegVideoSink::create(&self.path, info, &self.codec)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Hands out data in small chunks like a pipe does.
    struct Trickle {
        data: Cursor<Vec<u8>>,
        chunk: usize,
    }

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = buf.len().min(self.chunk);
            self.data.read(&mut buf[..n])
        }
    }

    #[test]
    fn reads_whole_frames_across_short_reads() {
        let mut pipe = Trickle { data: Cursor::new((0..24u8).collect()), chunk: 5 };

        assert_eq!(read_raw_frame(&mut pipe, 12).unwrap(), RawRead::Frame((0..12).collect()));
        assert_eq!(read_raw_frame(&mut pipe, 12).unwrap(), RawRead::Frame((12..24).collect()));
        assert_eq!(read_raw_frame(&mut pipe, 12).unwrap(), RawRead::Eof);
    }

    #[test]
    fn partial_trailing_frame_is_reported() {
        let mut pipe = Cursor::new(vec![7u8; 20]);
        assert!(matches!(read_raw_frame(&mut pipe, 12).unwrap(), RawRead::Frame(_)));
        assert_eq!(read_raw_frame(&mut pipe, 12).unwrap(), RawRead::Truncated(8));
    }

    #[test]
    fn missing_video_fails_to_open() {
        let err = VideoFileInput::new("/nonexistent/input.mp4").open().err().unwrap();
        assert!(matches!(err, PipelineError::SourceOpen(_)));
    }

    #[test]
    fn missing_camera_fails_to_open() {
        let input = CameraInput {
            settings: CameraSettings {
                device: "/dev/video-does-not-exist".into(),
                width: 640,
                height: 480,
                fps: 30,
            },
        };
        assert!(matches!(input.open().err().unwrap(), PipelineError::SourceOpen(_)));
        assert_eq!(input.describe(), "camera /dev/video-does-not-exist");
    }

    #[test]
    fn decoder_keeps_every_frame() {
        let args = decode_args(Path::new("clip.mp4"));
        let pos = args.iter().position(|a| a == "-fps_mode").unwrap();
        assert_eq!(args[pos + 1], "passthrough");
        // output options must follow the input
        let input = args.iter().position(|a| a == "clip.mp4").unwrap();
        assert!(pos > input);
        assert_eq!(args.last().unwrap(), "-");
    }

    /// Process group id from /proc/<pid>/stat (field after state and ppid).
    #[cfg(target_os = "linux")]
    fn process_group_of(pid: u32) -> String {
        let stat = fs::read_to_string(format!("/proc/{}/stat", pid)).unwrap();
        let (_, fields) = stat.rsplit_once(')').unwrap();
        fields.split_whitespace().nth(2).unwrap().to_string()
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn encoder_survives_terminal_interrupt() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let encoder = dir.path().join("ffmpeg");
        // exits 255 on SIGINT like ffmpeg does, otherwise drains its input
        fs::write(&encoder, "#!/bin/sh\ntrap 'exit 255' INT\ncat > /dev/null\n").unwrap();
        fs::set_permissions(&encoder, fs::Permissions::from_mode(0o755)).unwrap();

        let info = StreamInfo { width: 4, height: 2, fps: 10.0, frames_total: None };
        let out = dir.path().join("out.mp4");
        let mut sink = FfmpegVideoSink::create_with(&encoder, &out, &info, "libx264").unwrap();
        let pid = sink.child.as_ref().unwrap().id();

        // a terminal Ctrl-C goes to our group, which the encoder is not in
        assert_eq!(process_group_of(pid), pid.to_string());
        assert_ne!(process_group_of(std::process::id()), pid.to_string());

        sink.write(&Frame::new(4, 2)).unwrap();
        let artifact = Box::new(sink).finish().unwrap();
        assert!(matches!(artifact, Some(OutputArtifact::Video { frames: 1, .. })));
    }

    #[test]
    fn zero_sized_output_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let out = VideoFileOutput::new(dir.path().join("out.mp4"), "libx264");
        let info = StreamInfo { width: 0, height: 480, fps: 30.0, frames_total: None };
        assert!(matches!(out.create(&info).err().unwrap(), PipelineError::SinkOpen(_)));
    }
}
