use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "yolo-detect")]
#[command(about = "Object detection on images, videos and cameras with a YOLO ONNX model", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// JSON configuration file (defaults to ./config.json when present)
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    /// ONNX model path, overrides the configuration
    #[arg(long, global = true)]
    pub model: Option<String>,

    /// Confidence threshold, overrides the configuration
    #[arg(long, global = true, value_parser = parse_unit_interval)]
    pub conf: Option<f32>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Detect objects in one image
    Image {
        input: PathBuf,
        /// Annotated image path (default: <input stem>_detected.png)
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Detect objects in every frame of a video
    Video {
        input: PathBuf,
        /// Annotated video path (default: <output_dir>/<input stem>_detected.mp4)
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Record annotated camera frames until Ctrl-C
    Webcam {
        /// Camera device, overrides the configuration
        #[arg(long)]
        device: Option<String>,
        #[arg(long, short)]
        output: Option<PathBuf>,
        /// Stop after this many frames
        #[arg(long)]
        max_frames: Option<u64>,
    },

    /// Start the HTTP server
    Serve {
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Write the effective configuration as JSON
    InitConfig {
        #[arg(default_value = "config.json")]
        path: PathBuf,
    },
}

fn parse_unit_interval(s: &str) -> Result<f32, String> {
    let v: f32 = s.parse().map_err(|_| format!("`{}` is not a number", s))?;
    if (0.0..=1.0).contains(&v) {
        Ok(v)
    } else {
        Err(format!("{} is outside 0..=1", v))
    }
}
