use anyhow::{anyhow, Result};
use image::{ImageFormat, RgbImage};
use tracing::{info, warn};
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use crate::adapters::media::ffmpeg::CameraSettings;
use crate::application::ports::{FrameSource, SourceProvider};
use crate::domain::errors::{PipelineError, PipelineResult};
use crate::domain::stream::{Frame, StreamInfo};

/// Adaptador para la captura física de frames usando V4L2 con buffers MMAP.
/// Acepta cámaras que entregan MJPG o YUYV.
pub struct V4l2Source {
    stream: Stream<'static>,
    fourcc: FourCC,
    info: StreamInfo,
}

impl V4l2Source {
    pub fn open(cfg: &CameraSettings) -> Result<Self> {
        let dev = Device::with_path(&cfg.device)?;

        let mut fmt = dev.format()?;
        fmt.fourcc = FourCC::new(b"MJPG");
        fmt.width = cfg.width;
        fmt.height = cfg.height;
        // El driver puede ajustar los valores a los más cercanos soportados
        let mut actual = dev.set_format(&fmt)?;
        if actual.fourcc != FourCC::new(b"MJPG") {
            fmt.fourcc = FourCC::new(b"YUYV");
            actual = dev.set_format(&fmt)?;
        }

        let mut params = dev.params()?;
        params.interval.numerator = 1;
        params.interval.denominator = cfg.fps.max(1);
        if dev.set_params(&params).is_err() {
            warn!("{}: frame rate {} not accepted", cfg.device, cfg.fps);
        }

        let stream = Stream::with_buffers(&dev, v4l::buffer::Type::VideoCapture, 4)?;

        info!(
            "Camera {} opened: {}x{} [{}] at {} fps",
            cfg.device, actual.width, actual.height, actual.fourcc, cfg.fps
        );

        Ok(Self {
            stream,
            fourcc: actual.fourcc,
            info: StreamInfo {
                width: actual.width,
                height: actual.height,
                fps: cfg.fps.max(1) as f64,
                frames_total: None,
            },
        })
    }

    fn capture(&mut self) -> Result<RgbImage> {
        let (data, _) = self.stream.next()?;
        let fcc = self.fourcc.str().map_err(|_| anyhow!("invalid FourCC"))?;

        match fcc {
            "MJPG" => {
                let img = image::load_from_memory_with_format(data, ImageFormat::Jpeg)?;
                Ok(img.to_rgb8())
            }
            "YUYV" => Ok(yuyv_to_rgb(data, self.info.width, self.info.height)),
            _ => Err(anyhow!("camera format {} is not supported", fcc)),
        }
    }
}

impl FrameSource for V4l2Source {
    fn info(&self) -> &StreamInfo {
        &self.info
    }

    fn next_frame(&mut self) -> PipelineResult<Option<Frame>> {
        let frame = self
            .capture()
            .map_err(|e| PipelineError::SourceRead(format!("{:#}", e)))?;
        if frame.dimensions() != (self.info.width, self.info.height) {
            return Err(PipelineError::SourceRead(format!(
                "camera delivered {}x{}, expected {}x{}",
                frame.width(),
                frame.height(),
                self.info.width,
                self.info.height
            )));
        }
        Ok(Some(frame))
    }
}

/// Abre el dispositivo V4L2 en cada ejecución.
#[derive(Debug, Clone)]
pub struct V4l2CameraInput {
    pub settings: CameraSettings,
}

impl SourceProvider for V4l2CameraInput {
    fn describe(&self) -> String {
        format!("v4l2 camera {}", self.settings.device)
    }

    fn open(&self) -> PipelineResult<Box<dyn FrameSource>> {
        let source = V4l2Source::open(&self.settings)
            .map_err(|e| PipelineError::SourceOpen(format!("{}: {:#}", self.settings.device, e)))?;
        Ok(Box::new(source))
    }
}

/// Convierte un buffer YUYV (YUV 4:2:2) a RGB con los coeficientes BT.601.
/// Cada bloque de 4 bytes `[Y0, U, Y1, V]` define dos píxeles contiguos.
pub fn yuyv_to_rgb(yuyv: &[u8], w: u32, h: u32) -> RgbImage {
    let mut out = RgbImage::new(w, h);

    for (i, chunk) in yuyv.chunks_exact(4).enumerate() {
        let y0 = chunk[0] as f32;
        let u = chunk[1] as f32 - 128.0;
        let y1 = chunk[2] as f32;
        let v = chunk[3] as f32 - 128.0;

        let to_rgb = |y: f32| {
            image::Rgb([
                (y + 1.402 * v).clamp(0.0, 255.0) as u8,
                (y - 0.344136 * u - 0.714136 * v).clamp(0.0, 255.0) as u8,
                (y + 1.772 * u).clamp(0.0, 255.0) as u8,
            ])
        };

        let pixel_idx = i as u32 * 2;
        let x = pixel_idx % w;
        let y = pixel_idx / w;
        if y < h {
            out.put_pixel(x, y, to_rgb(y0));
            if x + 1 < w {
                out.put_pixel(x + 1, y, to_rgb(y1));
            }
        }
    }
    out
}
