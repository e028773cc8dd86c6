use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use tokio::sync::broadcast;

use crate::application::ports::{FrameSink, SinkProvider};
use crate::domain::errors::{PipelineError, PipelineResult};
use crate::domain::stream::{Frame, LiveEvent, OutputArtifact, StreamInfo};

/// Publishes every annotated frame as JPEG to live viewers. Sending never
/// blocks; a run without subscribers simply drops its frames.
pub struct BroadcastSink {
    tx: broadcast::Sender<LiveEvent>,
    quality: u8,
}

impl BroadcastSink {
    pub fn new(tx: broadcast::Sender<LiveEvent>, quality: u8) -> Self {
        Self { tx, quality: quality.clamp(1, 100) }
    }
}

pub fn encode_jpeg(frame: &Frame, quality: u8) -> PipelineResult<Vec<u8>> {
    let mut jpeg = Vec::new();
    let mut enc = JpegEncoder::new_with_quality(&mut jpeg, quality);
    enc.encode(frame.as_raw(), frame.width(), frame.height(), ExtendedColorType::Rgb8)
        .map_err(|e| PipelineError::SinkWrite(format!("encoding jpeg: {}", e)))?;
    Ok(jpeg)
}

impl FrameSink for BroadcastSink {
    fn write(&mut self, frame: &Frame) -> PipelineResult<()> {
        let jpeg = encode_jpeg(frame, self.quality)?;
        let _ = self.tx.send(LiveEvent::Frame(jpeg));
        Ok(())
    }

    fn finish(self: Box<Self>) -> PipelineResult<Option<OutputArtifact>> {
        Ok(None)
    }
}

#[derive(Clone)]
pub struct BroadcastOutput {
    pub tx: broadcast::Sender<LiveEvent>,
    pub quality: u8,
}

impl SinkProvider for BroadcastOutput {
    fn create(&self, _info: &StreamInfo) -> PipelineResult<Box<dyn FrameSink>> {
        Ok(Box::new(BroadcastSink::new(self.tx.clone(), self.quality)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn publishes_decodable_jpeg_frames() {
        let (tx, mut rx) = broadcast::channel(4);
        let output = BroadcastOutput { tx, quality: 80 };
        let mut sink = output.create(&StreamInfo::still(16, 8)).unwrap();

        sink.write(&Frame::from_pixel(16, 8, Rgb([200, 10, 10]))).unwrap();
        assert!(sink.finish().unwrap().is_none());

        match rx.try_recv().unwrap() {
            LiveEvent::Frame(jpeg) => {
                let img = image::load_from_memory(&jpeg).unwrap();
                assert_eq!((img.width(), img.height()), (16, 8));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn no_subscribers_is_not_an_error() {
        let (tx, rx) = broadcast::channel(1);
        drop(rx);
        let mut sink = BroadcastSink::new(tx, 80);
        assert!(sink.write(&Frame::new(4, 4)).is_ok());
    }
}
