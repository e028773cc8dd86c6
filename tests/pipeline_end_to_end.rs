use image::Rgb;
use std::sync::{Arc, Mutex};

use yolo_detect_pipeline::adapters::media::ffmpeg::{FfmpegVideoSink, VideoFileInput, VideoFileOutput};
use yolo_detect_pipeline::adapters::media::probe::probe_video;
use yolo_detect_pipeline::application::annotator::Annotator;
use yolo_detect_pipeline::application::pipeline::PipelineDriver;
use yolo_detect_pipeline::application::ports::{
    DetectorPort, FrameSink, FrameSource, SinkProvider, SourceProvider,
};
use yolo_detect_pipeline::domain::detection::Detection;
use yolo_detect_pipeline::domain::errors::{DetectorError, PipelineResult};
use yolo_detect_pipeline::domain::stream::{Frame, OutputArtifact, StreamInfo};
use yolo_detect_pipeline::domain::tally::DetectionTally;

struct MemorySource {
    info: StreamInfo,
    frames: std::vec::IntoIter<Frame>,
}

impl FrameSource for MemorySource {
    fn info(&self) -> &StreamInfo {
        &self.info
    }
    fn next_frame(&mut self) -> PipelineResult<Option<Frame>> {
        Ok(self.frames.next())
    }
}

struct MemoryInput {
    frames: Vec<Frame>,
    fps: f64,
}

impl SourceProvider for MemoryInput {
    fn describe(&self) -> String {
        "memory".into()
    }
    fn open(&self) -> PipelineResult<Box<dyn FrameSource>> {
        let (width, height) = self.frames[0].dimensions();
        Ok(Box::new(MemorySource {
            info: StreamInfo { width, height, fps: self.fps, frames_total: Some(self.frames.len() as u64) },
            frames: self.frames.clone().into_iter(),
        }))
    }
}

#[derive(Default, Clone)]
struct Recorded {
    info: Arc<Mutex<Option<StreamInfo>>>,
    frames: Arc<Mutex<Vec<Frame>>>,
}

struct MemorySink(Recorded);

impl FrameSink for MemorySink {
    fn write(&mut self, frame: &Frame) -> PipelineResult<()> {
        self.0.frames.lock().unwrap().push(frame.clone());
        Ok(())
    }
    fn finish(self: Box<Self>) -> PipelineResult<Option<OutputArtifact>> {
        Ok(None)
    }
}

impl SinkProvider for Recorded {
    fn create(&self, info: &StreamInfo) -> PipelineResult<Box<dyn FrameSink>> {
        *self.info.lock().unwrap() = Some(info.clone());
        Ok(Box::new(MemorySink(self.clone())))
    }
}

/// Reports a person on even frames and a person plus a dog on odd ones.
struct Alternating {
    calls: u64,
}

impl DetectorPort for Alternating {
    fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>, DetectorError> {
        self.calls += 1;
        let person = Detection::new((2.0, 2.0, 20.0, 30.0), 0.8, "person");
        if self.calls % 2 == 0 {
            Ok(vec![person, Detection::new((30.0, 5.0, 60.0, 40.0), 0.6, "dog").with_class_id(16)])
        } else {
            Ok(vec![person])
        }
    }
}

fn frames(n: usize, w: u32, h: u32) -> Vec<Frame> {
    (0..n).map(|i| Frame::from_pixel(w, h, Rgb([(i * 20) as u8, 60, 90]))).collect()
}

#[test]
fn output_keeps_frame_count_resolution_and_rate() {
    let input = MemoryInput { frames: frames(9, 80, 60), fps: 12.5 };
    let output = Recorded::default();
    let annotator = Annotator::default();
    let mut detector = Alternating { calls: 0 };

    let mut seen = Vec::new();
    let report = PipelineDriver::new(&annotator)
        .run(&input, &mut detector, &output, |p, _| seen.push(p.frames_processed))
        .unwrap();

    assert_eq!(seen, (1..=9).collect::<Vec<u64>>());
    let info = output.info.lock().unwrap().clone().unwrap();
    assert_eq!((info.width, info.height, info.fps), (80, 60, 12.5));
    let written = output.frames.lock().unwrap();
    assert_eq!(written.len(), 9);
    assert!(written.iter().all(|f| f.dimensions() == (80, 60)));

    assert_eq!(report.tally.get("person"), 9);
    assert_eq!(report.tally.get("dog"), 4);
    assert_eq!(report.tally.summary(), "9 person, 4 dog");
}

#[test]
fn live_and_batch_tallies_agree() {
    let annotator = Annotator::default();
    let mut per_frame = Vec::new();
    let report = PipelineDriver::new(&annotator)
        .run(
            &MemoryInput { frames: frames(6, 64, 48), fps: 30.0 },
            &mut Alternating { calls: 0 },
            &Recorded::default(),
            |_, dets| {
                let mut t = DetectionTally::new();
                t.update(dets);
                per_frame.push(t);
            },
        )
        .unwrap();

    let mut forward = DetectionTally::new();
    per_frame.iter().for_each(|t| forward.merge(t));
    let mut backward = DetectionTally::new();
    per_frame.iter().rev().for_each(|t| backward.merge(t));

    assert_eq!(forward, report.tally);
    assert_eq!(backward, report.tally);
    assert_eq!(report.tally.total(), 9);
}

#[test]
fn video_file_round_trip() {
    if which::which("ffmpeg").is_err() || which::which("ffprobe").is_err() {
        eprintln!("ffmpeg not installed, skipping");
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let input_path = dir.path().join("input.mp4");
    let output_path = dir.path().join("output.mp4");

    let info = StreamInfo { width: 96, height: 64, fps: 10.0, frames_total: None };
    let mut sink: Box<dyn FrameSink> = Box::new(FfmpegVideoSink::create(&input_path, &info, "mpeg4").unwrap());
    for frame in frames(7, 96, 64) {
        sink.write(&frame).unwrap();
    }
    sink.finish().unwrap();

    let annotator = Annotator::default();
    let mut callbacks = 0;
    let report = PipelineDriver::new(&annotator)
        .run(
            &VideoFileInput::new(&input_path),
            &mut Alternating { calls: 0 },
            &VideoFileOutput::new(&output_path, "mpeg4"),
            |_, _| callbacks += 1,
        )
        .unwrap();

    assert_eq!(callbacks, 7);
    assert_eq!(report.frames_processed(), 7);
    match report.artifact {
        Some(OutputArtifact::Video { frames, width, height, .. }) => {
            assert_eq!((frames, width, height), (7, 96, 64));
        }
        other => panic!("unexpected artifact {:?}", other),
    }

    let probed = probe_video(&output_path).unwrap();
    assert_eq!((probed.width, probed.height), (96, 64));
    assert!((probed.fps - 10.0).abs() < 0.01);
    assert_eq!(probed.frames_total, Some(7));
}
