pub mod http;
pub mod media;
pub mod onnx;
#[cfg(feature = "v4l2")]
pub mod v4l2;
