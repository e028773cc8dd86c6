pub mod broadcast;
pub mod ffmpeg;
pub mod probe;
pub mod still;
