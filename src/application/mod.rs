pub mod annotator;
pub mod dto;
pub mod font;
pub mod jobs;
pub mod pipeline;
pub mod ports;
pub mod services;
