//! Object detection over images, video files and cameras.
//!
//! A [`application::pipeline::PipelineDriver`] pulls frames from a source,
//! runs an injected detector on each, draws the results, counts them per
//! label and pushes the annotated frames to a sink.

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
