//! Face detection, age estimation and redaction for photos.
//!
//! A [`worker::Worker`] owns the detection and age models on a dedicated
//! thread. Callers hand it image bytes and get back a [`pipeline::JobResult`]
//! listing every face with its age estimate. Faces picked for redaction are
//! blurred by a [`redaction::Redactor`], which writes a metadata-free JPEG.

pub mod config;
pub mod error;
pub mod export;
pub mod geometry;
pub mod orientation;
pub mod overlay;
pub mod pipeline;
pub mod redaction;
pub mod session;
pub mod shapes;
pub mod worker;

pub use error::{Error, Result};
