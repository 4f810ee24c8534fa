//! Object detection demo on clicked images and live webcam streams.
pub mod capture;
pub mod config;
pub mod context;
pub mod detector;
pub mod endpoints;
pub mod error;
pub mod image_pipeline;
pub mod meter;
pub mod nn;
pub mod overlay;
pub mod page;
pub mod sensors;
pub mod surface;
pub mod utils;
