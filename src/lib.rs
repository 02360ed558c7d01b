//! jarvis-ocr-service
//!
//! Background OCR service: consumes image-extraction jobs from a Redis
//! queue, runs each image through a tiered cascade of OCR engines, gates
//! every candidate through an asynchronous LLM validity check, and emits a
//! completion event on the caller's reply queue.

pub mod app_state;
pub mod config;
pub mod models;
pub mod pipeline;
pub mod providers;
pub mod routes;
pub mod services;
pub mod worker;
