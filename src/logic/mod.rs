//! Logic Module - Pipeline stages
//!
//! - `archive/` - Tensor files on disk
//! - `model/` - Shadow model inference (checkpoint, CNN, softmax)
//! - `dataset/` - Sample sets, attack data, dedup
//! - `aggregate/` - Combination and stratified split
//! - `pipeline` - Per shadow model loop

pub mod config;
pub mod error;

pub mod aggregate;
pub mod archive;
pub mod dataset;
pub mod model;
pub mod pipeline;
