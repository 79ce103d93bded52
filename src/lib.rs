// src/lib.rs

//! Channel Harvester Library
//!
//! Incremental, checkpointed harvesting of public channels into dated JSON
//! partitions, plus bounded object-detection enrichment of the downloaded
//! images.

pub mod error;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod storage;
pub mod utils;
