// src/lib.rs

//! CryCrawler core: distributed crawl coordination, frontier and dedup cache.

pub mod config;
pub mod crawl;
pub mod error;
pub mod frontier;
pub mod models;
pub mod network;
pub mod policy;
pub mod program;
pub mod storage;
pub mod utils;
