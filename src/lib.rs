//! 5News - news headlines for kids
//!
//! Pulls headlines from Google News RSS feeds, filters out stories that are
//! not suitable for young readers, and serves them with on-demand
//! explanations, cartoons and read-aloud audio.

pub mod cache;
pub mod cartoon;
pub mod config;
pub mod db;
pub mod error;
pub mod explain;
pub mod fetcher;
pub mod filter;
pub mod retry;
pub mod routes;
pub mod service;
pub mod speech;
