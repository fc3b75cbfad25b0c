//! Loops audience-provider adapter.

pub mod client;
pub mod models;

pub use client::LoopsClient;
