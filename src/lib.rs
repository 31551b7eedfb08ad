//! Polls the civil alert feed and persists every notification three ways:
//! verbatim, classified, and as a gazetteer of the places it names.

pub mod config;
pub mod db;
pub mod feed;
pub mod geo;
pub mod models;
pub mod processor;
