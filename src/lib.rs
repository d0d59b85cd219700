//! Restreamer
//!
//! Schedules stored videos onto RTMP ingest endpoints and supervises the
//! ffmpeg processes that carry them. A reconciliation loop drives each
//! stream toward what its schedule says, operators can override it over
//! HTTP, and a destination guard keeps any stream key to a single live
//! broadcast.

pub mod config;
pub mod database;
pub mod engine;
pub mod errors;
pub mod guard;
pub mod models;
pub mod notifications;
pub mod repositories;
pub mod schedule;
pub mod scheduler;
pub mod services;
pub mod supervisor;
pub mod web;
