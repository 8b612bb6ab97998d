//! Telemetry agent for Puma-style control servers.
//!
//! A [`scheduler::Scheduler`] polls a [`source::SampleSource`] on the collect
//! cadence, turns each snapshot into a [`normalize::SampleBatch`], and folds
//! it into a [`storage::WindowStore`]. On the flush cadence it extracts the
//! completed windows and hands them to an [`export::Publish`] backend.

pub mod config;
pub mod export;
pub mod normalize;
pub mod scheduler;
pub mod source;
pub mod storage;
