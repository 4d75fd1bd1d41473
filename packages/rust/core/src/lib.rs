//! Core pipeline orchestration for overdrive2opus.
//!
//! This crate ties together folder metadata, chapter selection, command
//! construction, and the ffmpeg/opusenc process pipeline into the end-to-end
//! `encode` workflow.

pub mod chapters;
pub mod command;
pub mod pipeline;
pub mod transcode;
