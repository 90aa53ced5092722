//! docvault CLI - Command-line interface for MongoDB collection backups.
//!
//! This crate provides the `docvault` binary: listing collections, backing
//! them up into run directories, and restoring them from those directories.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod logging;
pub mod output;
