//! mediahubd — backend daemon for the media-library dashboard.
//!
//! Keeps a rolling in-memory log ledger, lists directories, edits the
//! `KEY=VALUE` settings file, and drives one interactive media-organizing
//! worker process whose output is streamed to browsers over SSE.

pub mod api;
pub mod broker;
pub mod config;
pub mod ledger;
pub mod session;
pub mod settings;
pub mod walker;
pub mod worker;
