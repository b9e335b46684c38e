//! Change-feed watcher: turns delivery inserts published by Postgres into
//! trigger invocations.

pub mod feed;
