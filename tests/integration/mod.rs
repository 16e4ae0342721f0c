//! Integration tests for build directory tracking

mod cli_parse;
mod garbage_collection;
mod tracking_lifecycle;
