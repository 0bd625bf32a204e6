//! Integration tests for the unitary framework

mod test_utils;

mod async_processor;
mod config_integration;
mod parallel_flush;
mod processor_cascade;
mod scope_lifecycle;
