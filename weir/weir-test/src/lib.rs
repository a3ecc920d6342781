//! Integration tests for the weir pipeline runtime.
//! Scenarios here span crates: pipelines, feeders, factories, and the
//! scheduler join working together against real OS processes.
