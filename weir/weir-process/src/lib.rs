//! Process pipelines with asynchronously consumed output streams.
//!
//! A [Proc] models one external command with deferred start. Stages are
//! linked with [Proc::pipe_to]; observer callbacks registered on a stage are
//! run as scheduler tasks when it starts.

pub mod feed;
pub mod proc;
pub mod reader;
pub mod state;

pub use feed::{Commands, Feed};
pub use proc::{Args, Observer, Proc, ProcError, ProcHandle, ProcOptions, StdioMode};
pub use reader::Reader;
pub use state::StateCell;
