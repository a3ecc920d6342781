//! Compose external processes into pipelines with concurrently scheduled
//! stream observers.
//!
//! ```no_run
//! use weir::{Proc, ProcError};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), ProcError> {
//! 	let mut tail = Proc::new(["seq", "1", "10"]).pipe_cmd(["wc", "-l"])?;
//! 	println!("{}", tail.read().await?);
//! 	weir::wait().await;
//! 	Ok(())
//! }
//! ```

pub mod factory;
pub mod ssh;

pub use factory::{bash, git, pwd, sh, CommandFactory};
pub use ssh::SshFactory;
pub use weir_process::*;
pub use weir_scheduler::{global, wait, Scheduler, TaskFailure, TaskId};
