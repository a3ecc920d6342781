use crate::proc::{Proc, ProcError, StdioMode};
use std::future::Future;
use tokio::io::AsyncWriteExt;
use tokio::process::ChildStdin;

/// Attaches a stdin-writing observer to a not-yet-started process.
fn attach<F, Fut>(proc: Proc, writer: F) -> Result<Proc, ProcError>
where
	F: FnOnce(ChildStdin) -> Fut + Send + 'static,
	Fut: Future<Output = Result<(), ProcError>> + Send + 'static,
{
	if proc.is_started() {
		return Err(ProcError::AlreadyStarted);
	}
	Ok(proc.with_stdin(StdioMode::Capture).observe(move |handle| async move {
		let stdin = handle.take_stdin()?;
		writer(stdin).await
	}))
}

/// Feeds a process's stdin from an in-memory sequence of strings.
///
/// Elements are written verbatim, so they must carry their own separators.
/// The stream is shut down after the last element.
pub struct Feed {
	items: Vec<String>,
}

impl Feed {
	pub fn new<I, S>(items: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		Self { items: items.into_iter().map(Into::into).collect() }
	}

	/// Forces `proc`'s stdin into captured mode and registers the writer
	/// observer. Fails if `proc` has already started.
	pub fn pipe_to(self, proc: Proc) -> Result<Proc, ProcError> {
		let items = self.items;
		attach(proc, move |mut stdin| async move {
			for item in items {
				stdin.write_all(item.as_bytes()).await.map_err(ProcError::Io)?;
			}
			stdin.shutdown().await.map_err(ProcError::Io)?;
			Ok(())
		})
	}
}

/// Feeds a batch of shell commands to a process's stdin.
///
/// Each element is wrapped as `(element) && ` so the commands run with
/// short-circuit sequencing, followed by a trailing `true` so the shell
/// always sees a complete command chain, even for an empty batch.
pub struct Commands {
	items: Vec<String>,
}

impl Commands {
	pub fn new<I, S>(items: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		Self { items: items.into_iter().map(Into::into).collect() }
	}

	/// Forces `proc`'s stdin into captured mode and registers the writer
	/// observer. Fails if `proc` has already started.
	pub fn pipe_to(self, proc: Proc) -> Result<Proc, ProcError> {
		let items = self.items;
		attach(proc, move |mut stdin| async move {
			for item in items {
				let guarded = format!("({item}) && ");
				stdin.write_all(guarded.as_bytes()).await.map_err(ProcError::Io)?;
			}
			stdin.write_all(b"true").await.map_err(ProcError::Io)?;
			stdin.shutdown().await.map_err(ProcError::Io)?;
			Ok(())
		})
	}
}
