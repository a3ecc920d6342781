use crate::reader::Reader;
use crate::state::StateCell;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tracing::info;
use weir_scheduler::Scheduler;

#[derive(Debug, Error)]
pub enum ProcError {
	#[error("process already started")]
	AlreadyStarted,

	#[error("process already has an upstream pipe")]
	PipeOccupied,

	#[error("process not started")]
	NotStarted,

	#[error("empty argument vector")]
	EmptyArgs,

	#[error("{0} is not captured or was already taken")]
	StreamUnavailable(&'static str),

	#[error("failed to spawn process: {0}")]
	Spawn(#[source] std::io::Error),

	#[error("stream i/o failed: {0}")]
	Io(#[source] std::io::Error),
}

/// The command specification for a [Proc].
///
/// A single string selects shell interpretation (`sh -c`); an argument
/// vector runs the program directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Args {
	Shell(String),
	Exec(Vec<String>),
}

impl Args {
	fn to_command(&self) -> Result<Command, ProcError> {
		match self {
			Args::Shell(line) => {
				let mut cmd = Command::new("sh");
				cmd.arg("-c").arg(line);
				Ok(cmd)
			}
			Args::Exec(argv) => {
				let (program, rest) = argv.split_first().ok_or(ProcError::EmptyArgs)?;
				let mut cmd = Command::new(program);
				cmd.args(rest);
				Ok(cmd)
			}
		}
	}
}

impl fmt::Display for Args {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Args::Shell(line) => write!(f, "{line}"),
			Args::Exec(argv) => write!(f, "{}", argv.join(" ")),
		}
	}
}

impl From<&str> for Args {
	fn from(line: &str) -> Self {
		Args::Shell(line.to_string())
	}
}

impl From<String> for Args {
	fn from(line: String) -> Self {
		Args::Shell(line)
	}
}

impl From<Vec<String>> for Args {
	fn from(argv: Vec<String>) -> Self {
		Args::Exec(argv)
	}
}

impl From<Vec<&str>> for Args {
	fn from(argv: Vec<&str>) -> Self {
		Args::Exec(argv.into_iter().map(str::to_string).collect())
	}
}

impl<const N: usize> From<[&str; N]> for Args {
	fn from(argv: [&str; N]) -> Self {
		Args::Exec(argv.into_iter().map(str::to_string).collect())
	}
}

/// Redirection mode for one standard stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StdioMode {
	/// Connect the stream to a handle readable/writable by this program.
	#[default]
	Capture,
	/// Inherit the parent's stream.
	Inherit,
	/// Discard the stream.
	Null,
}

impl StdioMode {
	fn to_stdio(self) -> Stdio {
		match self {
			StdioMode::Capture => Stdio::piped(),
			StdioMode::Inherit => Stdio::inherit(),
			StdioMode::Null => Stdio::null(),
		}
	}
}

/// Launch options for a [Proc]. The default captures all three streams.
#[derive(Debug, Clone, Default)]
pub struct ProcOptions {
	pub stdin: StdioMode,
	pub stdout: StdioMode,
	pub stderr: StdioMode,
	pub env: HashMap<String, String>,
	pub cwd: Option<PathBuf>,
}

/// An observer callback, run as one scheduler task against a started process.
pub type Observer = Box<dyn FnOnce(ProcHandle) -> BoxFuture<'static, Result<(), ProcError>> + Send>;

struct HandleInner {
	pid: Option<u32>,
	stdin: Mutex<Option<ChildStdin>>,
	stdout: Mutex<Option<ChildStdout>>,
	stderr: Mutex<Option<ChildStderr>>,
	// Err means the exit observer could not wait on the OS process; it is
	// terminal so waiters are released rather than blocked forever.
	status: StateCell<Result<ExitStatus, Arc<std::io::Error>>>,
}

fn wait_error(e: &std::io::Error) -> ProcError {
	ProcError::Io(std::io::Error::new(e.kind(), e.to_string()))
}

/// A clonable handle to a started process.
///
/// Every observer task receives one. Each captured stream handle can be
/// taken exactly once; the exit status is observable by any number of
/// clones.
#[derive(Clone)]
pub struct ProcHandle {
	inner: Arc<HandleInner>,
}

impl ProcHandle {
	fn new(child: &mut Child) -> Self {
		Self {
			inner: Arc::new(HandleInner {
				pid: child.id(),
				stdin: Mutex::new(child.stdin.take()),
				stdout: Mutex::new(child.stdout.take()),
				stderr: Mutex::new(child.stderr.take()),
				status: StateCell::new(),
			}),
		}
	}

	pub fn pid(&self) -> Option<u32> {
		self.inner.pid
	}

	/// Takes the writable stdin handle. Dropping it closes the stream.
	pub fn take_stdin(&self) -> Result<ChildStdin, ProcError> {
		self.inner
			.stdin
			.lock()
			.expect("stream lock poisoned")
			.take()
			.ok_or(ProcError::StreamUnavailable("stdin"))
	}

	pub fn take_stdout(&self) -> Result<Reader<ChildStdout>, ProcError> {
		self.take_raw_stdout().map(Reader::new).ok_or(ProcError::StreamUnavailable("stdout"))
	}

	pub fn take_stderr(&self) -> Result<Reader<ChildStderr>, ProcError> {
		self.inner
			.stderr
			.lock()
			.expect("stream lock poisoned")
			.take()
			.map(Reader::new)
			.ok_or(ProcError::StreamUnavailable("stderr"))
	}

	pub(crate) fn take_raw_stdout(&self) -> Option<ChildStdout> {
		self.inner.stdout.lock().expect("stream lock poisoned").take()
	}

	/// The exit status, once the process has exited.
	pub fn status(&self) -> Option<ExitStatus> {
		self.inner.status.get().and_then(Result::ok)
	}

	/// Blocks until the process has exited.
	///
	/// Fails only if the exit observer could not wait on the OS process.
	pub async fn wait(&self) -> Result<ExitStatus, ProcError> {
		self.inner.status.wait().await.map_err(|e| wait_error(&e))
	}
}

/// One external command with deferred start.
///
/// A `Proc` is built up with the `with_*` and observer methods, optionally
/// linked to an upstream stage via [Proc::pipe_to], and does no I/O until
/// [Proc::start] (or an operation that implies it) is called. Observers
/// registered after start are never submitted.
pub struct Proc {
	args: Args,
	options: ProcOptions,
	callbacks: Vec<Observer>,
	scheduler: Scheduler,
	pipe_from: Option<Box<Proc>>,
	stdin_pipe: Option<Stdio>,
	handle: Option<ProcHandle>,
}

impl Proc {
	pub fn new(args: impl Into<Args>) -> Self {
		Self::with_options(args, ProcOptions::default())
	}

	pub fn with_options(args: impl Into<Args>, options: ProcOptions) -> Self {
		Self {
			args: args.into(),
			options,
			callbacks: Vec::new(),
			scheduler: weir_scheduler::global().clone(),
			pipe_from: None,
			stdin_pipe: None,
			handle: None,
		}
	}

	pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.options.env.insert(key.into(), value.into());
		self
	}

	pub fn with_envs<I, K, V>(mut self, vars: I) -> Self
	where
		I: IntoIterator<Item = (K, V)>,
		K: Into<String>,
		V: Into<String>,
	{
		self.options.env.extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
		self
	}

	pub fn with_cwd(mut self, cwd: impl AsRef<Path>) -> Self {
		self.options.cwd = Some(cwd.as_ref().to_path_buf());
		self
	}

	pub fn with_stdin(mut self, mode: StdioMode) -> Self {
		self.options.stdin = mode;
		self
	}

	pub fn with_stdout(mut self, mode: StdioMode) -> Self {
		self.options.stdout = mode;
		self
	}

	pub fn with_stderr(mut self, mode: StdioMode) -> Self {
		self.options.stderr = mode;
		self
	}

	pub fn with_scheduler(mut self, scheduler: Scheduler) -> Self {
		self.scheduler = scheduler;
		self
	}

	pub fn args(&self) -> &Args {
		&self.args
	}

	pub fn options(&self) -> &ProcOptions {
		&self.options
	}

	pub fn is_started(&self) -> bool {
		self.handle.is_some()
	}

	/// Borrows the upstream stage, if this process is the target of a pipe.
	pub fn upstream(&self) -> Option<&Proc> {
		self.pipe_from.as_deref()
	}

	/// Returns a handle to the started process.
	pub fn handle(&self) -> Option<ProcHandle> {
		self.handle.clone()
	}

	/// Registers an observer callback, run as one scheduler task at start.
	pub fn observe<F, Fut>(mut self, f: F) -> Self
	where
		F: FnOnce(ProcHandle) -> Fut + Send + 'static,
		Fut: Future<Output = Result<(), ProcError>> + Send + 'static,
	{
		self.callbacks.push(Box::new(move |handle| Box::pin(f(handle))));
		self
	}

	/// Registers an observer that receives a line reader over captured stdout.
	pub fn on_stdout<F, Fut>(self, f: F) -> Self
	where
		F: FnOnce(Reader<ChildStdout>) -> Fut + Send + 'static,
		Fut: Future<Output = Result<(), ProcError>> + Send + 'static,
	{
		self.observe(move |handle| async move {
			let reader = handle.take_stdout()?;
			f(reader).await
		})
	}

	/// Registers an observer that receives a line reader over captured stderr.
	pub fn on_stderr<F, Fut>(self, f: F) -> Self
	where
		F: FnOnce(Reader<ChildStderr>) -> Fut + Send + 'static,
		Fut: Future<Output = Result<(), ProcError>> + Send + 'static,
	{
		self.observe(move |handle| async move {
			let reader = handle.take_stderr()?;
			f(reader).await
		})
	}

	/// Links this process's stdout to `target`'s stdin and returns `target`.
	///
	/// Neither side may have started yet, and `target` may not already have
	/// an upstream. Nothing is started here; the chain is started head-first
	/// when the tail starts. Ownership of the upstream moves into the target,
	/// so only the tail of a chain can be started directly.
	pub fn pipe_to(mut self, mut target: Proc) -> Result<Proc, ProcError> {
		if self.is_started() || target.is_started() {
			return Err(ProcError::AlreadyStarted);
		}
		if target.pipe_from.is_some() {
			return Err(ProcError::PipeOccupied);
		}
		self.options.stdout = StdioMode::Capture;
		target.pipe_from = Some(Box::new(self));
		Ok(target)
	}

	/// Like [Proc::pipe_to], constructing the target from a command spec.
	pub fn pipe_cmd(self, args: impl Into<Args>) -> Result<Proc, ProcError> {
		self.pipe_to(Proc::new(args))
	}

	/// Starts the process, and first any upstream pipeline stages.
	///
	/// Submits every registered observer plus an implicit wait-for-exit
	/// observer to the scheduler. Must be called within a tokio runtime.
	pub fn start(&mut self) -> Result<&mut Self, ProcError> {
		self.start_inner(false)?;
		Ok(self)
	}

	fn start_inner(&mut self, reserve_stdout: bool) -> Result<Option<ChildStdout>, ProcError> {
		if self.handle.is_some() {
			return Err(ProcError::AlreadyStarted);
		}

		// Upstream stages spawn head-first so a stage never reads from a
		// pipe whose writer does not exist yet. Each upstream's stdout is
		// reserved before its observers are submitted, so the wiring cannot
		// lose the handle to a competing stdout observer.
		if let Some(upstream) = self.pipe_from.as_mut() {
			let out = upstream
				.start_inner(true)?
				.ok_or(ProcError::StreamUnavailable("stdout"))?;
			self.stdin_pipe = Some(out.try_into().map_err(ProcError::Io)?);
		}

		self.launch(reserve_stdout)
	}

	fn launch(&mut self, reserve_stdout: bool) -> Result<Option<ChildStdout>, ProcError> {
		let mut cmd = self.args.to_command()?;
		cmd.envs(&self.options.env);
		if let Some(cwd) = &self.options.cwd {
			cmd.current_dir(cwd);
		}
		match self.stdin_pipe.take() {
			Some(wired) => cmd.stdin(wired),
			None => cmd.stdin(self.options.stdin.to_stdio()),
		};
		cmd.stdout(self.options.stdout.to_stdio());
		cmd.stderr(self.options.stderr.to_stdio());

		let mut child = cmd.spawn().map_err(ProcError::Spawn)?;
		info!("spawned process: {} (pid {:?})", self.args, child.id());

		let handle = ProcHandle::new(&mut child);
		self.handle = Some(handle.clone());

		// A pipeline tail consumes this stage's stdout as its stdin; the
		// handle is claimed here, before any observer task can take it.
		let reserved = if reserve_stdout {
			Some(handle.take_raw_stdout().ok_or(ProcError::StreamUnavailable("stdout"))?)
		} else {
			None
		};

		for callback in std::mem::take(&mut self.callbacks) {
			let handle = handle.clone();
			self.scheduler.spawn(async move { callback(handle).await.map_err(Into::into) });
		}

		// Implicit exit observer, submitted after the caller's observers.
		// It holds a live scheduler slot until the OS process exits, so a
		// join cannot return before every started stage has exited.
		let status = handle.inner.status.clone();
		self.scheduler.spawn(async move {
			match child.wait().await {
				Ok(exit) => {
					status.set(Ok(exit));
					Ok(())
				}
				Err(e) => {
					let e = Arc::new(e);
					status.set(Err(e.clone()));
					Err(wait_error(&e).into())
				}
			}
		});

		Ok(reserved)
	}

	fn ensure_started(&mut self) -> Result<ProcHandle, ProcError> {
		if self.handle.is_none() {
			self.start()?;
		}
		self.handle.clone().ok_or(ProcError::NotStarted)
	}

	/// Blocks until the process exits, starting it first if needed.
	pub async fn wait(&mut self) -> Result<ExitStatus, ProcError> {
		let handle = self.ensure_started()?;
		handle.wait().await
	}

	/// The cached exit status. `None` until the process has exited.
	pub fn status(&self) -> Option<ExitStatus> {
		self.handle.as_ref().and_then(ProcHandle::status)
	}

	/// Takes the captured stdout as a reader, starting the process if needed.
	pub fn stdout(&mut self) -> Result<Reader<ChildStdout>, ProcError> {
		self.ensure_started()?.take_stdout()
	}

	/// Takes the captured stderr as a reader, starting the process if needed.
	pub fn stderr(&mut self) -> Result<Reader<ChildStderr>, ProcError> {
		self.ensure_started()?.take_stderr()
	}

	/// Takes the writable stdin handle, starting the process if needed.
	pub fn stdin(&mut self) -> Result<ChildStdin, ProcError> {
		self.ensure_started()?.take_stdin()
	}

	/// Drains captured stdout to a string, starting the process if needed.
	pub async fn read(&mut self) -> Result<String, ProcError> {
		self.stdout()?.read_to_string().await
	}
}

impl fmt::Debug for Proc {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Proc")
			.field("args", &self.args)
			.field("started", &self.handle.is_some())
			.field("upstream", &self.pipe_from)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tokio::io::AsyncWriteExt;

	#[tokio::test]
	async fn test_start_twice_fails() -> Result<(), anyhow::Error> {
		let mut p = Proc::new(["true"]);
		p.start()?;

		assert!(matches!(p.start(), Err(ProcError::AlreadyStarted)));
		Ok(())
	}

	#[tokio::test]
	async fn test_wait_matches_status() -> Result<(), anyhow::Error> {
		let mut p = Proc::new("exit 3");
		let status = p.wait().await?;

		assert_eq!(status.code(), Some(3));
		assert_eq!(p.status().and_then(|s| s.code()), Some(3));
		Ok(())
	}

	#[tokio::test]
	async fn test_status_is_unset_before_exit() -> Result<(), anyhow::Error> {
		let mut p = Proc::new(["sleep", "0.2"]);
		p.start()?;

		assert!(p.status().is_none());
		let status = p.wait().await?;
		assert!(status.success());
		assert!(p.status().is_some());
		Ok(())
	}

	#[tokio::test]
	async fn test_read_captured_stdout() -> Result<(), anyhow::Error> {
		let mut p = Proc::new(vec!["echo", "hello"]);
		assert_eq!(p.read().await?, "hello\n");
		Ok(())
	}

	#[tokio::test]
	async fn test_env_override() -> Result<(), anyhow::Error> {
		let mut p = Proc::new("printf '%s' \"$GREETING\"").with_env("GREETING", "hi");
		assert_eq!(p.read().await?, "hi");
		Ok(())
	}

	#[tokio::test]
	async fn test_working_directory() -> Result<(), anyhow::Error> {
		let dir = tempfile::tempdir()?;
		let expected = dir.path().canonicalize()?;

		let mut p = Proc::new(["pwd"]).with_cwd(dir.path());
		let out = p.read().await?;

		assert_eq!(out.trim_end(), expected.to_string_lossy());
		Ok(())
	}

	#[tokio::test]
	async fn test_spawn_failure_surfaces() {
		let mut p = Proc::new(["weir-no-such-binary"]);
		assert!(matches!(p.start(), Err(ProcError::Spawn(_))));
	}

	#[tokio::test]
	async fn test_empty_argv_is_rejected() {
		let mut p = Proc::new(Vec::<String>::new());
		assert!(matches!(p.start(), Err(ProcError::EmptyArgs)));
	}

	#[tokio::test]
	async fn test_pipe_two_stages() -> Result<(), anyhow::Error> {
		let a = Proc::new(vec!["echo", "hello"]);
		let mut b = a.pipe_to(Proc::new(["cat"]))?;

		assert_eq!(b.read().await?, "hello\n");
		assert!(b.upstream().map(Proc::is_started).unwrap_or(false));
		Ok(())
	}

	#[tokio::test]
	async fn test_pipe_three_stages() -> Result<(), anyhow::Error> {
		let mut tail =
			Proc::new(["seq", "1", "5"]).pipe_cmd(["head", "-3"])?.pipe_cmd(["wc", "-l"])?;

		assert_eq!(tail.read().await?.trim(), "3");
		Ok(())
	}

	#[tokio::test]
	async fn test_pipe_into_occupied_target_fails() -> Result<(), anyhow::Error> {
		let b = Proc::new(["echo", "x"]).pipe_to(Proc::new(["cat"]))?;
		let c = Proc::new(["echo", "y"]);

		assert!(matches!(c.pipe_to(b), Err(ProcError::PipeOccupied)));
		Ok(())
	}

	#[tokio::test]
	async fn test_stdin_writer() -> Result<(), anyhow::Error> {
		let mut p = Proc::new(["cat"]);
		let mut stdin = p.stdin()?;

		stdin.write_all(b"ping\n").await?;
		drop(stdin);

		assert_eq!(p.read().await?, "ping\n");
		Ok(())
	}

	#[tokio::test]
	async fn test_stdout_is_takeable_once() -> Result<(), anyhow::Error> {
		let mut p = Proc::new(["echo", "once"]);
		let _reader = p.stdout()?;

		assert!(matches!(p.stdout(), Err(ProcError::StreamUnavailable("stdout"))));
		Ok(())
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
	async fn test_pipe_wiring_wins_over_upstream_stdout_observer() -> Result<(), anyhow::Error> {
		// The wiring must own the upstream's stdout even while a stdout
		// observer on the upstream is racing for the same handle.
		for _ in 0..50 {
			let scheduler = Scheduler::new();
			let a = Proc::new(["seq", "1", "3"]).with_scheduler(scheduler.clone()).on_stdout(
				|mut reader| async move {
					while reader.next_line().await?.is_some() {}
					Ok(())
				},
			);
			let mut b = a.pipe_to(Proc::new(["cat"]).with_scheduler(scheduler.clone()))?;
			b.start()?;

			assert_eq!(b.read().await?, "1\n2\n3\n");
			scheduler.wait().await;
		}
		Ok(())
	}

	#[tokio::test]
	async fn test_wait_surfaces_exit_observer_failure() -> Result<(), anyhow::Error> {
		let mut child = Command::new("true").spawn()?;
		let handle = ProcHandle::new(&mut child);

		handle.inner.status.set(Err(Arc::new(std::io::Error::other("wait failed"))));

		assert!(matches!(handle.wait().await, Err(ProcError::Io(_))));
		assert!(handle.status().is_none());

		child.wait().await?;
		Ok(())
	}

	#[tokio::test]
	async fn test_line_observer_sees_every_line() -> Result<(), anyhow::Error> {
		let scheduler = Scheduler::new();
		let seen = Arc::new(Mutex::new(Vec::new()));

		let sink = seen.clone();
		let mut p = Proc::new(["seq", "1", "3"]).with_scheduler(scheduler.clone()).on_stdout(
			move |mut reader| async move {
				while let Some(line) = reader.next_line().await? {
					sink.lock().expect("sink lock poisoned").push(line);
				}
				Ok(())
			},
		);
		p.start()?;

		scheduler.wait().await;

		assert_eq!(
			*seen.lock().expect("sink lock poisoned"),
			vec!["1".to_string(), "2".to_string(), "3".to_string()]
		);
		assert_eq!(scheduler.live_tasks(), 0);
		Ok(())
	}
}
