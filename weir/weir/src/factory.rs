use weir_process::{Args, Proc};

/// Builds [Proc]s for a fixed program with optional fixed leading arguments.
pub struct CommandFactory {
	program: String,
	leading: Vec<String>,
}

impl CommandFactory {
	pub fn new(program: impl Into<String>) -> Self {
		Self { program: program.into(), leading: Vec::new() }
	}

	pub fn with_leading<I, S>(mut self, args: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.leading.extend(args.into_iter().map(Into::into));
		self
	}

	/// Builds a process from the fixed prefix plus the caller's argument tail.
	pub fn build<I, S>(&self, tail: I) -> Proc
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		let mut argv = Vec::with_capacity(1 + self.leading.len());
		argv.push(self.program.clone());
		argv.extend(self.leading.iter().cloned());
		argv.extend(tail.into_iter().map(Into::into));
		Proc::new(Args::Exec(argv))
	}
}

pub fn sh<I, S>(args: I) -> Proc
where
	I: IntoIterator<Item = S>,
	S: Into<String>,
{
	CommandFactory::new("sh").build(args)
}

pub fn bash<I, S>(args: I) -> Proc
where
	I: IntoIterator<Item = S>,
	S: Into<String>,
{
	CommandFactory::new("bash").build(args)
}

pub fn git<I, S>(args: I) -> Proc
where
	I: IntoIterator<Item = S>,
	S: Into<String>,
{
	CommandFactory::new("git").build(args)
}

pub fn pwd() -> Proc {
	CommandFactory::new("pwd").build(Vec::<String>::new())
}
