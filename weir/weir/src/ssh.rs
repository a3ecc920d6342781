use itertools::Itertools;
use weir_process::Proc;

/// Builds [Proc]s that open a password-authenticated SSH session.
///
/// The password travels through the `SSHPASS` environment variable (read by
/// `sshpass -e`) rather than the command line, so it never shows up in the
/// process list. A host-key removal step precedes the connection, since the
/// target host's key may have rotated between sessions.
pub struct SshFactory {
	host: String,
	user: String,
	password: String,
	port: u16,
}

impl SshFactory {
	pub fn new(
		host: impl Into<String>,
		user: impl Into<String>,
		password: impl Into<String>,
	) -> Self {
		Self { host: host.into(), user: user.into(), password: password.into(), port: 22 }
	}

	pub fn with_port(mut self, port: u16) -> Self {
		self.port = port;
		self
	}

	/// Builds the connection process. Nothing is spawned here.
	pub fn proc(&self) -> Proc {
		let cmds = [
			format!("ssh-keygen -R {} >/dev/null 2>&1 || true", self.host),
			format!(
				"sshpass -e ssh -oStrictHostKeyChecking=no '{}@{}' -p {} 'bash;exit $?'",
				self.user, self.host, self.port
			),
		];
		let line = cmds.into_iter().join(";");

		Proc::new(line).with_env("SSHPASS", &self.password)
	}
}
