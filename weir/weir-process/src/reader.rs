use crate::ProcError;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio_stream::wrappers::LinesStream;

/// A finite sequence adapter over a captured process stream.
///
/// Reads terminate at end-of-stream. The underlying OS stream position
/// advances as it is consumed, so a drained reader yields nothing further.
pub struct Reader<R> {
	inner: BufReader<R>,
}

impl<R: AsyncRead + Unpin> Reader<R> {
	pub fn new(handle: R) -> Self {
		Self { inner: BufReader::new(handle) }
	}

	/// Reads the next line, without the trailing newline. `None` at end-of-stream.
	pub async fn next_line(&mut self) -> Result<Option<String>, ProcError> {
		let mut line = String::new();
		let n = self.inner.read_line(&mut line).await.map_err(ProcError::Io)?;
		if n == 0 {
			return Ok(None);
		}
		if line.ends_with('\n') {
			line.pop();
			if line.ends_with('\r') {
				line.pop();
			}
		}
		Ok(Some(line))
	}

	/// Reads the next chunk of at most `size` bytes. `None` at end-of-stream.
	pub async fn next_chunk(&mut self, size: usize) -> Result<Option<Vec<u8>>, ProcError> {
		let mut buf = vec![0u8; size];
		let n = self.inner.read(&mut buf).await.map_err(ProcError::Io)?;
		if n == 0 {
			return Ok(None);
		}
		buf.truncate(n);
		Ok(Some(buf))
	}

	/// Consumes the reader into a stream of lines.
	pub fn lines(self) -> LinesStream<BufReader<R>> {
		LinesStream::new(self.inner.lines())
	}

	/// Drains the remainder of the stream into a string.
	pub async fn read_to_string(mut self) -> Result<String, ProcError> {
		let mut out = String::new();
		self.inner.read_to_string(&mut out).await.map_err(ProcError::Io)?;
		Ok(out)
	}
}
