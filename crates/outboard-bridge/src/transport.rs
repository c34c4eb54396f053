//! Command channel transport.
//!
//! Newline-terminated text lines over a Unix socket or a Windows named pipe. The host
//! side wraps a current-thread tokio runtime so callers stay synchronous; the helper side
//! is driven by its own runtime on the channel thread.

use crate::error::{BridgeError, Result};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

#[cfg(unix)]
use tokio::net::{UnixListener, UnixStream};

#[cfg(windows)]
use tokio::net::windows::named_pipe::{ClientOptions, NamedPipeClient, NamedPipeServer, ServerOptions};

/// Filesystem path (Unix) or pipe path (Windows) for a channel name.
pub fn channel_path(name: &str) -> PathBuf {
    #[cfg(unix)]
    let path = std::env::temp_dir().join(format!("{}.sock", name));

    #[cfg(windows)]
    let path = PathBuf::from(format!(r"\\.\pipe\{}", name));

    path
}

/// Outcome of reading one line.
#[derive(Debug, PartialEq, Eq)]
pub enum LineRead {
    Line(String),
    /// The line exceeded the limit; the rest of it was discarded.
    TooLong,
    Closed,
}

/// Reads one `\n`-terminated line of at most `max_len` bytes. Trailing `\r\n` is stripped.
pub async fn read_line_limited<R>(reader: &mut R, max_len: usize) -> std::io::Result<LineRead>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let read = (&mut *reader)
        .take(max_len as u64 + 1)
        .read_until(b'\n', &mut buf)
        .await?;

    if read == 0 {
        return Ok(LineRead::Closed);
    }

    if buf.last() != Some(&b'\n') {
        if buf.len() <= max_len {
            // EOF in the middle of a line
            return Ok(LineRead::Closed);
        }
        drain_line(reader).await?;
        return Ok(LineRead::TooLong);
    }

    buf.pop();
    if buf.last() == Some(&b'\r') {
        buf.pop();
    }
    if buf.len() > max_len {
        return Ok(LineRead::TooLong);
    }

    match String::from_utf8(buf) {
        Ok(line) => Ok(LineRead::Line(line)),
        Err(e) => Ok(LineRead::Line(String::from_utf8_lossy(e.as_bytes()).into_owned())),
    }
}

async fn drain_line<R>(reader: &mut R) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let chunk = reader.fill_buf().await?;
        if chunk.is_empty() {
            return Ok(());
        }
        if let Some(pos) = chunk.iter().position(|&b| b == b'\n') {
            reader.consume(pos + 1);
            return Ok(());
        }
        let len = chunk.len();
        reader.consume(len);
    }
}

/// Buffered line stream over any duplex byte stream.
pub struct LineStream<S> {
    inner: BufReader<S>,
    max_line_len: usize,
}

impl<S> LineStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, max_line_len: usize) -> Self {
        Self {
            inner: BufReader::new(stream),
            max_line_len,
        }
    }

    pub async fn write_line(&mut self, line: &str) -> Result<()> {
        self.inner.write_all(line.as_bytes()).await?;
        self.inner.write_all(b"\n").await?;
        self.inner.flush().await?;
        Ok(())
    }

    pub async fn read_line(&mut self) -> Result<LineRead> {
        Ok(read_line_limited(&mut self.inner, self.max_line_len).await?)
    }
}

/// One connected end of a command channel.
pub enum ChannelStream {
    #[cfg(unix)]
    Unix(LineStream<UnixStream>),
    #[cfg(windows)]
    WindowsClient(LineStream<NamedPipeClient>),
    #[cfg(windows)]
    WindowsServer(LineStream<NamedPipeServer>),
}

impl ChannelStream {
    pub async fn write_line(&mut self, line: &str) -> Result<()> {
        match self {
            #[cfg(unix)]
            Self::Unix(s) => s.write_line(line).await,
            #[cfg(windows)]
            Self::WindowsClient(s) => s.write_line(line).await,
            #[cfg(windows)]
            Self::WindowsServer(s) => s.write_line(line).await,
        }
    }

    pub async fn read_line(&mut self) -> Result<LineRead> {
        match self {
            #[cfg(unix)]
            Self::Unix(s) => s.read_line().await,
            #[cfg(windows)]
            Self::WindowsClient(s) => s.read_line().await,
            #[cfg(windows)]
            Self::WindowsServer(s) => s.read_line().await,
        }
    }

    #[cfg(unix)]
    async fn connect_once(name: &str, max_line_len: usize) -> std::io::Result<Self> {
        let stream = UnixStream::connect(channel_path(name)).await?;
        Ok(Self::Unix(LineStream::new(stream, max_line_len)))
    }

    #[cfg(windows)]
    async fn connect_once(name: &str, max_line_len: usize) -> std::io::Result<Self> {
        let client = ClientOptions::new().open(channel_path(name))?;
        Ok(Self::WindowsClient(LineStream::new(client, max_line_len)))
    }

    /// Connects, retrying only while the helper has not created the endpoint yet.
    pub async fn connect(
        name: &str,
        attempts: u32,
        backoff: Duration,
        max_line_len: usize,
    ) -> Result<Self> {
        let mut last_error = None;

        for attempt in 0..attempts.max(1) {
            match Self::connect_once(name, max_line_len).await {
                Ok(stream) => {
                    tracing::debug!(channel = name, attempt, "command channel connected");
                    return Ok(stream);
                }
                Err(e) if is_not_ready(&e) => {
                    last_error = Some(e);
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => {
                    return Err(BridgeError::ConnectionFailed(format!("{}: {}", name, e)));
                }
            }
        }

        Err(BridgeError::ConnectionFailed(format!(
            "{}: gave up after {} attempts ({})",
            name,
            attempts,
            last_error.map(|e| e.to_string()).unwrap_or_default()
        )))
    }
}

fn is_not_ready(error: &std::io::Error) -> bool {
    matches!(
        error.kind(),
        std::io::ErrorKind::NotFound | std::io::ErrorKind::ConnectionRefused
    )
}

/// Host-side synchronous command channel.
///
/// A request that times out or fails leaves its response unread, so the channel refuses
/// every later request rather than pairing them with stale answers.
pub struct CommandChannel {
    runtime: tokio::runtime::Runtime,
    stream: ChannelStream,
    name: String,
    broken: bool,
}

impl CommandChannel {
    pub fn connect(
        name: &str,
        attempts: u32,
        backoff: Duration,
        max_line_len: usize,
    ) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        let stream = runtime.block_on(ChannelStream::connect(name, attempts, backoff, max_line_len))?;

        Ok(Self {
            runtime,
            stream,
            name: name.to_string(),
            broken: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Writes one line and waits for the single response line.
    pub fn request(&mut self, line: &str, timeout: Duration) -> Result<String> {
        if self.broken {
            return Err(BridgeError::ConnectionFailed(format!(
                "{}: channel out of sync after an earlier failure",
                self.name
            )));
        }

        let result = self.exchange(line, timeout);
        if result.is_err() {
            self.broken = true;
        }
        result
    }

    fn exchange(&mut self, line: &str, timeout: Duration) -> Result<String> {
        let stream = &mut self.stream;
        let exchange = async {
            stream.write_line(line).await?;
            stream.read_line().await
        };

        let read = self
            .runtime
            .block_on(async { tokio::time::timeout(timeout, exchange).await })
            .map_err(|_| BridgeError::Timeout {
                operation: format!("response to '{}'", first_word(line)),
                duration_ms: timeout.as_millis() as u64,
            })??;

        match read {
            LineRead::Line(response) => Ok(response),
            LineRead::TooLong => Err(BridgeError::Protocol("response line too long".to_string())),
            LineRead::Closed => Err(BridgeError::ConnectionFailed(format!(
                "{}: channel closed by helper",
                self.name
            ))),
        }
    }
}

fn first_word(line: &str) -> &str {
    line.split_whitespace().next().unwrap_or("")
}

/// Helper-side listener.
pub struct ChannelListener {
    #[cfg(unix)]
    listener: UnixListener,
    path: PathBuf,
    max_line_len: usize,
    #[cfg(windows)]
    first_instance: bool,
}

impl ChannelListener {
    /// Must be called inside a tokio runtime.
    #[cfg(unix)]
    pub fn bind(name: &str, max_line_len: usize) -> Result<Self> {
        let path = channel_path(name);
        // Remove existing socket if it exists
        let _ = std::fs::remove_file(&path);
        let listener = UnixListener::bind(&path)?;
        Ok(Self {
            listener,
            path,
            max_line_len,
        })
    }

    #[cfg(windows)]
    pub fn bind(name: &str, max_line_len: usize) -> Result<Self> {
        Ok(Self {
            path: channel_path(name),
            max_line_len,
            first_instance: true,
        })
    }

    #[cfg(unix)]
    pub async fn accept(&mut self) -> Result<ChannelStream> {
        let (stream, _) = self.listener.accept().await?;
        Ok(ChannelStream::Unix(LineStream::new(stream, self.max_line_len)))
    }

    /// Creates a pipe instance and waits for a client.
    #[cfg(windows)]
    pub async fn accept(&mut self) -> Result<ChannelStream> {
        let server = ServerOptions::new()
            .first_pipe_instance(self.first_instance)
            .create(&self.path)?;
        self.first_instance = false;

        server.connect().await?;

        Ok(ChannelStream::WindowsServer(LineStream::new(server, self.max_line_len)))
    }
}

impl Drop for ChannelListener {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}
