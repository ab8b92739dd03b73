//! Scriptable SMTP server standing in for a remote mail exchanger.
//!
//! Every reply can be overridden through the builder, commands are recorded
//! in the order they arrive, and the server can be told to stall or drop the
//! connection at a given point.
//!
//! ```rust,ignore
//! let server = MockSmtpServer::builder()
//!     .with_rcpt_to_response(550, "User unknown")
//!     .build()
//!     .await?;
//!
//! // point a delivery at server.addr() ...
//!
//! assert_eq!(server.connections(), 1);
//! server.shutdown();
//! ```

#![allow(dead_code)]

use std::{
    fmt::Write,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::RwLock,
    time::timeout,
};

/// A command (or message body) received by the mock server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmtpCommand {
    Ehlo(String),
    Helo(String),
    /// Everything after `MAIL FROM:`, parameters included
    MailFrom(String),
    /// Everything after `RCPT TO:`
    RcptTo(String),
    Data,
    /// The message body, with dot-stuffing removed and without the
    /// terminating `.` line
    MessageContent(Vec<u8>),
    Quit,
    StartTls,
    Other(String),
}

#[derive(Debug, Clone)]
pub struct SmtpResponse {
    pub code: u16,
    pub message: String,
}

impl SmtpResponse {
    fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    fn to_bytes(&self) -> Vec<u8> {
        format!("{} {}\r\n", self.code, self.message).into_bytes()
    }
}

#[derive(Clone)]
struct EhloResponse {
    code: u16,
    capabilities: Vec<String>,
}

impl EhloResponse {
    fn to_bytes(&self) -> Vec<u8> {
        let mut response = String::new();
        let last = self.capabilities.len().saturating_sub(1);

        for (i, capability) in self.capabilities.iter().enumerate() {
            let separator = if i == last { ' ' } else { '-' };
            let _ = write!(response, "{}{separator}{capability}\r\n", self.code);
        }

        response.into_bytes()
    }
}

#[derive(Clone)]
struct MockServerConfig {
    greeting: SmtpResponse,
    /// `None` refuses `EHLO` so the client has to fall back to `HELO`
    ehlo_response: Option<EhloResponse>,
    helo_response: SmtpResponse,
    mail_from_response: SmtpResponse,
    rcpt_to_response: SmtpResponse,
    data_response: SmtpResponse,
    data_end_response: SmtpResponse,
    quit_response: SmtpResponse,
    starttls_response: SmtpResponse,

    greeting_delay: Option<Duration>,
    drop_after_commands: Option<usize>,
    stall_on_command: Option<usize>,
}

impl Default for MockServerConfig {
    fn default() -> Self {
        Self {
            greeting: SmtpResponse::new(220, "mock.example ESMTP ready"),
            ehlo_response: Some(EhloResponse {
                code: 250,
                capabilities: vec!["mock.example".to_string(), "SIZE 10000".to_string()],
            }),
            helo_response: SmtpResponse::new(250, "mock.example"),
            mail_from_response: SmtpResponse::new(250, "OK"),
            rcpt_to_response: SmtpResponse::new(250, "OK"),
            data_response: SmtpResponse::new(354, "Start mail input; end with <CRLF>.<CRLF>"),
            data_end_response: SmtpResponse::new(250, "OK: Message accepted"),
            quit_response: SmtpResponse::new(221, "Bye"),
            starttls_response: SmtpResponse::new(502, "Command not implemented"),
            greeting_delay: None,
            drop_after_commands: None,
            stall_on_command: None,
        }
    }
}

pub struct MockSmtpServer {
    addr: SocketAddr,
    commands: Arc<RwLock<Vec<SmtpCommand>>>,
    connections: Arc<AtomicUsize>,
    shutdown: Arc<AtomicBool>,
}

impl MockSmtpServer {
    #[must_use]
    pub fn builder() -> MockSmtpServerBuilder {
        MockSmtpServerBuilder {
            config: MockServerConfig::default(),
            bind: SocketAddr::from(([127, 0, 0, 1], 0)),
        }
    }

    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Every command received so far, across all connections.
    pub async fn commands(&self) -> Vec<SmtpCommand> {
        self.commands.read().await.clone()
    }

    /// The message bodies received so far.
    pub async fn messages(&self) -> Vec<Vec<u8>> {
        self.commands()
            .await
            .into_iter()
            .filter_map(|command| match command {
                SmtpCommand::MessageContent(body) => Some(body),
                _ => None,
            })
            .collect()
    }

    /// Number of accepted connections.
    #[must_use]
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    async fn handle_client(
        stream: TcpStream,
        config: Arc<MockServerConfig>,
        commands: Arc<RwLock<Vec<SmtpCommand>>>,
    ) -> std::io::Result<()> {
        if let Some(delay) = config.greeting_delay {
            tokio::time::sleep(delay).await;
        }

        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);
        let mut line = Vec::new();
        let mut handled = 0;

        writer.write_all(&config.greeting.to_bytes()).await?;
        writer.flush().await?;

        loop {
            if config.drop_after_commands.is_some_and(|limit| handled >= limit) {
                return Ok(());
            }

            line.clear();
            let read = timeout(Duration::from_secs(10), reader.read_until(b'\n', &mut line)).await;
            match read {
                Ok(Ok(0)) | Err(_) => return Ok(()),
                Ok(Err(err)) => return Err(err),
                Ok(Ok(_)) => {}
            }

            if config.stall_on_command == Some(handled) {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                return Ok(());
            }
            handled += 1;

            let text = String::from_utf8_lossy(&line).trim_end().to_string();
            let (verb, argument) = text.split_once(' ').unwrap_or((text.as_str(), ""));
            let argument = argument.trim().to_string();

            let (command, response) = match verb.to_ascii_uppercase().as_str() {
                "EHLO" => (
                    SmtpCommand::Ehlo(argument),
                    config.ehlo_response.as_ref().map_or_else(
                        || SmtpResponse::new(502, "Command not implemented").to_bytes(),
                        EhloResponse::to_bytes,
                    ),
                ),
                "HELO" => (SmtpCommand::Helo(argument), config.helo_response.to_bytes()),
                "MAIL" => (
                    SmtpCommand::MailFrom(strip_prefix(&argument, "FROM:")),
                    config.mail_from_response.to_bytes(),
                ),
                "RCPT" => (
                    SmtpCommand::RcptTo(strip_prefix(&argument, "TO:")),
                    config.rcpt_to_response.to_bytes(),
                ),
                "DATA" => (SmtpCommand::Data, config.data_response.to_bytes()),
                "STARTTLS" => (SmtpCommand::StartTls, config.starttls_response.to_bytes()),
                "QUIT" => (SmtpCommand::Quit, config.quit_response.to_bytes()),
                _ => (
                    SmtpCommand::Other(text.clone()),
                    SmtpResponse::new(500, "Unknown command").to_bytes(),
                ),
            };

            let quit = command == SmtpCommand::Quit;
            let data = command == SmtpCommand::Data && config.data_response.code == 354;
            commands.write().await.push(command);

            writer.write_all(&response).await?;
            writer.flush().await?;

            if quit {
                return Ok(());
            }

            if data {
                let body = read_body(&mut reader).await?;
                commands.write().await.push(SmtpCommand::MessageContent(body));

                writer.write_all(&config.data_end_response.to_bytes()).await?;
                writer.flush().await?;
            }
        }
    }
}

fn strip_prefix(argument: &str, prefix: &str) -> String {
    argument
        .get(..prefix.len())
        .filter(|head| head.eq_ignore_ascii_case(prefix))
        .map_or(argument, |_| &argument[prefix.len()..])
        .to_string()
}

/// Reads a message body up to the lone `.` line, undoing dot-stuffing.
async fn read_body<R>(reader: &mut R) -> std::io::Result<Vec<u8>>
where
    R: AsyncBufReadExt + Unpin,
{
    let mut body = Vec::new();
    let mut line = Vec::new();

    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line).await? == 0 {
            return Ok(body);
        }

        if line == b".\r\n" {
            return Ok(body);
        }

        let content = if line.starts_with(b"..") {
            &line[1..]
        } else {
            &line[..]
        };
        body.extend_from_slice(content);
    }
}

pub struct MockSmtpServerBuilder {
    config: MockServerConfig,
    bind: SocketAddr,
}

impl MockSmtpServerBuilder {
    #[must_use]
    pub fn with_greeting(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.greeting = SmtpResponse::new(code, message);
        self
    }

    /// Sets the `EHLO` reply. The first capability is the greeting line.
    #[must_use]
    pub fn with_ehlo_response(mut self, code: u16, capabilities: &[&str]) -> Self {
        self.config.ehlo_response = Some(EhloResponse {
            code,
            capabilities: capabilities.iter().map(ToString::to_string).collect(),
        });
        self
    }

    /// Answers `EHLO` with `502`, forcing a `HELO` fallback.
    #[must_use]
    pub fn without_ehlo(mut self) -> Self {
        self.config.ehlo_response = None;
        self
    }

    #[must_use]
    pub fn with_helo_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.helo_response = SmtpResponse::new(code, message);
        self
    }

    #[must_use]
    pub fn with_mail_from_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.mail_from_response = SmtpResponse::new(code, message);
        self
    }

    #[must_use]
    pub fn with_rcpt_to_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.rcpt_to_response = SmtpResponse::new(code, message);
        self
    }

    #[must_use]
    pub fn with_data_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.data_response = SmtpResponse::new(code, message);
        self
    }

    /// Sets the reply sent after the end-of-data marker.
    #[must_use]
    pub fn with_data_end_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.data_end_response = SmtpResponse::new(code, message);
        self
    }

    #[must_use]
    pub fn with_quit_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.quit_response = SmtpResponse::new(code, message);
        self
    }

    /// Sets the reply to `STARTTLS`. The mock can't perform a handshake, so
    /// only refusals make sense here.
    #[must_use]
    pub fn with_starttls_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.starttls_response = SmtpResponse::new(code, message);
        self
    }

    /// Waits this long after accepting before sending the banner.
    #[must_use]
    pub const fn with_greeting_delay(mut self, delay: Duration) -> Self {
        self.config.greeting_delay = Some(delay);
        self
    }

    /// Closes the connection once this many commands have been answered.
    #[must_use]
    pub const fn with_network_error_after_commands(mut self, count: usize) -> Self {
        self.config.drop_after_commands = Some(count);
        self
    }

    /// Never answers the command with this (0-based) index.
    #[must_use]
    pub const fn with_stall_on_command(mut self, index: usize) -> Self {
        self.config.stall_on_command = Some(index);
        self
    }

    /// Listens on `addr` instead of an ephemeral loopback port.
    #[must_use]
    pub const fn bind_to(mut self, addr: SocketAddr) -> Self {
        self.bind = addr;
        self
    }

    /// Binds the listener and starts serving in the background.
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails to bind.
    pub async fn build(self) -> std::io::Result<MockSmtpServer> {
        let listener = TcpListener::bind(self.bind).await?;
        let addr = listener.local_addr()?;

        let config = Arc::new(self.config);
        let commands = Arc::new(RwLock::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));
        let shutdown = Arc::new(AtomicBool::new(false));

        {
            let commands = Arc::clone(&commands);
            let connections = Arc::clone(&connections);
            let shutdown = Arc::clone(&shutdown);

            tokio::spawn(async move {
                while !shutdown.load(Ordering::SeqCst) {
                    let Ok(Ok((stream, _peer))) =
                        timeout(Duration::from_millis(100), listener.accept()).await
                    else {
                        continue;
                    };

                    connections.fetch_add(1, Ordering::SeqCst);
                    let config = Arc::clone(&config);
                    let commands = Arc::clone(&commands);
                    tokio::spawn(async move {
                        let _ = MockSmtpServer::handle_client(stream, config, commands).await;
                    });
                }
            });
        }

        Ok(MockSmtpServer {
            addr,
            commands,
            connections,
            shutdown,
        })
    }
}
