use crate::error::{MailError, Result};
use crate::smtp::auth::{self, AuthMechanism, LOGIN_PASSWORD_PROMPT, LOGIN_USERNAME_PROMPT};
use crate::smtp::commands::SmtpCommand;
use crate::smtp::session::SmtpSession;
use std::time::Duration;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Maximum line length in SMTP protocol (RFC 5321)
const MAX_LINE_LENGTH: usize = 1000;

/// Timeout for reading a command line
const COMMAND_TIMEOUT: Duration = Duration::from_secs(300); // 5 minutes

/// Maximum number of errors before disconnecting
const MAX_ERRORS: usize = 10;

/// One command line read with a length cap
#[derive(Debug, PartialEq, Eq)]
enum BoundedLine {
    Eof,
    /// Longer than the cap; the rest of the line was discarded
    TooLong,
    Line(String),
}

/// Drives an [`SmtpSession`] from an SMTP command stream.
pub struct SmtpConnection {
    session: SmtpSession,
    hostname: String,
    max_message_size: usize,
    credentials: Option<(String, String)>,
    greeted: bool,
    authenticated_user: Option<String>,
    error_count: usize,
}

impl SmtpConnection {
    pub fn new(
        session: SmtpSession,
        hostname: impl Into<String>,
        max_message_size: usize,
        credentials: Option<(String, String)>,
    ) -> Self {
        Self {
            session,
            hostname: hostname.into(),
            max_message_size,
            credentials,
            greeted: false,
            authenticated_user: None,
            error_count: 0,
        }
    }

    /// Run the conversation until QUIT, disconnect or too many errors.
    pub async fn handle<S>(mut self, stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut stream = BufReader::new(stream);
        stream
            .write_all(format!("220 {} ESMTP devmail ready\r\n", self.hostname).as_bytes())
            .await?;

        loop {
            if self.error_count >= MAX_ERRORS {
                warn!("Too many errors, disconnecting");
                stream
                    .write_all(b"421 Too many errors, closing connection\r\n")
                    .await?;
                return Ok(());
            }

            let read = timeout(COMMAND_TIMEOUT, read_line_bounded(&mut stream, MAX_LINE_LENGTH));
            let line = match read.await {
                Ok(read) => read?,
                Err(_) => {
                    warn!("Command timeout, disconnecting");
                    stream
                        .write_all(b"421 Timeout, closing connection\r\n")
                        .await?;
                    return Ok(());
                }
            };

            let line = match line {
                BoundedLine::Line(line) => line,
                BoundedLine::Eof => {
                    debug!("Client disconnected");
                    self.session.logout();
                    return Ok(());
                }
                BoundedLine::TooLong => {
                    error!("Line longer than {} bytes", MAX_LINE_LENGTH);
                    stream.write_all(b"500 Line too long\r\n").await?;
                    self.error_count += 1;
                    continue;
                }
            };

            let command = match SmtpCommand::parse(line.trim_end()) {
                Ok(command) => command,
                Err(e) => {
                    debug!("Command parse error: {}", e);
                    stream
                        .write_all(b"501 Syntax error in parameters or arguments\r\n")
                        .await?;
                    self.error_count += 1;
                    continue;
                }
            };

            match command {
                SmtpCommand::Quit => {
                    self.session.logout();
                    stream
                        .write_all(format!("221 {} closing connection\r\n", self.hostname).as_bytes())
                        .await?;
                    return Ok(());
                }
                SmtpCommand::Auth(mechanism, initial) => {
                    self.handle_auth(&mechanism, initial, &mut stream).await?;
                }
                SmtpCommand::Data => self.handle_data(&mut stream).await?,
                command => {
                    let reply = self.handle_command(command);
                    stream.write_all(reply.as_bytes()).await?;
                }
            }
        }
    }

    fn handle_command(&mut self, command: SmtpCommand) -> String {
        match command {
            SmtpCommand::Helo(domain) => {
                info!("HELO from {}", domain);
                self.greet(&domain);
                format!("250 {} Hello {}\r\n", self.hostname, domain)
            }
            SmtpCommand::Ehlo(domain) => {
                info!("EHLO from {}", domain);
                self.greet(&domain);
                format!(
                    "250-{} Hello {}\r\n250-SIZE {}\r\n250-8BITMIME\r\n250-AUTH PLAIN LOGIN\r\n250 HELP\r\n",
                    self.hostname, domain, self.max_message_size
                )
            }
            SmtpCommand::MailFrom(_) | SmtpCommand::RcptTo(_) if !self.greeted => {
                self.error_count += 1;
                "503 Send HELO/EHLO first\r\n".to_string()
            }
            SmtpCommand::MailFrom(from) => {
                if self.credentials.is_some() && self.authenticated_user.is_none() {
                    warn!("Accepting mail from {} without authentication", from);
                }
                let outcome = self.session.mail(from);
                self.reply_for(outcome)
            }
            SmtpCommand::RcptTo(to) => {
                let outcome = self.session.rcpt(to);
                self.reply_for(outcome)
            }
            SmtpCommand::Rset => {
                self.session.reset();
                "250 OK\r\n".to_string()
            }
            SmtpCommand::Noop => "250 OK\r\n".to_string(),
            SmtpCommand::Unknown(command) => {
                debug!("Unknown command: {}", command);
                self.error_count += 1;
                "502 Command not implemented\r\n".to_string()
            }
            SmtpCommand::Quit | SmtpCommand::Data | SmtpCommand::Auth(..) => {
                "503 Bad sequence of commands\r\n".to_string()
            }
        }
    }

    fn greet(&mut self, domain: &str) {
        self.session.set_helo(domain);
        self.session.reset();
        self.greeted = true;
    }

    /// Map a session outcome to a reply, counting protocol errors.
    fn reply_for(&mut self, outcome: Result<()>) -> String {
        match outcome {
            Ok(()) => "250 OK\r\n".to_string(),
            Err(e) => {
                if matches!(e, MailError::SmtpProtocol(_)) {
                    self.error_count += 1;
                }
                error_reply(&e)
            }
        }
    }

    async fn handle_data<S>(&mut self, stream: &mut BufReader<S>) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        if !self.session.can_receive() {
            self.error_count += 1;
            stream
                .write_all(b"503 Bad sequence of commands\r\n")
                .await?;
            return Ok(());
        }

        stream
            .write_all(b"354 Start mail input; end with <CRLF>.<CRLF>\r\n")
            .await?;

        let reply = match self.session.data(stream).await {
            Ok(email) => format!("250 OK: queued as {}\r\n", email.id),
            Err(MailError::Io(e)) => return Err(e.into()),
            Err(e) => error_reply(&e),
        };

        stream.write_all(reply.as_bytes()).await?;
        Ok(())
    }

    /// AUTH is checked against the configured credentials but never required.
    /// Without configured credentials any login succeeds.
    async fn handle_auth<S>(
        &mut self,
        mechanism: &str,
        initial: Option<String>,
        stream: &mut BufReader<S>,
    ) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        if self.authenticated_user.is_some() {
            stream.write_all(b"503 Already authenticated\r\n").await?;
            return Ok(());
        }

        let Some(mechanism) = AuthMechanism::parse(mechanism) else {
            stream
                .write_all(b"504 Authentication mechanism not supported\r\n")
                .await?;
            return Ok(());
        };

        let decoded = match mechanism {
            AuthMechanism::Plain => {
                let data = match initial {
                    Some(data) => data,
                    None => {
                        stream.write_all(b"334 \r\n").await?;
                        read_auth_line(stream).await?
                    }
                };
                auth::decode_plain(&data)
            }
            AuthMechanism::Login => {
                stream.write_all(LOGIN_USERNAME_PROMPT.as_bytes()).await?;
                let username = read_auth_line(stream).await?;
                stream.write_all(LOGIN_PASSWORD_PROMPT.as_bytes()).await?;
                let password = read_auth_line(stream).await?;
                auth::decode_login(&username)
                    .and_then(|user| auth::decode_login(&password).map(|pass| (user, pass)))
            }
        };

        let (username, password) = match decoded {
            Ok(credentials) => credentials,
            Err(e) => {
                debug!("AUTH {} decode error: {}", mechanism.as_str(), e);
                self.error_count += 1;
                stream
                    .write_all(b"501 Cannot decode AUTH parameter\r\n")
                    .await?;
                return Ok(());
            }
        };

        let accepted = match &self.credentials {
            Some((user, pass)) => *user == username && *pass == password,
            None => true,
        };

        if accepted {
            info!("AUTH {} accepted for {}", mechanism.as_str(), username);
            self.authenticated_user = Some(username);
            stream
                .write_all(b"235 Authentication successful\r\n")
                .await?;
        } else {
            warn!("AUTH {} failed for {}", mechanism.as_str(), username);
            stream.write_all(b"535 Authentication failed\r\n").await?;
        }

        Ok(())
    }
}

async fn read_auth_line<S>(stream: &mut BufReader<S>) -> Result<String>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let line = timeout(COMMAND_TIMEOUT, read_line_bounded(stream, MAX_LINE_LENGTH))
        .await
        .map_err(|_| MailError::SmtpProtocol("AUTH timeout".to_string()))??;
    match line {
        BoundedLine::Line(line) => Ok(line.trim().to_string()),
        BoundedLine::TooLong => Err(MailError::SmtpProtocol("AUTH line too long".to_string())),
        BoundedLine::Eof => Err(MailError::SmtpProtocol(
            "Connection closed during AUTH".to_string(),
        )),
    }
}

/// Read one line of at most `limit` bytes without buffering more than that.
async fn read_line_bounded<R>(reader: &mut R, limit: usize) -> std::io::Result<BoundedLine>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let n = (&mut *reader)
        .take(limit as u64 + 1)
        .read_until(b'\n', &mut buf)
        .await?;
    if n == 0 {
        return Ok(BoundedLine::Eof);
    }

    if buf.len() <= limit {
        return Ok(BoundedLine::Line(String::from_utf8_lossy(&buf).into_owned()));
    }

    if !buf.ends_with(b"\n") {
        loop {
            let available = reader.fill_buf().await?;
            if available.is_empty() {
                break;
            }
            match available.iter().position(|&b| b == b'\n') {
                Some(pos) => {
                    reader.consume(pos + 1);
                    break;
                }
                None => {
                    let len = available.len();
                    reader.consume(len);
                }
            }
        }
    }

    Ok(BoundedLine::TooLong)
}

/// SMTP reply for a failed session operation.
pub fn error_reply(error: &MailError) -> String {
    match error {
        MailError::TooManyRecipients(max) => format!("452 Too many recipients (max {})\r\n", max),
        MailError::MessageTooLarge(max) => {
            format!("552 Message exceeds fixed maximum message size ({} bytes)\r\n", max)
        }
        MailError::Parse(e) => format!("554 Transaction failed: {}\r\n", e),
        MailError::SmtpProtocol(e) if e.starts_with("Timeout") => {
            "451 Timeout during DATA\r\n".to_string()
        }
        MailError::SmtpProtocol(_) => "503 Bad sequence of commands\r\n".to_string(),
        _ => "451 Requested action aborted: local error in processing\r\n".to_string(),
    }
}
