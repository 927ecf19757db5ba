#![allow(dead_code)]

use devmail_rs::config::Config;
use devmail_rs::MailServer;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};

/// Defaults pointed at `mail_dir`, with a fixed hostname.
pub fn test_config(mail_dir: &Path) -> Config {
    let mut config = Config::default();
    config.server.hostname = "test.localhost".to_string();
    config.storage.mail_dir = mail_dir.to_path_buf();
    config
}

/// Start a server on an ephemeral port.
pub async fn start_server(config: Config) -> (Arc<MailServer>, SocketAddr) {
    let server = Arc::new(MailServer::new(config).await.unwrap());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let serving = server.clone();
    tokio::spawn(async move {
        let _ = serving.serve(listener).await;
    });

    (server, addr)
}

/// Minimal line-based SMTP client.
pub struct SmtpClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl SmtpClient {
    /// Connect and consume the greeting.
    pub async fn connect(addr: SocketAddr) -> (Self, String) {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (reader, writer) = stream.into_split();
        let mut client = Self {
            reader: BufReader::new(reader),
            writer,
        };
        let greeting = client.reply().await;
        (client, greeting)
    }

    /// Read a complete, possibly multi-line, reply.
    pub async fn reply(&mut self) -> String {
        let mut reply = String::new();
        loop {
            let mut line = String::new();
            self.reader.read_line(&mut line).await.unwrap();
            let last = line.len() < 4 || line.as_bytes()[3] != b'-';
            reply.push_str(&line);
            if last {
                return reply;
            }
        }
    }

    pub async fn send_line(&mut self, line: &str) {
        self.writer
            .write_all(format!("{}\r\n", line).as_bytes())
            .await
            .unwrap();
    }

    pub async fn cmd(&mut self, line: &str) -> String {
        self.send_line(line).await;
        self.reply().await
    }

    /// Send a message body after a 354 and return the final reply.
    pub async fn data(&mut self, message: &str) -> String {
        let reply = self.cmd("DATA").await;
        assert!(reply.starts_with("354"), "unexpected DATA reply: {}", reply);

        for line in message.lines() {
            if line.starts_with('.') {
                self.send_line(&format!(".{}", line)).await;
            } else {
                self.send_line(line).await;
            }
        }
        self.cmd(".").await
    }

    /// Full EHLO/MAIL/RCPT/DATA transaction. Returns the stored id.
    pub async fn deliver(&mut self, from: &str, to: &[&str], message: &str) -> String {
        assert!(self.cmd("EHLO test.client").await.starts_with("250"));
        assert!(self
            .cmd(&format!("MAIL FROM:<{}>", from))
            .await
            .starts_with("250"));
        for rcpt in to {
            assert!(self
                .cmd(&format!("RCPT TO:<{}>", rcpt))
                .await
                .starts_with("250"));
        }
        let reply = self.data(message).await;
        queued_id(&reply).unwrap_or_else(|| panic!("message not queued: {}", reply))
    }
}

/// Extract the id from `250 OK: queued as <id>`.
pub fn queued_id(reply: &str) -> Option<String> {
    reply
        .trim_end()
        .strip_prefix("250 OK: queued as ")
        .map(str::to_string)
}
