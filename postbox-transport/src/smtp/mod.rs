//! Plain SMTP delivery to a single relay
//!
//! [`SmtpTransport`] connects to the configured relay, greets it, and
//! optionally authenticates; the resulting [`SmtpConnection`] then runs one
//! `MAIL FROM` / `RCPT TO` / `DATA` transaction per message. Each stage maps
//! a refusal to its own [`ErrorKind`], so callers can tell a refused
//! recipient from a refused sender.

mod client;
mod error;
pub mod format;
mod response;

use std::{fmt, future::Future, time::Duration};

use async_trait::async_trait;
use postbox_common::Message;
use serde::Deserialize;

pub use self::response::Response;
use self::{client::SmtpClient, error::ClientError};
use crate::{Connection, ErrorKind, Transport, TransportError};

/// Timeout configuration for SMTP operations
///
/// # Example Configuration
///
/// ```ron
/// smtp: (
///     host: "relay.example.com",
///     timeouts: (
///         connect_secs: 30,
///         command_secs: 30,
///         data_secs: 120,
///     ),
/// )
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SmtpTimeouts {
    /// Connecting and reading the greeting
    ///
    /// Default: 30 seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_secs: u64,

    /// Any single command and its reply
    ///
    /// Default: 30 seconds
    #[serde(default = "default_command_timeout")]
    pub command_secs: u64,

    /// Sending the message content and reading the final reply
    ///
    /// Default: 120 seconds
    #[serde(default = "default_data_timeout")]
    pub data_secs: u64,
}

impl Default for SmtpTimeouts {
    fn default() -> Self {
        Self {
            connect_secs: default_connect_timeout(),
            command_secs: default_command_timeout(),
            data_secs: default_data_timeout(),
        }
    }
}

const fn default_connect_timeout() -> u64 {
    30
}

const fn default_command_timeout() -> u64 {
    30
}

const fn default_data_timeout() -> u64 {
    120
}

fn default_host() -> String {
    String::from("localhost")
}

const fn default_port() -> u16 {
    25
}

/// Where and how to relay mail
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct SmtpConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Name we give in EHLO/HELO and in generated Message-IDs
    #[serde(default = "default_host")]
    pub helo_name: String,

    /// Credentials for `AUTH PLAIN`; authentication is skipped without a username
    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default)]
    pub timeouts: SmtpTimeouts,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            helo_name: default_host(),
            username: None,
            password: None,
            timeouts: SmtpTimeouts::default(),
        }
    }
}

impl fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("helo_name", &self.helo_name)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("timeouts", &self.timeouts)
            .finish()
    }
}

impl SmtpConfig {
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Run `operation` under `timeout`, describing a timeout as a socket error
async fn timed<T>(
    timeout: Duration,
    stage: &str,
    operation: impl Future<Output = Result<T, ClientError>> + Send,
) -> crate::Result<T> {
    tokio::time::timeout(timeout, operation)
        .await
        .map_err(|_| TransportError::socket(format!("{stage} timed out after {timeout:?}")))?
        .map_err(TransportError::from)
}

/// Turn a reply into an error of `kind` unless it is the expected class
fn require(response: &Response, accept: fn(&Response) -> bool, kind: ErrorKind) -> crate::Result<()> {
    if accept(response) {
        Ok(())
    } else {
        Err(TransportError::new(kind, response.to_string()))
    }
}

#[derive(Debug, Clone, Default)]
pub struct SmtpTransport {
    config: SmtpConfig,
}

impl SmtpTransport {
    #[must_use]
    pub const fn new(config: SmtpConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub const fn config(&self) -> &SmtpConfig {
        &self.config
    }
}

#[async_trait]
impl Transport for SmtpTransport {
    #[tracing::instrument(level = tracing::Level::DEBUG, skip(self), fields(server = %self.config.address()))]
    async fn open(&self) -> crate::Result<Box<dyn Connection>> {
        let config = &self.config;
        let command = Duration::from_secs(config.timeouts.command_secs);

        let (mut client, greeting) = timed(
            Duration::from_secs(config.timeouts.connect_secs),
            "Connect",
            async {
                let mut client = SmtpClient::connect(&config.address()).await?;
                let greeting = client.read_greeting().await?;
                Ok::<_, ClientError>((client, greeting))
            },
        )
        .await?;

        if !greeting.is_success() {
            return Err(TransportError::socket(format!(
                "Server rejected connection: {greeting}"
            )));
        }

        let ehlo = timed(command, "EHLO", client.ehlo(&config.helo_name)).await?;
        if !ehlo.is_success() {
            tracing::debug!("EHLO refused ({ehlo}), falling back to HELO");
            let helo = timed(command, "HELO", client.helo(&config.helo_name)).await?;
            require(&helo, Response::is_success, ErrorKind::Protocol)?;
        }

        if let Some(username) = &config.username {
            let password = config.password.as_deref().unwrap_or_default();
            let auth = timed(command, "AUTH", client.auth_plain(username, password)).await?;
            require(&auth, Response::is_success, ErrorKind::Authentication)?;
        }

        tracing::debug!("Connected");

        Ok(Box::new(SmtpConnection {
            client: Some(client),
            helo_name: config.helo_name.clone(),
            timeouts: config.timeouts.clone(),
        }))
    }
}

/// An open, greeted SMTP session
#[derive(Debug)]
pub struct SmtpConnection {
    /// `None` once closed, or once a socket error has made the session unusable
    client: Option<SmtpClient>,
    helo_name: String,
    timeouts: SmtpTimeouts,
}

impl SmtpConnection {
    async fn transaction(
        client: &mut SmtpClient,
        timeouts: &SmtpTimeouts,
        from: &str,
        to: &str,
        content: &str,
    ) -> crate::Result<()> {
        let command = Duration::from_secs(timeouts.command_secs);

        let reply = timed(command, "MAIL FROM", client.mail_from(from)).await?;
        require(&reply, Response::is_success, ErrorKind::SenderRefused)?;

        let reply = timed(command, "RCPT TO", client.rcpt_to(to)).await?;
        require(&reply, Response::is_success, ErrorKind::RecipientRefused)?;

        let reply = timed(command, "DATA", client.data()).await?;
        require(&reply, Response::is_intermediate, ErrorKind::DataRejected)?;

        let reply = timed(
            Duration::from_secs(timeouts.data_secs),
            "Message data",
            client.send_data(content),
        )
        .await?;
        require(&reply, Response::is_success, ErrorKind::DataRejected)
    }
}

#[async_trait]
impl Connection for SmtpConnection {
    async fn send(&mut self, message: &Message) -> crate::Result<()> {
        let from = format::envelope_address(&message.from_address)?;
        let to = format::envelope_address(&message.to_address)?;
        let content = format::render(message, &self.helo_name);

        let client = self
            .client
            .as_mut()
            .ok_or_else(|| TransportError::socket("Connection is no longer usable"))?;

        let result = Self::transaction(client, &self.timeouts, &from, &to, &content).await;

        match &result {
            Err(err) if err.kind() == ErrorKind::Socket => {
                self.client = None;
            }
            Err(_) => {
                // Leave the session ready for the next message
                let command = Duration::from_secs(self.timeouts.command_secs);
                if let Err(err) = timed(command, "RSET", client.rset()).await {
                    tracing::warn!("RSET failed, dropping connection: {err}");
                    self.client = None;
                }
            }
            Ok(()) => {}
        }

        result
    }

    fn is_usable(&self) -> bool {
        self.client.is_some()
    }

    async fn close(&mut self) -> crate::Result<()> {
        let Some(mut client) = self.client.take() else {
            return Ok(());
        };

        let command = Duration::from_secs(self.timeouts.command_secs);
        timed(command, "QUIT", client.quit()).await.map(|_| ())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_config_defaults() {
        let config: SmtpConfig = ron::from_str("()").unwrap();
        assert_eq!(config, SmtpConfig::default());
        assert_eq!(config.address(), "localhost:25");
        assert_eq!(config.helo_name, "localhost");
        assert_eq!(config.timeouts.data_secs, 120);
    }

    #[test]
    fn test_config_parse() {
        let config: SmtpConfig = ron::from_str(
            r#"(
                host: "relay.example.com",
                port: 587,
                username: Some("mailer"),
                password: Some("hunter2"),
                timeouts: (command_secs: 5),
            )"#,
        )
        .unwrap();

        assert_eq!(config.address(), "relay.example.com:587");
        assert_eq!(config.username.as_deref(), Some("mailer"));
        assert_eq!(config.timeouts.command_secs, 5);
        assert_eq!(config.timeouts.connect_secs, 30);
    }

    #[test]
    fn test_debug_redacts_password() {
        let config = SmtpConfig {
            password: Some("hunter2".to_string()),
            ..SmtpConfig::default()
        };

        assert!(!format!("{config:?}").contains("hunter2"));
    }
}
