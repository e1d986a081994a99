//! Minimal SMTP submission client
//!
//! Speaks EHLO, STARTTLS, AUTH PLAIN, MAIL FROM, RCPT TO, DATA and QUIT over
//! plain TCP, a STARTTLS-upgraded connection or implicit TLS. Credentials
//! are only ever sent over an encrypted connection. Every connect, handshake
//! and command round trip is bounded by the configured timeout.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use chrono::Utc;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, ServerName};
use rustls::{ClientConfig, RootCertStore};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use uuid::Uuid;

use crate::model::{SmtpSecurity, SmtpSettings};
use crate::{Result, UptimeError};

/// Base64 line length inside MIME parts
const BASE64_LINE: usize = 76;

/// Longest UTF-8 chunk per RFC 2047 encoded word
const ENCODED_WORD_BYTES: usize = 45;

/// A file sent along with an email
#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

/// An email ready for submission
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Email {
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
    pub attachments: Vec<Attachment>,
}

impl Email {
    /// RFC 5322 message text with CRLF line endings and dot-stuffing applied
    ///
    /// Header values never carry line breaks: control characters become
    /// spaces and non-ASCII text is sent as RFC 2047 encoded words.
    pub fn to_message(&self, settings: &SmtpSettings) -> String {
        let address = header_text(&settings.from_address);
        let name = header_text(&settings.from_name).replace('"', "'");
        let from = if name.trim().is_empty() {
            format!("<{}>", address)
        } else if name.is_ascii() {
            format!("\"{}\" <{}>", name, address)
        } else {
            format!("{} <{}>", encoded_words(&name), address)
        };
        let to: Vec<String> = self.to.iter().map(|r| header_text(r)).collect();

        let mut message = String::new();
        message.push_str(&format!("From: {}\r\n", from));
        message.push_str(&format!("To: {}\r\n", to.join(", ")));
        message.push_str(&format!(
            "Subject: {}\r\n",
            encoded_words(&header_text(&self.subject))
        ));
        message.push_str(&format!("Date: {}\r\n", Utc::now().to_rfc2822()));
        message.push_str("MIME-Version: 1.0\r\n");

        if self.attachments.is_empty() {
            message.push_str("Content-Type: text/plain; charset=utf-8\r\n\r\n");
            push_text(&mut message, &self.body);
            return message;
        }

        let boundary = format!("uptime-{}", Uuid::new_v4().simple());
        message.push_str(&format!(
            "Content-Type: multipart/mixed; boundary=\"{}\"\r\n\r\n",
            boundary
        ));
        message.push_str(&format!("--{}\r\n", boundary));
        message.push_str("Content-Type: text/plain; charset=utf-8\r\n\r\n");
        push_text(&mut message, &self.body);

        for attachment in &self.attachments {
            let filename = header_text(&attachment.filename).replace('"', "'");
            message.push_str(&format!("--{}\r\n", boundary));
            message.push_str(&format!(
                "Content-Type: {}; name=\"{}\"\r\n",
                header_text(&attachment.content_type),
                filename
            ));
            message.push_str("Content-Transfer-Encoding: base64\r\n");
            message.push_str(&format!(
                "Content-Disposition: attachment; filename=\"{}\"\r\n\r\n",
                filename
            ));
            let encoded = base64::engine::general_purpose::STANDARD.encode(&attachment.data);
            for line in encoded.as_bytes().chunks(BASE64_LINE) {
                message.push_str(&String::from_utf8_lossy(line));
                message.push_str("\r\n");
            }
        }
        message.push_str(&format!("--{}--\r\n", boundary));
        message
    }
}

fn push_text(message: &mut String, text: &str) {
    for line in text.lines() {
        if line.starts_with('.') {
            message.push('.');
        }
        message.push_str(line);
        message.push_str("\r\n");
    }
}

/// Single-line header text
fn header_text(value: &str) -> String {
    value
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect()
}

fn encoded_words(text: &str) -> String {
    if text.is_ascii() {
        return text.to_string();
    }
    let encode = |chunk: &str| {
        format!(
            "=?utf-8?B?{}?=",
            base64::engine::general_purpose::STANDARD.encode(chunk)
        )
    };
    let mut words = Vec::new();
    let mut chunk = String::new();
    for c in text.chars() {
        if chunk.len() + c.len_utf8() > ENCODED_WORD_BYTES {
            words.push(encode(&chunk));
            chunk.clear();
        }
        chunk.push(c);
    }
    if !chunk.is_empty() {
        words.push(encode(&chunk));
    }
    words.join(" ")
}

/// Check a mailbox address before it is used in a header or an SMTP command
pub fn validate_address(address: &str) -> Result<()> {
    let shaped = address
        .split_once('@')
        .is_some_and(|(local, domain)| {
            !local.is_empty() && !domain.is_empty() && !domain.contains('@')
        });
    let clean = !address.chars().any(|c| {
        c.is_control() || c.is_whitespace() || matches!(c, '<' | '>' | ',' | ';' | '"')
    });
    if shaped && clean {
        Ok(())
    } else {
        Err(UptimeError::Validation(format!(
            "invalid email address '{}'",
            address.escape_debug()
        )))
    }
}

/// Trait for delivering email
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, settings: &SmtpSettings, email: &Email) -> Result<()>;
}

/// TLS client configuration trusting the platform roots plus any PEM
/// certificates in `extra_roots`
pub fn tls_config(extra_roots: Option<&Path>) -> Result<Arc<ClientConfig>> {
    let mut roots = RootCertStore::empty();
    let native = rustls_native_certs::load_native_certs();
    for e in &native.errors {
        tracing::debug!("Skipping platform certificate: {}", e);
    }
    let (added, ignored) = roots.add_parsable_certificates(native.certs);
    tracing::debug!(
        "Loaded {} platform root certificate(s), ignored {}",
        added,
        ignored
    );

    if let Some(path) = extra_roots {
        let pem = std::fs::read(path)?;
        let count = add_pem_roots(&mut roots, &pem)
            .map_err(|e| UptimeError::Config(format!("{:?}: {}", path, e)))?;
        tracing::info!("Trusting {} extra SMTP root certificate(s) from {:?}", count, path);
    }
    client_config(roots)
}

fn add_pem_roots(roots: &mut RootCertStore, pem: &[u8]) -> std::result::Result<usize, String> {
    let mut added = 0;
    for cert in CertificateDer::pem_slice_iter(pem) {
        let cert = cert.map_err(|e| format!("unreadable certificate: {}", e))?;
        roots
            .add(cert)
            .map_err(|e| format!("unusable certificate: {}", e))?;
        added += 1;
    }
    if added == 0 {
        return Err("no certificates found".to_string());
    }
    Ok(added)
}

fn client_config(roots: RootCertStore) -> Result<Arc<ClientConfig>> {
    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| UptimeError::Config(format!("TLS setup failed: {}", e)))?
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(Arc::new(config))
}

/// SMTP client over TCP, optionally protected by TLS
#[derive(Debug, Clone)]
pub struct SmtpMailer {
    timeout: Duration,
    helo_name: String,
    tls: Option<Arc<ClientConfig>>,
}

impl SmtpMailer {
    /// Mailer trusting the platform's root certificates
    pub fn new(timeout: Duration) -> Self {
        let tls = match tls_config(None) {
            Ok(config) => Some(config),
            Err(e) => {
                tracing::warn!("SMTP over TLS is unavailable: {}", e);
                None
            }
        };
        Self {
            timeout,
            helo_name: "uptime.localdomain".to_string(),
            tls,
        }
    }

    pub fn with_tls_config(mut self, config: Arc<ClientConfig>) -> Self {
        self.tls = Some(config);
        self
    }

    async fn handshake<IO>(&self, stream: IO, host: &str) -> Result<TlsStream<IO>>
    where
        IO: AsyncRead + AsyncWrite + Unpin,
    {
        let Some(config) = self.tls.clone() else {
            return Err(UptimeError::Smtp("TLS is not available".to_string()));
        };
        let name = ServerName::try_from(host.to_string()).map_err(|e| {
            UptimeError::Smtp(format!("invalid TLS server name '{}': {}", host, e))
        })?;
        tokio::time::timeout(self.timeout, TlsConnector::from(config).connect(name, stream))
            .await
            .map_err(|_| UptimeError::Smtp(format!("TLS handshake with {} timed out", host)))?
            .map_err(|e| UptimeError::Smtp(format!("TLS handshake with {} failed: {}", host, e)))
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, settings: &SmtpSettings, email: &Email) -> Result<()> {
        if settings.host.is_empty() || settings.from_address.is_empty() {
            return Err(UptimeError::Smtp(
                "SMTP host and from_address must be configured".to_string(),
            ));
        }
        if email.to.is_empty() {
            return Err(UptimeError::Smtp("no recipients".to_string()));
        }
        validate_address(&settings.from_address)?;
        for recipient in &email.to {
            validate_address(recipient)?;
        }
        if !settings.username.is_empty() && settings.security == SmtpSecurity::None {
            return Err(UptimeError::Smtp(
                "refusing to send credentials over an unencrypted connection; \
                 set security to starttls or tls"
                    .to_string(),
            ));
        }

        let addr = format!("{}:{}", settings.host, settings.port);
        tracing::debug!("Connecting to SMTP server {} ({:?})", addr, settings.security);
        let stream = tokio::time::timeout(self.timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| UptimeError::Smtp(format!("connect to {} timed out", addr)))?
            .map_err(|e| UptimeError::Smtp(format!("connect to {} failed: {}", addr, e)))?;

        let mut session = match settings.security {
            SmtpSecurity::Tls => {
                let tls = self.handshake(stream, &settings.host).await?;
                SmtpSession::new(Box::new(tls), self.timeout)
            }
            SmtpSecurity::None | SmtpSecurity::Starttls => {
                SmtpSession::new(Box::new(stream), self.timeout)
            }
        };
        session.expect_reply(220).await?;
        let ehlo = format!("EHLO {}", self.helo_name);
        let extensions = session.command(&ehlo, 250).await?;

        if settings.security == SmtpSecurity::Starttls {
            if !offers(&extensions, "STARTTLS") {
                return Err(UptimeError::Smtp(format!(
                    "{} does not offer STARTTLS",
                    addr
                )));
            }
            session.command("STARTTLS", 220).await?;
            let tls = self.handshake(session.into_stream(), &settings.host).await?;
            session = SmtpSession::new(Box::new(tls), self.timeout);
            session.command(&ehlo, 250).await?;
        }

        if !settings.username.is_empty() {
            let credentials = format!("\0{}\0{}", settings.username, settings.password);
            let encoded = base64::engine::general_purpose::STANDARD.encode(credentials);
            session
                .command(&format!("AUTH PLAIN {}", encoded), 235)
                .await?;
        }

        session
            .command(&format!("MAIL FROM:<{}>", settings.from_address), 250)
            .await?;
        for recipient in &email.to {
            session
                .command(&format!("RCPT TO:<{}>", recipient), 250)
                .await?;
        }
        session.command("DATA", 354).await?;
        session.write_raw(&email.to_message(settings)).await?;
        session.command(".", 250).await?;

        // The message is accepted at this point; a failed QUIT is not a delivery failure
        if let Err(e) = session.command("QUIT", 221).await {
            tracing::debug!("SMTP QUIT failed: {}", e);
        }
        tracing::info!(
            "Sent '{}' to {} recipient(s) via {}",
            email.subject,
            email.to.len(),
            addr
        );
        Ok(())
    }
}

/// Whether an EHLO reply lists `extension`
fn offers(ehlo: &str, extension: &str) -> bool {
    ehlo.lines().any(|line| {
        line.split_whitespace()
            .next()
            .is_some_and(|keyword| keyword.eq_ignore_ascii_case(extension))
    })
}

trait Transport: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Transport for T {}

struct SmtpSession {
    stream: BufReader<Box<dyn Transport>>,
    timeout: Duration,
}

impl SmtpSession {
    fn new(stream: Box<dyn Transport>, timeout: Duration) -> Self {
        Self {
            stream: BufReader::new(stream),
            timeout,
        }
    }

    /// Give up the connection, e.g. for a TLS upgrade
    fn into_stream(self) -> Box<dyn Transport> {
        self.stream.into_inner()
    }

    async fn write_raw(&mut self, data: &str) -> Result<()> {
        tokio::time::timeout(self.timeout, async {
            self.stream.write_all(data.as_bytes()).await?;
            self.stream.flush().await
        })
        .await
        .map_err(|_| UptimeError::Smtp("write timed out".to_string()))?
        .map_err(|e| UptimeError::Smtp(format!("write failed: {}", e)))
    }

    async fn command(&mut self, line: &str, expected: u16) -> Result<String> {
        let verb = line.split_whitespace().next().unwrap_or(line);
        tracing::debug!("SMTP > {}", if verb == "AUTH" { "AUTH PLAIN ***" } else { line });
        self.write_raw(&format!("{}\r\n", line)).await?;
        self.expect_reply(expected).await.map_err(|e| match e {
            UptimeError::Smtp(msg) => UptimeError::Smtp(format!("{}: {}", verb, msg)),
            other => other,
        })
    }

    /// Read a possibly multi-line reply and check its code
    async fn expect_reply(&mut self, expected: u16) -> Result<String> {
        let mut text = String::new();
        loop {
            let mut line = String::new();
            let read = tokio::time::timeout(self.timeout, self.stream.read_line(&mut line))
                .await
                .map_err(|_| UptimeError::Smtp("reply timed out".to_string()))?
                .map_err(|e| UptimeError::Smtp(format!("read failed: {}", e)))?;
            if read == 0 {
                return Err(UptimeError::Smtp("connection closed by server".to_string()));
            }

            let line = line.trim_end();
            tracing::debug!("SMTP < {}", line);
            let code: u16 = line
                .get(..3)
                .and_then(|c| c.parse().ok())
                .ok_or_else(|| UptimeError::Smtp(format!("malformed reply '{}'", line)))?;
            text.push_str(line.get(4..).unwrap_or(""));

            if line.as_bytes().get(3) == Some(&b'-') {
                text.push('\n');
                continue;
            }
            if code != expected {
                return Err(UptimeError::Smtp(format!(
                    "expected {} but server replied '{}'",
                    expected, line
                )));
            }
            return Ok(text);
        }
    }
}
