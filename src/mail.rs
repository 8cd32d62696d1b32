use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::Tls;
use lettre::{Message, SmtpTransport, Transport as _};

use crate::error::{Error, Result};

pub const DEFAULT_SMTP_HOST: &str = "smtp.gmail.com";
pub const DEFAULT_SMTP_PORT: u16 = 465;

/// How the SMTP connection is secured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmtpSecurity {
    /// TLS from the first byte (port 465).
    Tls,
    /// Plain connection upgraded with STARTTLS (port 587).
    StartTls,
    /// No encryption. Only for local relays.
    None,
}

impl SmtpSecurity {
    fn for_port(port: u16) -> Self {
        if port == DEFAULT_SMTP_PORT {
            SmtpSecurity::Tls
        } else {
            SmtpSecurity::StartTls
        }
    }

    fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "tls" => Ok(SmtpSecurity::Tls),
            "starttls" => Ok(SmtpSecurity::StartTls),
            "none" => Ok(SmtpSecurity::None),
            other => Err(Error::Configuration(format!(
                "SMTP_SECURITY {other:?}: expected tls, starttls or none"
            ))),
        }
    }
}

#[derive(Clone)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub security: SmtpSecurity,
    pub username: String,
    pub password: String,
    pub from: Mailbox,
    pub to: Vec<Mailbox>,
}

impl std::fmt::Debug for SmtpSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("security", &self.security)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("to", &self.to)
            .finish()
    }
}

impl SmtpSettings {
    /// Reads `GMAIL_USER`, `GMAIL_APP_PASSWORD`, `EMAIL_TO` and the optional
    /// `SMTP_HOST`, `SMTP_PORT` and `SMTP_SECURITY`. Every address is parsed
    /// here so a bad one fails before any fetch.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_owned())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| Error::Configuration(format!("{key} is not set")))
        };
        let optional = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let username = required("GMAIL_USER")?;
        let from = parse_mailbox("GMAIL_USER", &username)?;
        let password = required("GMAIL_APP_PASSWORD")?;
        let to = parse_recipients(&required("EMAIL_TO")?)
            .iter()
            .map(|addr| parse_mailbox("EMAIL_TO", addr))
            .collect::<Result<Vec<_>>>()?;
        if to.is_empty() {
            return Err(Error::Configuration("EMAIL_TO has no recipients".to_owned()));
        }

        let host = optional("SMTP_HOST").unwrap_or_else(|| DEFAULT_SMTP_HOST.to_owned());
        let port = match optional("SMTP_PORT") {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|err| Error::Configuration(format!("SMTP_PORT {raw:?}: {err}")))?,
            None => DEFAULT_SMTP_PORT,
        };
        let security = match optional("SMTP_SECURITY") {
            Some(raw) => SmtpSecurity::parse(&raw)?,
            None => SmtpSecurity::for_port(port),
        };

        Ok(Self {
            host,
            port,
            security,
            username,
            password,
            from,
            to,
        })
    }
}

pub fn parse_recipients(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|addr| !addr.is_empty())
        .map(str::to_owned)
        .collect()
}

fn parse_mailbox(key: &str, addr: &str) -> Result<Mailbox> {
    addr.parse()
        .map_err(|err| Error::Configuration(format!("{key}: invalid email address {addr:?}: {err}")))
}

/// One message, every recipient in a single `To` header.
pub fn build_message(
    settings: &SmtpSettings,
    subject: &str,
    html_body: String,
    text_body: String,
) -> Result<Message> {
    let mut builder = Message::builder()
        .from(settings.from.clone())
        .subject(subject);
    for mailbox in &settings.to {
        builder = builder.to(mailbox.clone());
    }

    builder
        .multipart(MultiPart::alternative_plain_html(text_body, html_body))
        .map_err(|err| Error::Send(format!("build email: {err}")))
}

/// Single authenticated submission. No retry.
pub fn send(settings: &SmtpSettings, message: &Message) -> Result<()> {
    let relay_err = |err: lettre::transport::smtp::Error| {
        Error::Send(format!("smtp relay {}: {err}", settings.host))
    };
    let builder = match settings.security {
        SmtpSecurity::Tls => SmtpTransport::relay(&settings.host).map_err(relay_err)?,
        SmtpSecurity::StartTls => SmtpTransport::starttls_relay(&settings.host).map_err(relay_err)?,
        SmtpSecurity::None => SmtpTransport::builder_dangerous(&settings.host).tls(Tls::None),
    };
    let transport = builder
        .port(settings.port)
        .credentials(Credentials::new(
            settings.username.clone(),
            settings.password.clone(),
        ))
        .build();

    tracing::info!(
        to = ?settings.to,
        host = %settings.host,
        port = settings.port,
        security = ?settings.security,
        "sending email"
    );
    transport.send(message).map_err(classify_smtp_error)?;
    tracing::info!("email sent");
    Ok(())
}

fn classify_smtp_error(err: lettre::transport::smtp::Error) -> Error {
    let code = err.status().map(|code| code.to_string());
    match code.as_deref() {
        Some("530" | "534" | "535") => Error::Authentication(err.to_string()),
        _ => Error::Send(err.to_string()),
    }
}
