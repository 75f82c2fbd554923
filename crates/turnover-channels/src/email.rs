//! Email channel: async IMAP intake + SMTP notifications.
//!
//! [`ImapMailSource`] reads booking confirmations via async-imap without
//! flagging them (`BODY.PEEK[]`); only `mark_processed` sets `\Seen`, so an
//! email that failed to coordinate stays unread for the next run.
//! [`EmailNotifier`] sends cleaner requests, calendar invites and owner
//! notices through lettre.

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::time::Duration;
use turnover_core::config::MailConfig;
use turnover_core::traits::{CalendarInvite, CleanerRequest, ExhaustedNotice, MailFilter};
use turnover_core::{Email, MailSource, Notifier, Result, TurnoverError};

use crate::compose;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

type ImapTlsStream = tokio_native_tls::TlsStream<tokio::net::TcpStream>;
type ImapSession = async_imap::Session<ImapTlsStream>;

fn channel_err(ctx: &'static str) -> impl Fn(String) -> TurnoverError {
    move |e| TurnoverError::Channel(format!("{ctx}: {e}"))
}

/// Create TLS-wrapped IMAP connection and log in.
async fn open_session(config: &MailConfig) -> Result<ImapSession> {
    let host = config.imap_host.as_str();
    let tcp = tokio::time::timeout(
        CONNECT_TIMEOUT,
        tokio::net::TcpStream::connect((host, config.imap_port)),
    )
    .await
    .map_err(|_| TurnoverError::Channel(format!("TCP connect to {host}: timed out")))?
    .map_err(|e| channel_err("TCP connect")(e.to_string()))?;

    let connector = native_tls::TlsConnector::new()
        .map_err(|e| channel_err("TLS connector")(e.to_string()))?;
    let connector = tokio_native_tls::TlsConnector::from(connector);
    let tls_stream = connector
        .connect(host, tcp)
        .await
        .map_err(|e| channel_err("TLS handshake")(e.to_string()))?;

    let client = async_imap::Client::new(tls_stream);
    let mut session = client
        .login(&config.email, &config.password)
        .await
        .map_err(|e| channel_err("IMAP login")(e.0.to_string()))?;

    session
        .select(&config.mailbox)
        .await
        .map_err(|e| channel_err("Select")(e.to_string()))?;
    Ok(session)
}

/// IMAP mailbox as a [`MailSource`]. Email ids are IMAP UIDs.
pub struct ImapMailSource {
    config: MailConfig,
}

impl ImapMailSource {
    pub fn new(config: MailConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl MailSource for ImapMailSource {
    async fn fetch(&self, filter: &MailFilter) -> Result<Vec<Email>> {
        let mut session = open_session(&self.config).await?;

        let search = if filter.unread_only { "UNSEEN" } else { "ALL" };
        let mut uids: Vec<u32> = session
            .uid_search(search)
            .await
            .map_err(|e| channel_err("Search")(e.to_string()))?
            .into_iter()
            .collect();
        uids.sort_unstable();

        if uids.is_empty() {
            session.logout().await.ok();
            return Ok(vec![]);
        }

        let uid_set = uids
            .iter()
            .map(|u| u.to_string())
            .collect::<Vec<_>>()
            .join(",");

        let mut emails = Vec::new();
        {
            let mut messages = session
                .uid_fetch(&uid_set, "(UID BODY.PEEK[])")
                .await
                .map_err(|e| channel_err("Fetch")(e.to_string()))?;

            while let Some(msg_result) = messages.next().await {
                let msg = msg_result.map_err(|e| channel_err("Fetch msg")(e.to_string()))?;
                let Some(uid) = msg.uid else { continue };
                if let Some(body) = msg.body()
                    && let Some(parsed) = parse_email_bytes(body, uid)
                {
                    if filter.matches(&parsed.from, &parsed.subject) {
                        emails.push(parsed);
                    }
                } else {
                    tracing::warn!("⚠️ UID {uid}: unparseable message, skipped");
                }
            }
        }

        session.logout().await.ok();
        tracing::info!(
            "📧 Fetched {} matching email(s) of {} in {}",
            emails.len(),
            uids.len(),
            self.config.mailbox
        );
        Ok(emails)
    }

    async fn mark_processed(&self, email_id: &str) -> Result<()> {
        if !self.config.mark_as_read {
            tracing::debug!("mark_as_read off, leaving UID {email_id}");
            return Ok(());
        }
        let uid: u32 = email_id
            .parse()
            .map_err(|_| TurnoverError::Channel(format!("not an IMAP UID: {email_id}")))?;

        let mut session = open_session(&self.config).await?;
        {
            let updates = session
                .uid_store(uid.to_string(), "+FLAGS (\\Seen)")
                .await
                .map_err(|e| channel_err("Store")(e.to_string()))?;
            updates
                .try_collect::<Vec<_>>()
                .await
                .map_err(|e| channel_err("Store")(e.to_string()))?;
        }
        session.logout().await.ok();
        tracing::debug!("✅ UID {uid} marked as read");
        Ok(())
    }
}

/// Parse raw RFC 822 bytes.
fn parse_email_bytes(raw: &[u8], uid: u32) -> Option<Email> {
    use mail_parser::MessageParser;
    let parsed = MessageParser::default().parse(raw)?;

    let sender = parsed.from().and_then(|a| a.first());
    let from = sender
        .and_then(|a| a.address())
        .unwrap_or_default()
        .to_string();
    let from_name = sender.and_then(|a| a.name()).map(String::from);

    Some(Email {
        id: uid.to_string(),
        from,
        from_name,
        subject: parsed.subject().unwrap_or_default().to_string(),
        body_text: parsed
            .body_text(0)
            .map(|s| s.to_string())
            .unwrap_or_default(),
        body_html: parsed
            .body_html(0)
            .map(|s| s.to_string())
            .unwrap_or_default(),
        message_id: parsed.message_id().map(String::from),
    })
}

/// SMTP [`Notifier`].
pub struct EmailNotifier {
    from: Mailbox,
    account: String,
    mailer: AsyncSmtpTransport<Tokio1Executor>,
}

impl EmailNotifier {
    pub fn new(config: &MailConfig) -> Result<Self> {
        let from_name = config.display_name.as_deref().unwrap_or("Turnover");
        let from = mailbox(&format!("{from_name} <{}>", config.email))?;
        let creds = Credentials::new(config.email.clone(), config.password.clone());

        // 465 is implicit TLS, everything else negotiates STARTTLS
        let builder = if config.smtp_port == 465 {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
        }
        .map_err(|e| channel_err("SMTP relay")(e.to_string()))?;

        let mailer = builder
            .port(config.smtp_port)
            .credentials(creds)
            .timeout(Some(CONNECT_TIMEOUT))
            .build();

        Ok(Self {
            from,
            account: config.email.clone(),
            mailer,
        })
    }

    async fn send(&self, message: Message, to: &str) -> Result<()> {
        self.mailer
            .send(message)
            .await
            .map_err(|e| channel_err("SMTP send")(e.to_string()))?;
        tracing::info!("📤 Email sent to: {to}");
        Ok(())
    }
}

fn mailbox(addr: &str) -> Result<Mailbox> {
    addr.parse::<Mailbox>()
        .map_err(|e| channel_err("Invalid address")(format!("{addr}: {e}")))
}

fn build_err(e: lettre::error::Error) -> TurnoverError {
    channel_err("Build email")(e.to_string())
}

#[async_trait]
impl Notifier for EmailNotifier {
    async fn notify_cleaner(&self, request: &CleanerRequest) -> Result<()> {
        let message = Message::builder()
            .from(self.from.clone())
            .to(mailbox(&request.cleaner.email)?)
            .subject(compose::cleaner_request_subject(request))
            .multipart(MultiPart::alternative_plain_html(
                compose::cleaner_request_text(request),
                compose::cleaner_request_html(request),
            ))
            .map_err(build_err)?;
        self.send(message, &request.cleaner.email).await
    }

    async fn send_calendar_invite(&self, invite: &CalendarInvite) -> Result<()> {
        let ics = compose::calendar_ics(invite, &self.account, chrono::Utc::now());
        let calendar = ContentType::parse("text/calendar; method=REQUEST; charset=UTF-8")
            .map_err(|e| channel_err("Content type")(e.to_string()))?;

        let mut builder = Message::builder()
            .from(self.from.clone())
            .to(mailbox(&invite.cleaner.email)?)
            .subject(compose::invite_subject(invite));
        if let Some(owner) = &invite.owner_email {
            builder = builder.cc(mailbox(owner)?);
        }

        let message = builder
            .multipart(
                MultiPart::mixed()
                    .singlepart(SinglePart::plain(compose::invite_text(invite)))
                    .singlepart(Attachment::new("invite.ics".into()).body(ics, calendar)),
            )
            .map_err(build_err)?;
        self.send(message, &invite.cleaner.email).await
    }

    async fn notify_owner_exhausted(&self, notice: &ExhaustedNotice) -> Result<()> {
        // No owner address configured: the account holder hears about it
        let to = notice.owner_email.as_deref().unwrap_or(&self.account);
        let message = Message::builder()
            .from(self.from.clone())
            .to(mailbox(to)?)
            .subject(compose::exhausted_subject(notice))
            .header(ContentType::TEXT_PLAIN)
            .body(compose::exhausted_text(notice))
            .map_err(build_err)?;
        self.send(message, to).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RAW: &[u8] = b"From: Airbnb <automated@airbnb.com>\r\n\
        To: host@example.com\r\n\
        Subject: Reservation confirmed - Jane Doe arrives Jan 15\r\n\
        Message-ID: <abc@airbnb.com>\r\n\
        Content-Type: text/plain; charset=utf-8\r\n\
        \r\n\
        Reservation Number: HM123456789\r\n";

    #[test]
    fn test_parse_email_bytes() {
        let email = parse_email_bytes(RAW, 42).unwrap();
        assert_eq!(email.id, "42");
        assert_eq!(email.from, "automated@airbnb.com");
        assert_eq!(email.from_name.as_deref(), Some("Airbnb"));
        assert_eq!(email.subject, "Reservation confirmed - Jane Doe arrives Jan 15");
        assert!(email.body_text.contains("HM123456789"));
        assert_eq!(email.message_id.as_deref(), Some("abc@airbnb.com"));
    }

    #[test]
    fn test_notifier_rejects_bad_account() {
        let config = MailConfig {
            email: "not an address".into(),
            ..Default::default()
        };
        assert!(matches!(
            EmailNotifier::new(&config),
            Err(TurnoverError::Channel(_))
        ));
    }

    #[tokio::test]
    async fn test_mark_processed_noop_when_disabled() {
        let source = ImapMailSource::new(MailConfig {
            mark_as_read: false,
            ..Default::default()
        });
        // Never connects
        source.mark_processed("7").await.unwrap();
    }
}
