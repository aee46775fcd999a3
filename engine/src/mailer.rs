use lettre::{
    message::Mailbox, transport::smtp::authentication::Credentials, AsyncSmtpTransport,
    AsyncTransport, Message, Tokio1Executor,
};
use tracing::{debug, warn};

/// SMTP settings for the notification mailer.
#[derive(Debug, Clone)]
pub struct MailerConfig {
    pub smtp_host: String,
    pub smtp_username: String,
    /// `EMAIL_API_KEY` from the environment.
    pub smtp_password: String,
    pub from: String,
    /// Linked in the notification body so the user can re-authorize.
    pub frontend_url: String,
}

/// Best-effort notification sender. Every failure is logged and swallowed:
/// mail must never change a task's outcome.
pub struct Mailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    frontend_url: String,
}

impl Mailer {
    pub fn new(config: MailerConfig) -> Option<Self> {
        let from: Mailbox = match config.from.parse() {
            Ok(mailbox) => mailbox,
            Err(e) => {
                warn!("mailer disabled, bad from address: {e}");
                return None;
            }
        };
        let transport = match AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host) {
            Ok(builder) => builder
                .credentials(Credentials::new(config.smtp_username, config.smtp_password))
                .build(),
            Err(e) => {
                warn!("mailer disabled, bad relay: {e}");
                return None;
            }
        };
        Some(Self {
            transport,
            from,
            frontend_url: config.frontend_url,
        })
    }

    /// Tell the user a source token expired and backups stopped.
    pub async fn send_token_expired(&self, to: &str, job_name: &str) {
        let to: Mailbox = match to.parse() {
            Ok(mailbox) => mailbox,
            Err(_) => {
                debug!(to, "skipping expiry mail, unparseable recipient");
                return;
            }
        };
        let body = format!(
            "The access token for your backup \"{job_name}\" has expired.\n\
             Automatic backups are paused until you sign in again:\n{}\n",
            self.frontend_url
        );
        let email = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject("StorX backup: source token expired")
            .body(body);
        match email {
            Ok(email) => {
                if let Err(e) = self.transport.send(email).await {
                    warn!("expiry mail failed: {e}");
                }
            }
            Err(e) => warn!("expiry mail could not be built: {e}"),
        }
    }
}
