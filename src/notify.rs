use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tracing::{debug, info, warn};

use crate::observability;

/// Where notices to users go. Delivery is fire-and-forget: `notify` returns
/// at once and failures are logged, never reported to the caller.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, address: &str, message: &str);
}

/// Writes notices to the log. Used when no mail relay is configured.
pub struct LogSink;

impl NotificationSink for LogSink {
    fn notify(&self, address: &str, message: &str) {
        info!("notice for {address}: {message}");
        metrics::counter!(observability::NOTIFICATIONS_TOTAL, "status" => "logged").increment(1);
    }
}

#[derive(Debug)]
pub enum NotifyError {
    Io(io::Error),
    /// The relay answered a stage with a non-success code.
    Rejected { stage: &'static str, reply: String },
    Timeout(Duration),
}

impl fmt::Display for NotifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotifyError::Io(e) => write!(f, "mail I/O error: {e}"),
            NotifyError::Rejected { stage, reply } => write!(f, "relay rejected {stage}: {reply}"),
            NotifyError::Timeout(d) => write!(f, "mail delivery timed out after {d:?}"),
        }
    }
}

impl std::error::Error for NotifyError {}

impl From<io::Error> for NotifyError {
    fn from(e: io::Error) -> Self {
        NotifyError::Io(e)
    }
}

impl From<LinesCodecError> for NotifyError {
    fn from(e: LinesCodecError) -> Self {
        match e {
            LinesCodecError::Io(e) => NotifyError::Io(e),
            LinesCodecError::MaxLineLengthExceeded => NotifyError::Rejected {
                stage: "reply",
                reply: "reply line too long".into(),
            },
        }
    }
}

/// Something that can actually deliver one message.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, body: &str) -> Result<(), NotifyError>;
}

/// Minimal SMTP client: one connection per message, no auth, no TLS.
pub struct SmtpMailer {
    relay: String,
    from: String,
    timeout: Duration,
}

impl SmtpMailer {
    pub fn new(relay: impl Into<String>, from: impl Into<String>) -> Self {
        Self {
            relay: relay.into(),
            from: from.into(),
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn dialogue(&self, to: &str, body: &str) -> Result<(), NotifyError> {
        let (read, mut write) = TcpStream::connect(&self.relay).await?.into_split();
        let mut replies = FramedRead::new(read, LinesCodec::new_with_max_length(1024));

        expect_reply(&mut replies, "greeting", '2').await?;
        let steps = [
            ("HELO", "HELO localhost".to_string(), '2'),
            ("MAIL", format!("MAIL FROM:<{}>", self.from), '2'),
            ("RCPT", format!("RCPT TO:<{to}>"), '2'),
            ("DATA", "DATA".to_string(), '3'),
        ];
        for (stage, line, want) in steps {
            write.write_all(format!("{line}\r\n").as_bytes()).await?;
            expect_reply(&mut replies, stage, want).await?;
        }

        let mut data = format!("From: <{}>\r\nTo: <{to}>\r\nSubject: Reservation notice\r\n\r\n", self.from);
        for line in body.lines() {
            // dot-stuffing
            if line.starts_with('.') {
                data.push('.');
            }
            data.push_str(line);
            data.push_str("\r\n");
        }
        data.push_str(".\r\n");
        write.write_all(data.as_bytes()).await?;
        expect_reply(&mut replies, "message", '2').await?;

        write.write_all(b"QUIT\r\n").await?;
        // the relay may hang up without answering QUIT
        let _ = replies.next().await;
        Ok(())
    }
}

/// Read one (possibly multi-line) reply and check its first digit.
async fn expect_reply(
    replies: &mut FramedRead<OwnedReadHalf, LinesCodec>,
    stage: &'static str,
    want: char,
) -> Result<(), NotifyError> {
    loop {
        let Some(line) = replies.next().await.transpose()? else {
            return Err(NotifyError::Rejected { stage, reply: "connection closed".into() });
        };
        if line.as_bytes().get(3) == Some(&b'-') {
            continue;
        }
        return if line.starts_with(want) {
            Ok(())
        } else {
            Err(NotifyError::Rejected { stage, reply: line })
        };
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, to: &str, body: &str) -> Result<(), NotifyError> {
        tokio::time::timeout(self.timeout, self.dialogue(to, body))
            .await
            .map_err(|_| NotifyError::Timeout(self.timeout))?
    }
}

struct Notice {
    address: String,
    message: String,
}

/// Bounded queue in front of a [`Mailer`], drained by one background task.
pub struct MailQueue {
    tx: mpsc::Sender<Notice>,
}

impl MailQueue {
    /// Start the delivery task. Must be called inside a tokio runtime.
    pub fn spawn(mailer: Arc<dyn Mailer>, depth: usize) -> Self {
        let (tx, rx) = mpsc::channel(depth.max(1));
        tokio::spawn(delivery_loop(mailer, rx));
        Self { tx }
    }
}

impl NotificationSink for MailQueue {
    fn notify(&self, address: &str, message: &str) {
        let notice = Notice {
            address: address.to_string(),
            message: message.to_string(),
        };
        if let Err(e) = self.tx.try_send(notice) {
            warn!("notice for {address} dropped: {e}");
            metrics::counter!(observability::NOTIFICATIONS_TOTAL, "status" => "dropped").increment(1);
        }
    }
}

async fn delivery_loop(mailer: Arc<dyn Mailer>, mut rx: mpsc::Receiver<Notice>) {
    while let Some(notice) = rx.recv().await {
        match mailer.send(&notice.address, &notice.message).await {
            Ok(()) => {
                debug!("notice delivered to {}", notice.address);
                metrics::counter!(observability::NOTIFICATIONS_TOTAL, "status" => "sent").increment(1);
            }
            Err(e) => {
                warn!("notice to {} failed: {e}", notice.address);
                metrics::counter!(observability::NOTIFICATIONS_TOTAL, "status" => "failed").increment(1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::TcpListener;

    /// One-shot relay that answers every stage with `codes` in order and
    /// returns the lines it received.
    async fn fake_relay(rcpt_code: &'static str) -> (String, tokio::task::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let handle = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (read, mut write) = socket.into_split();
            let mut lines = BufReader::new(read).lines();
            let mut seen = Vec::new();
            write.write_all(b"220 relay ready\r\n").await.unwrap();
            let mut in_data = false;
            while let Ok(Some(line)) = lines.next_line().await {
                let line = line.trim_end_matches('\r').to_string();
                seen.push(line.clone());
                let reply: &[u8] = if in_data {
                    if line != "." {
                        continue;
                    }
                    in_data = false;
                    b"250 queued\r\n"
                } else if line.starts_with("HELO") {
                    b"250-relay\r\n250 hello\r\n"
                } else if line.starts_with("MAIL") {
                    b"250 ok\r\n"
                } else if line.starts_with("RCPT") {
                    if rcpt_code == "250" { b"250 ok\r\n" } else { b"550 no such user\r\n" }
                } else if line == "DATA" {
                    in_data = true;
                    b"354 go ahead\r\n"
                } else if line == "QUIT" {
                    write.write_all(b"221 bye\r\n").await.unwrap();
                    break;
                } else {
                    b"500 what\r\n"
                };
                write.write_all(reply).await.unwrap();
            }
            seen
        });
        (addr, handle)
    }

    #[tokio::test]
    async fn smtp_dialogue_delivers_body() {
        let (addr, relay) = fake_relay("250").await;
        let mailer = SmtpMailer::new(addr, "admin@campus.edu");
        mailer
            .send("student@campus.edu", "YOUR RESERVATION HAS BEEN MODIFIED\n.hidden")
            .await
            .unwrap();

        let seen = relay.await.unwrap();
        assert_eq!(seen[0], "HELO localhost");
        assert_eq!(seen[1], "MAIL FROM:<admin@campus.edu>");
        assert_eq!(seen[2], "RCPT TO:<student@campus.edu>");
        assert_eq!(seen[3], "DATA");
        assert!(seen.iter().any(|l| l == "YOUR RESERVATION HAS BEEN MODIFIED"));
        assert!(seen.iter().any(|l| l == "..hidden")); // dot-stuffed
        assert_eq!(seen.last().map(String::as_str), Some("QUIT"));
    }

    #[tokio::test]
    async fn smtp_rejection_names_stage() {
        let (addr, _relay) = fake_relay("550").await;
        let mailer = SmtpMailer::new(addr, "admin@campus.edu");
        let err = mailer.send("ghost@campus.edu", "hi").await.unwrap_err();
        match err {
            NotifyError::Rejected { stage, reply } => {
                assert_eq!(stage, "RCPT");
                assert!(reply.starts_with("550"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn unreachable_relay_is_an_error_not_a_panic() {
        // bind then drop to get a port nobody listens on
        let addr = {
            let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
            l.local_addr().unwrap().to_string()
        };
        let mailer = SmtpMailer::new(addr, "a@b").with_timeout(Duration::from_secs(2));
        assert!(mailer.send("x@y", "z").await.is_err());
    }

    struct Recorder {
        tx: mpsc::UnboundedSender<(String, String)>,
        fail_first: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl Mailer for Recorder {
        async fn send(&self, to: &str, body: &str) -> Result<(), NotifyError> {
            if self.fail_first.swap(false, std::sync::atomic::Ordering::SeqCst) {
                return Err(NotifyError::Rejected { stage: "RCPT", reply: "550".into() });
            }
            let _ = self.tx.send((to.to_string(), body.to_string()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn queue_survives_failed_delivery() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let recorder = Arc::new(Recorder { tx, fail_first: true.into() });
        let queue = MailQueue::spawn(recorder, 8);

        queue.notify("lost@campus.edu", "first");
        queue.notify("kept@campus.edu", "second");

        let got = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got, ("kept@campus.edu".to_string(), "second".to_string()));
    }
}
