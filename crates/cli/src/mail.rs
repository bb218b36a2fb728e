//! The email record carried by the demo run.

use std::fmt;

use chrono::{DateTime, Utc};
use contracts::Payload;
use serde::{Deserialize, Serialize};

/// What to send, not a sent email
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Email {
    pub to: String,
    pub body: String,
    pub meta: MailMeta,
}

/// Bookkeeping attached by the sender
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MailMeta {
    /// Position within the run, starting at 0
    pub sequence: u32,
    pub sent_at: DateTime<Utc>,
}

impl Payload for Email {
    const TYPE_ID: &'static str = "email";
}

impl Email {
    pub fn new(to: impl Into<String>, body: impl Into<String>, sequence: u32) -> Self {
        Self {
            to: to.into(),
            body: body.into(),
            meta: MailMeta {
                sequence,
                sent_at: Utc::now(),
            },
        }
    }

    /// Milliseconds between sending and now
    pub fn age_ms(&self) -> f64 {
        let elapsed = Utc::now().signed_duration_since(self.meta.sent_at);
        elapsed.num_microseconds().unwrap_or(i64::MAX) as f64 / 1000.0
    }
}

impl fmt::Display for Email {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Email{{to={}, body={}}}", self.to, self.body)
    }
}
