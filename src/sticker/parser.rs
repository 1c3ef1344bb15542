//! Sticker protocol command parser and reply script.

use std::time::Duration;

/// Client request that starts a delivery.
pub const DELIVER_STICKER: &str = "deliver a new sticker";

/// Client notice that it is idle until the next sticker.
pub const WAIT_FOR_NEXT: &str = "wait until next sticker";

/// Parsed sticker command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the delivery reply sequence.
    DeliverSticker,
    /// Acknowledged wait; no reply.
    WaitForNext,
    /// Anything else, kept for logging.
    Unknown(String),
}

impl Command {
    /// Classify one framed message.
    ///
    /// Matching is exact and case-sensitive. The framer has already trimmed
    /// the message, so leftover whitespace makes it `Unknown`.
    pub fn parse(message: &str) -> Self {
        match message {
            DELIVER_STICKER => Command::DeliverSticker,
            WAIT_FOR_NEXT => Command::WaitForNext,
            other => Command::Unknown(other.to_string()),
        }
    }
}

/// One reply of the delivery sequence and the pause that follows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyStep {
    pub text: &'static str,
    pub delay: Duration,
}

impl ReplyStep {
    const fn new(text: &'static str, delay_secs: u64) -> Self {
        Self {
            text,
            delay: Duration::from_secs(delay_secs),
        }
    }

    /// Wire form of the reply, newline-terminated.
    pub fn encode(&self) -> Vec<u8> {
        let mut line = Vec::with_capacity(self.text.len() + 1);
        line.extend_from_slice(self.text.as_bytes());
        line.push(b'\n');
        line
    }
}

/// Replies sent for every `deliver a new sticker`, in order.
pub const DELIVERY_SEQUENCE: [ReplyStep; 3] = [
    ReplyStep::new("pickup reached", 2),
    ReplyStep::new("drop reached", 2),
    ReplyStep::new("one sticker finished", 0),
];
