//! Outbound chat notifications.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Mutex;
use teloxide::prelude::*;
use teloxide::types::ParseMode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NotifierError {
    #[error("Telegram API error: {0}")]
    Telegram(#[from] teloxide::RequestError),
    #[error("Delivery to chat {0} rejected")]
    Rejected(i64),
}

/// Delivers a text message to a chat. Failures are reported, never retried.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, chat_id: i64, text: &str) -> Result<(), NotifierError>;
}

/// Sends HTML-formatted messages through a Telegram bot.
pub struct TelegramNotifier {
    bot: Bot,
}

impl TelegramNotifier {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, chat_id: i64, text: &str) -> Result<(), NotifierError> {
        self.bot
            .send_message(ChatId(chat_id), text)
            .parse_mode(ParseMode::Html)
            .await?;
        Ok(())
    }
}

/// Notifier for testing that records every message.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(i64, String)>>,
    failing: Mutex<HashSet<i64>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every message to `chat_id` from now on.
    pub fn fail_chat(&self, chat_id: i64) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.insert(chat_id);
        }
    }

    /// Messages delivered so far, in order.
    pub fn sent(&self) -> Vec<(i64, String)> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Messages delivered to one chat.
    pub fn sent_to(&self, chat_id: i64) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter(|(id, _)| *id == chat_id)
            .map(|(_, text)| text)
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, chat_id: i64, text: &str) -> Result<(), NotifierError> {
        let rejected = self
            .failing
            .lock()
            .map(|f| f.contains(&chat_id))
            .unwrap_or(false);
        if rejected {
            return Err(NotifierError::Rejected(chat_id));
        }
        if let Ok(mut sent) = self.sent.lock() {
            sent.push((chat_id, text.to_string()));
        }
        Ok(())
    }
}
