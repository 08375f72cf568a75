mod slack;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::{NotificationChannelType, NotificationConfig};

/// Events that trigger notifications
#[derive(Debug, Clone)]
pub enum BatchEvent {
    DeviceFailed {
        run_id: Uuid,
        client: String,
        label: String,
        host: String,
        error: String,
    },
    Completed {
        run_id: Uuid,
        client: String,
        total: usize,
        succeeded: usize,
        failed: usize,
        duration_secs: u64,
    },
}

/// Trait for notification channel implementations (Slack, Discord, etc.)
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn notify(&self, event: BatchEvent) -> Result<()>;
}

/// Factory function to create a notifier based on config
pub fn create_notifier(config: &NotificationConfig) -> Option<Arc<dyn NotificationChannel>> {
    match &config.channel {
        NotificationChannelType::None => None,
        NotificationChannelType::Slack => {
            let webhook = config.slack_webhook.as_ref()?;
            if webhook.is_empty() {
                return None;
            }
            Some(Arc::new(slack::SlackNotifier::new(webhook.clone())))
        }
    }
}
