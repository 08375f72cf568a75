use super::{BatchEvent, NotificationChannel};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;

pub struct SlackNotifier {
    webhook_url: String,
    client: reqwest::Client,
}

impl SlackNotifier {
    pub fn new(webhook_url: String) -> Self {
        Self {
            webhook_url,
            client: reqwest::Client::new(),
        }
    }

    fn format_message(&self, event: &BatchEvent) -> serde_json::Value {
        match event {
            BatchEvent::DeviceFailed {
                run_id,
                client,
                label,
                host,
                error,
            } => {
                let short_id = short(run_id);
                json!({
                    "blocks": [
                        {
                            "type": "header",
                            "text": {
                                "type": "plain_text",
                                "text": "Device Backup Failed",
                                "emoji": true
                            }
                        },
                        {
                            "type": "section",
                            "fields": [
                                {
                                    "type": "mrkdwn",
                                    "text": format!("*Client:*\n{}", client)
                                },
                                {
                                    "type": "mrkdwn",
                                    "text": format!("*Device:*\n{} (`{}`)", label, host)
                                },
                                {
                                    "type": "mrkdwn",
                                    "text": format!("*Run ID:*\n`{}`", short_id)
                                }
                            ]
                        },
                        {
                            "type": "section",
                            "text": {
                                "type": "mrkdwn",
                                "text": format!("*Error:*\n```{}```", error)
                            }
                        }
                    ]
                })
            }
            BatchEvent::Completed {
                run_id,
                client,
                total,
                succeeded,
                failed,
                duration_secs,
            } => {
                let short_id = short(run_id);
                let title = if *failed == 0 {
                    "Backup Run Complete"
                } else {
                    "Backup Run Complete With Failures"
                };
                json!({
                    "blocks": [
                        {
                            "type": "header",
                            "text": {
                                "type": "plain_text",
                                "text": title,
                                "emoji": true
                            }
                        },
                        {
                            "type": "section",
                            "fields": [
                                {
                                    "type": "mrkdwn",
                                    "text": format!("*Client:*\n{}", client)
                                },
                                {
                                    "type": "mrkdwn",
                                    "text": format!("*Run ID:*\n`{}`", short_id)
                                },
                                {
                                    "type": "mrkdwn",
                                    "text": format!("*Devices:*\n{} ok / {} failed / {} total", succeeded, failed, total)
                                },
                                {
                                    "type": "mrkdwn",
                                    "text": format!("*Duration:*\n{}s", duration_secs)
                                }
                            ]
                        }
                    ]
                })
            }
        }
    }
}

fn short(run_id: &uuid::Uuid) -> String {
    run_id.simple().to_string()[..8].to_string()
}

#[async_trait]
impl NotificationChannel for SlackNotifier {
    async fn notify(&self, event: BatchEvent) -> Result<()> {
        let payload = self.format_message(&event);
        self.client
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
