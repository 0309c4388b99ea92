//! Webhook and script notifications (spec §4.11), fired on a task's
//! terminal transitions. Both delivery paths are fire-and-forget: failures
//! are logged and broadcast as events, never propagated back to the task.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::config::{ScriptConfig, WebhookConfig, WebhookEvent};
use crate::types::{Event, NotificationPayload};

/// POST `payload` to every webhook subscribed to `payload.event`.
pub fn trigger_webhooks(
    webhooks: &[WebhookConfig],
    event_tx: broadcast::Sender<Event>,
    payload: NotificationPayload,
) {
    let matching: Vec<WebhookConfig> = webhooks
        .iter()
        .filter(|w| w.events.contains(&payload.event))
        .cloned()
        .collect();
    if matching.is_empty() {
        return;
    }

    tokio::spawn(async move {
        let payload = Arc::new(payload);
        for webhook in matching {
            let client = reqwest::Client::new();
            let mut request = client
                .post(&webhook.url)
                .json(payload.as_ref())
                .timeout(webhook.timeout);
            if let Some(auth) = &webhook.auth_header {
                request = request.header("Authorization", auth);
            }

            let url = webhook.url.clone();
            let timeout = webhook.timeout;
            match tokio::time::timeout(timeout, request.send()).await {
                Ok(Ok(response)) if response.status().is_success() => {
                    tracing::debug!(%url, "webhook sent successfully");
                }
                Ok(Ok(response)) => {
                    let error = format!(
                        "webhook returned status {}: {}",
                        response.status(),
                        response.text().await.unwrap_or_default()
                    );
                    tracing::warn!(%url, %error, "webhook failed");
                    event_tx.send(Event::WebhookFailed { url, error }).ok();
                }
                Ok(Err(e)) => {
                    let error = format!("failed to send webhook: {e}");
                    tracing::warn!(%url, %error, "webhook failed");
                    event_tx.send(Event::WebhookFailed { url, error }).ok();
                }
                Err(_) => {
                    let error = format!("webhook timed out after {timeout:?}");
                    tracing::warn!(%url, %error, "webhook timeout");
                    event_tx.send(Event::WebhookFailed { url, error }).ok();
                }
            }
        }
    });
}

/// Run every script subscribed to `payload.event`, exposing the payload's
/// fields as `MIRROR_DL_*` environment variables.
pub fn trigger_scripts(
    scripts: &[ScriptConfig],
    event_tx: broadcast::Sender<Event>,
    payload: &NotificationPayload,
) {
    let matching: Vec<ScriptConfig> = scripts
        .iter()
        .filter(|s| s.events.contains(&payload.event))
        .cloned()
        .collect();
    if matching.is_empty() {
        return;
    }

    let env_vars = env_vars_for(payload);
    for script in matching {
        run_script_async(script.path, script.timeout, env_vars.clone(), event_tx.clone());
    }
}

fn env_vars_for(payload: &NotificationPayload) -> HashMap<String, String> {
    let mut env = HashMap::new();
    env.insert("MIRROR_DL_TASK_ID".to_string(), payload.task_id.to_string());
    env.insert("MIRROR_DL_NAME".to_string(), payload.name.clone());
    env.insert("MIRROR_DL_STATUS".to_string(), payload.status.clone());
    env.insert(
        "MIRROR_DL_EVENT".to_string(),
        webhook_event_label(payload.event).to_string(),
    );
    if let Some(tag) = &payload.tag {
        env.insert("MIRROR_DL_TAG".to_string(), tag.clone());
    }
    if let Some(dest) = &payload.destination {
        env.insert("MIRROR_DL_DESTINATION".to_string(), dest.clone());
    }
    if let Some(error) = &payload.error {
        env.insert("MIRROR_DL_ERROR".to_string(), error.clone());
    }
    env
}

fn webhook_event_label(event: WebhookEvent) -> &'static str {
    match event {
        WebhookEvent::OnFinalized => "finalized",
        WebhookEvent::OnFailed => "failed",
        WebhookEvent::OnQueued => "queued",
    }
}

fn run_script_async(
    script_path: std::path::PathBuf,
    timeout: Duration,
    env_vars: HashMap<String, String>,
    event_tx: broadcast::Sender<Event>,
) {
    tokio::spawn(async move {
        let result = tokio::time::timeout(
            timeout,
            tokio::process::Command::new(&script_path)
                .envs(&env_vars)
                .output(),
        )
        .await;

        match result {
            Ok(Ok(output)) if output.status.success() => {
                tracing::debug!(script = ?script_path, "notification script succeeded");
            }
            Ok(Ok(output)) => {
                let exit_code = output.status.code();
                tracing::warn!(script = ?script_path, ?exit_code, "notification script failed");
                event_tx
                    .send(Event::ScriptFailed {
                        script: script_path,
                        exit_code,
                    })
                    .ok();
            }
            Ok(Err(e)) => {
                tracing::warn!(script = ?script_path, error = %e, "failed to run notification script");
                event_tx
                    .send(Event::ScriptFailed {
                        script: script_path,
                        exit_code: None,
                    })
                    .ok();
            }
            Err(_) => {
                tracing::warn!(script = ?script_path, ?timeout, "notification script timed out");
                event_tx
                    .send(Event::ScriptFailed {
                        script: script_path,
                        exit_code: None,
                    })
                    .ok();
            }
        }
    });
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TaskId;

    fn sample_payload() -> NotificationPayload {
        NotificationPayload {
            event: WebhookEvent::OnFinalized,
            task_id: TaskId("abc1234567".into()),
            name: "movie.mkv".to_string(),
            tag: Some("movies".to_string()),
            status: "finalized".to_string(),
            destination: Some("gdrive:movies/movie.mkv".to_string()),
            error: None,
            timestamp: 0,
        }
    }

    #[test]
    fn env_vars_include_required_fields() {
        let env = env_vars_for(&sample_payload());
        assert_eq!(env.get("MIRROR_DL_TASK_ID"), Some(&"abc1234567".to_string()));
        assert_eq!(env.get("MIRROR_DL_EVENT"), Some(&"finalized".to_string()));
        assert_eq!(env.get("MIRROR_DL_TAG"), Some(&"movies".to_string()));
        assert!(!env.contains_key("MIRROR_DL_ERROR"));
    }

    #[test]
    fn no_matching_webhooks_is_a_silent_noop() {
        let (tx, _rx) = broadcast::channel(4);
        trigger_webhooks(&[], tx, sample_payload());
    }

    #[test]
    fn no_matching_scripts_is_a_silent_noop() {
        let (tx, _rx) = broadcast::channel(4);
        trigger_scripts(&[], tx, &sample_payload());
    }
}
