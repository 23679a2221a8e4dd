//! Activation status change notifications
//!
//! The protocol services call the notifier only after the state change has been
//! committed and the activation lock released. Delivery and retry belong to the
//! notifier implementation.

use async_trait::async_trait;
use keyward_core::{ActivationRecord, ActivationStatus};
use serde::Serialize;
use tokio::sync::mpsc;

/// Payload sent to the callback collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivationStatusChange {
    pub application_id: String,
    pub activation_id: String,
    pub user_id: String,
    pub status: ActivationStatus,
    pub blocked_reason: Option<String>,
}

impl ActivationStatusChange {
    pub fn of(record: &ActivationRecord) -> Self {
        Self {
            application_id: record.application_id.clone(),
            activation_id: record.activation_id.clone(),
            user_id: record.user_id.clone(),
            status: record.status,
            blocked_reason: record.blocked_reason.clone(),
        }
    }
}

#[async_trait]
pub trait CallbackNotifier: Send + Sync {
    async fn notify_status_change(&self, change: ActivationStatusChange);
}

/// Logs every status change; the default for deployments without callbacks.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

#[async_trait]
impl CallbackNotifier for TracingNotifier {
    async fn notify_status_change(&self, change: ActivationStatusChange) {
        tracing::info!(
            application_id = %change.application_id,
            activation_id = %change.activation_id,
            status = %change.status,
            blocked_reason = change.blocked_reason.as_deref().unwrap_or("-"),
            "Activation status changed"
        );
    }
}

/// Forwards status changes to a channel, for embedding and tests.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    sender: mpsc::UnboundedSender<ActivationStatusChange>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ActivationStatusChange>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl CallbackNotifier for ChannelNotifier {
    async fn notify_status_change(&self, change: ActivationStatusChange) {
        if self.sender.send(change).is_err() {
            tracing::debug!("Status change receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_notifier_forwards() {
        let (notifier, mut receiver) = ChannelNotifier::new();
        let change = ActivationStatusChange {
            application_id: "app".into(),
            activation_id: "act".into(),
            user_id: "user".into(),
            status: ActivationStatus::Blocked,
            blocked_reason: Some("MAX_FAILED_ATTEMPTS".into()),
        };

        notifier.notify_status_change(change.clone()).await;
        assert_eq!(receiver.recv().await, Some(change));
    }

    #[tokio::test]
    async fn test_channel_notifier_survives_dropped_receiver() {
        let (notifier, receiver) = ChannelNotifier::new();
        drop(receiver);
        notifier
            .notify_status_change(ActivationStatusChange {
                application_id: "app".into(),
                activation_id: "act".into(),
                user_id: "user".into(),
                status: ActivationStatus::Removed,
                blocked_reason: None,
            })
            .await;
    }
}
