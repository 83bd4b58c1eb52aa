use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// How a subscription's payload is encoded on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadEncoding {
    Json,
    Buffer,
}

/// Whether a subscription expects the handler to reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionKind {
    /// Fire-and-forget: handler errors are logged, never sent anywhere.
    Subscribe,
    /// Request/reply: the handler's return value (or a structured error) is
    /// written to the message's reply subject.
    Reply,
}

/// Implemented by the code that processes messages for one declared
/// subscription. `Ok(None)` means "nothing to reply with" (only meaningful
/// for `Subscribe` subjects); `Err` is logged for `Subscribe` subjects and
/// turned into a `{"error": ...}` reply payload for `Reply` subjects.
#[async_trait]
pub trait SubscriptionHandler: Send + Sync {
    async fn handle(
        &self,
        subject: &str,
        payload: serde_json::Value,
    ) -> Result<Option<serde_json::Value>, String>;
}

/// A declarative subscription: what to listen on and how, installed at
/// connect time and reinstalled verbatim on every reconnect.
///
/// This is the "desired" side of the Transport's desired-vs-installed
/// reconciliation (`spec.md` §9's redesign note): subscriptions are data,
/// not imperative `subscribe()` calls scattered through the codebase.
#[derive(Clone)]
pub struct SubscriptionSpec {
    pub subject: String,
    pub kind: SubscriptionKind,
    pub payload_encoding: PayloadEncoding,
    pub queue_group: Option<String>,
    /// Broker-ACL hints carried over from the source system's subscription
    /// declarations. Not enforced by this Transport (ACL enforcement is the
    /// broker's job) — kept as documented intent only.
    pub pub_allow: Vec<String>,
    pub sub_allow: Vec<String>,
    pub handler: Arc<dyn SubscriptionHandler>,
}

impl SubscriptionSpec {
    pub fn subscribe(subject: impl Into<String>, handler: Arc<dyn SubscriptionHandler>) -> Self {
        Self {
            subject: subject.into(),
            kind: SubscriptionKind::Subscribe,
            payload_encoding: PayloadEncoding::Json,
            queue_group: None,
            pub_allow: Vec::new(),
            sub_allow: Vec::new(),
            handler,
        }
    }

    pub fn with_queue_group(mut self, queue_group: impl Into<String>) -> Self {
        self.queue_group = Some(queue_group.into());
        self
    }

    pub fn with_permissions(mut self, pub_allow: Vec<String>, sub_allow: Vec<String>) -> Self {
        self.pub_allow = pub_allow;
        self.sub_allow = sub_allow;
        self
    }
}
