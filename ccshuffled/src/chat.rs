//! Outbound side of the chat bridge.
//!
//! Round option lists are broadcast to every subscribed IPC client; the
//! bridge process relays them to viewers and sends chat lines back as
//! `Vote` requests.

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{debug, info};

#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn publish_options(&self, options: &[String]);
}

#[derive(Debug, Clone)]
pub struct ChatHub {
    tx: broadcast::Sender<Vec<String>>,
}

impl ChatHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Vec<String>> {
        self.tx.subscribe()
    }
}

impl Default for ChatHub {
    fn default() -> Self {
        Self::new(16)
    }
}

#[async_trait]
impl ChatTransport for ChatHub {
    async fn publish_options(&self, options: &[String]) {
        info!("Round options: {}", options.join(" | "));
        // No subscribers is fine; the round runs regardless.
        if let Ok(n) = self.tx.send(options.to_vec()) {
            debug!("Round options sent to {} subscriber(s)", n);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_options() {
        let hub = ChatHub::default();
        hub.publish_options(&["nobody listening".into()]).await;

        let mut a = hub.subscribe();
        let mut b = hub.subscribe();
        let opts = vec!["1. Squash".to_string(), "[5] Random".to_string()];
        hub.publish_options(&opts).await;
        assert_eq!(a.recv().await.unwrap(), opts);
        assert_eq!(b.recv().await.unwrap(), opts);
    }
}
