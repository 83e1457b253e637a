//! Per-topic upstream pump.
//!
//! One task per joined topic holds the node's event stream and feeds the
//! manager, so events of a topic are delivered in the order the node
//! produced them. A lost stream puts the topic in degraded mode and is
//! re-opened with exponential backoff; subscribers stay connected.

use crate::domain::config::UpstreamConfig;
use crate::domain::Topic;
use crate::ports::NodeClient;
use crate::ws::subscriptions::SubscriptionManager;
use futures::StreamExt;
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

pub(crate) async fn run_pump(
    manager: Weak<SubscriptionManager>,
    node: Arc<dyn NodeClient>,
    topic: Topic,
    generation: u64,
    backoff: UpstreamConfig,
) {
    let mut attempt: u32 = 0;

    loop {
        match node.subscribe(&topic).await {
            Ok(mut stream) => {
                {
                    let Some(manager) = manager.upgrade() else {
                        return;
                    };
                    if !manager.mark_upstream(&topic, generation, true) {
                        return;
                    }
                    manager.metrics().record_upstream_join();
                }
                if attempt > 0 {
                    info!(topic = %topic, attempts = attempt, "upstream stream restored");
                }
                attempt = 0;

                while let Some(event) = stream.next().await {
                    let Some(manager) = manager.upgrade() else {
                        return;
                    };
                    if event.topic != topic {
                        debug!(topic = %topic, got = %event.topic, "dropping event for foreign topic");
                        continue;
                    }
                    manager.deliver(&topic, generation, Arc::new(event));
                }
                warn!(topic = %topic, "upstream stream ended");
            }
            Err(e) => {
                warn!(topic = %topic, error = %e, attempt, "upstream subscribe failed");
            }
        }

        {
            let Some(manager) = manager.upgrade() else {
                return;
            };
            manager.metrics().record_upstream_failure();
            if !manager.mark_upstream(&topic, generation, false) {
                return;
            }
        }

        let delay = backoff.backoff(attempt);
        attempt = attempt.saturating_add(1);
        debug!(topic = %topic, delay_ms = delay.as_millis() as u64, "upstream reconnect scheduled");
        tokio::time::sleep(delay).await;
    }
}
