//! Message bus contract.
//!
//! The relay treats the bus library as an external collaborator: it registers
//! handlers, publishes raw payloads, and asks for the directive reply address.
//! Concrete transports implement [`MessageBus`] and [`BusConnector`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use thiserror::Error;

/// Topic prefix that marks a message as an execution request.
pub const EXECUTION_TOPIC_PREFIX: &str = "/bot/commands/";

/// Topic the relay publishes bundle-list requests on.
pub const RELAY_INFO_TOPIC: &str = "bot/relays/info";

/// Topic the relay announces its bundle set on.
pub const RELAY_DISCOVERY_TOPIC: &str = "bot/relays/discover";

#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus connect failed: {0}")]
    Connect(String),

    #[error("publish to {topic} failed: {reason}")]
    Publish { topic: String, reason: String },

    #[error("bus link is down")]
    Disconnected,
}

/// Callback invoked for every message delivered on a subscribed topic.
pub type MessageHandler = Box<dyn Fn(&str, &[u8]) + Send + Sync>;

/// Callback invoked once when the bus link drops.
pub type DisconnectHandler = Box<dyn Fn(&str) + Send + Sync>;

/// Handler bindings registered at connect time. The bus reader task invokes
/// these; they must not block.
pub struct Handlers {
    pub on_message: MessageHandler,
    pub on_disconnect: DisconnectHandler,
}

/// A live bidirectional link to the Cog bus.
///
/// Implementations serialize concurrent publishes internally; `halt` tears the
/// link down without firing the disconnect handler.
pub trait MessageBus: Send + Sync {
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BusError>;
    fn halt(&self);
    /// Address the Cog controller should direct directive replies to.
    fn directive_reply_to(&self) -> String;
}

/// Factory for bus links, injected into the relay so transports stay
/// swappable (and mockable in tests).
#[async_trait]
pub trait BusConnector: Send + Sync {
    async fn connect(&self, handlers: Handlers) -> Result<Arc<dyn MessageBus>, BusError>;
}

/// Pacing for Cog reconnect attempts: starts at half a second, doubles per
/// attempt, and saturates at `cap` (`cog.reconnect_cap_secs` in the relay
/// configuration). Jitter of up to a quarter of the base delay keeps a fleet
/// of relays from hammering a recovering broker in lockstep.
pub fn reconnect_delay(attempt: u32, cap: Duration) -> Duration {
    let cap_ms = (cap.as_millis() as u64).max(1);
    let base_ms = 500u64
        .saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)))
        .min(cap_ms);
    let jitter = rand::thread_rng().gen_range(0..=base_ms / 4);
    Duration::from_millis(base_ms + jitter)
}
