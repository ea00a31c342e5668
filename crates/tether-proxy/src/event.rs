//! The plugin-facing surface of the pipeline.
//!
//! The bus implementation itself lives outside the core; the proxy only
//! publishes. A handler's return value steers the packet that triggered
//! the event. Handlers run inline on the read loop that parsed the packet,
//! so a slow handler stalls that direction of the session.

use serde_json::Value;

/// What the pipeline does with the packet behind an event.
#[derive(Clone, Debug, Default)]
pub enum Decision {
    /// Forward the original bytes untouched.
    #[default]
    PassThrough,
    /// Swallow the packet.
    Drop,
    /// Re-encode the packet from this replacement payload.
    Replace(Value),
}

/// Event names the core publishes.
pub mod name {
    pub const LOGIN: &str = "player.login";
    pub const SPAWNED: &str = "player.spawned";
    pub const LOGOUT: &str = "player.logout";
    pub const MOVE: &str = "player.move";
    pub const CHATBOX: &str = "player.chatbox";
    pub const RUN_COMMAND: &str = "player.runCommand";
    pub const USE_BED: &str = "player.usebed";
    pub const MOUNT: &str = "player.mount";
    pub const UNMOUNT: &str = "player.unmount";
    pub const JOIN: &str = "player.join";
    pub const LEAVE: &str = "player.leave";
}

/// Receiver side of `emit`. Implementations are plugin hosts; the core
/// only requires that they answer synchronously.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &str, payload: Value) -> anyhow::Result<Decision>;
}

/// Sink used when no plugin host is attached: everything passes through.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: &str, _payload: Value) -> anyhow::Result<Decision> {
        Ok(Decision::PassThrough)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_sink_passes_through() {
        let decision = NullSink.emit(name::CHATBOX, Value::Null).unwrap();
        assert!(matches!(decision, Decision::PassThrough));
    }
}
