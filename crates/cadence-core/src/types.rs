use serde::{Deserialize, Serialize};
use std::fmt;

/// Address of a mailbox registered on a [`MessageBus`](crate::bus::MessageBus).
///
/// Allocated by the bus from a monotonically increasing counter, so ids are
/// never reused for the lifetime of a bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ListenerId(pub u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// Identifies the sending side of a message (one per [`Endpoint`](crate::bus::Endpoint)).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EndpointId {
    pub owner: String,
    pub seq: u64,
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.owner, self.seq)
    }
}

/// Numeric message kind carried by every envelope.
///
/// Values at or above [`MessageKind::TIMER_BASE`] are reserved for the timer
/// engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageKind(pub u32);

impl MessageKind {
    pub const TIMER_BASE: MessageKind = MessageKind(0x8000_0000);
    pub const TIMER_EXPIRE: MessageKind = MessageKind(0x8000_0001);

    pub fn is_timer(self) -> bool {
        self.0 >= Self::TIMER_BASE.0
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            MessageKind::TIMER_EXPIRE => write!(f, "timer.expire"),
            MessageKind(raw) => write!(f, "{raw:#x}"),
        }
    }
}

/// Delivery lane for a message. High-priority messages are always received
/// before normal ones queued on the same mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    #[default]
    Normal,
}

/// An addressed in-process message.
#[derive(Debug, Clone)]
pub struct Envelope<M> {
    pub kind: MessageKind,
    pub sender: EndpointId,
    pub destination: ListenerId,
    pub priority: Priority,
    pub body: M,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timer_kinds_are_reserved() {
        assert!(MessageKind::TIMER_EXPIRE.is_timer());
        assert!(MessageKind::TIMER_BASE.is_timer());
        assert!(!MessageKind(7).is_timer());
    }

    #[test]
    fn kind_display() {
        assert_eq!(MessageKind::TIMER_EXPIRE.to_string(), "timer.expire");
        assert_eq!(MessageKind(0x10).to_string(), "0x10");
    }

    #[test]
    fn priority_serializes_snake_case() {
        let json = serde_json::to_string(&Priority::High).unwrap();
        assert_eq!(json, r#""high""#);
    }
}
