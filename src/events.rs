//! Event subscriptions and delivery configuration.

use bitflags::bitflags;

use crate::rpc::message::Message;
use crate::rpc::payload::ServerEvent;

bitflags! {
    /// Subscribable server events as a mask.
    ///
    /// The façade diffs a requested mask against the current one and emits a
    /// SUBSCRIBE/UNSUBSCRIBE command per changed bit; the mask itself only
    /// updates when Discord acknowledges.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct EventFlags: u8 {
        /// Another user accepted our join invitation.
        const JOIN         = 0b001;
        /// Another user started spectating.
        const SPECTATE     = 0b010;
        /// Another user asked to join.
        const JOIN_REQUEST = 0b100;
    }
}

impl EventFlags {
    /// The wire event behind one flag bit. `None` for compound masks.
    pub fn server_event(self) -> Option<ServerEvent> {
        if self == EventFlags::JOIN {
            Some(ServerEvent::ActivityJoin)
        } else if self == EventFlags::SPECTATE {
            Some(ServerEvent::ActivitySpectate)
        } else if self == EventFlags::JOIN_REQUEST {
            Some(ServerEvent::ActivityJoinRequest)
        } else {
            None
        }
    }

    /// The flag bit for a wire event, if it is subscribable.
    pub fn from_server_event(event: ServerEvent) -> Option<Self> {
        match event {
            ServerEvent::ActivityJoin => Some(EventFlags::JOIN),
            ServerEvent::ActivitySpectate => Some(EventFlags::SPECTATE),
            ServerEvent::ActivityJoinRequest => Some(EventFlags::JOIN_REQUEST),
            _ => None,
        }
    }

    /// The wire events of every set bit.
    pub fn server_events(self) -> Vec<ServerEvent> {
        self.iter().filter_map(EventFlags::server_event).collect()
    }
}

/// How inbound messages reach the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EventDelivery {
    /// The event handler runs on the worker thread as messages arrive.
    Auto,
    /// Messages queue until the caller drains them with
    /// [`invoke`](crate::DiscordClient::invoke).
    #[default]
    Manual,
}

/// Callback receiving every message after the client applied its state rules.
pub type EventHandler = dyn Fn(&Message) + Send + Sync;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_event_mapping_is_bijective() {
        for flag in [EventFlags::JOIN, EventFlags::SPECTATE, EventFlags::JOIN_REQUEST] {
            let event = flag.server_event().unwrap();
            assert_eq!(EventFlags::from_server_event(event), Some(flag));
        }
        assert!(EventFlags::from_server_event(ServerEvent::Ready).is_none());
        assert!((EventFlags::JOIN | EventFlags::SPECTATE).server_event().is_none());
    }

    #[test]
    fn subscribe_then_unsubscribe_restores_mask() {
        let mut mask = EventFlags::empty();
        mask |= EventFlags::SPECTATE;
        mask &= !EventFlags::SPECTATE;
        assert_eq!(mask, EventFlags::empty());
    }

    #[test]
    fn server_events_lists_set_bits() {
        let mask = EventFlags::JOIN | EventFlags::JOIN_REQUEST;
        let events = mask.server_events();
        assert_eq!(
            events,
            vec![ServerEvent::ActivityJoin, ServerEvent::ActivityJoinRequest]
        );
    }
}
