//! Live connection registry and ride rooms.
//!
//! Each connection hands the registry an unbounded sender for its writer
//! task; delivery is at-most-once — a send to a closed or missing channel is
//! dropped, never queued for replay.

use crate::domain::{ActorId, RideId};
use crate::ws::messages::ServerEvent;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    actors: Mutex<HashMap<ActorId, mpsc::UnboundedSender<ServerEvent>>>,
    rooms: Mutex<HashMap<RideId, HashSet<ActorId>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind an actor id to a connection's outbound channel. A reconnecting
    /// actor replaces the previous binding; the stale channel just closes.
    pub fn register(&self, actor: ActorId, sender: mpsc::UnboundedSender<ServerEvent>) {
        let mut actors = self.actors.lock().expect("actor registry poisoned");
        if actors.insert(actor.clone(), sender).is_some() {
            debug!(actor = %actor, "existing connection replaced");
        }
    }

    /// Drop the actor's binding and any room memberships.
    pub fn unregister(&self, actor: &ActorId) {
        let mut actors = self.actors.lock().expect("actor registry poisoned");
        actors.remove(actor);
        drop(actors);

        let mut rooms = self.rooms.lock().expect("ride rooms poisoned");
        for members in rooms.values_mut() {
            members.remove(actor);
        }
        rooms.retain(|_, members| !members.is_empty());
    }

    pub fn is_registered(&self, actor: &ActorId) -> bool {
        let actors = self.actors.lock().expect("actor registry poisoned");
        actors.contains_key(actor)
    }

    /// Deliver an event to one actor. Returns false if the actor has no live
    /// connection (the event is dropped).
    pub fn send_to_actor(&self, actor: &ActorId, event: ServerEvent) -> bool {
        let actors = self.actors.lock().expect("actor registry poisoned");
        match actors.get(actor) {
            Some(sender) => sender.send(event).is_ok(),
            None => {
                debug!(actor = %actor, "event dropped: no live connection");
                false
            }
        }
    }

    /// Add an actor to a ride room.
    pub fn subscribe(&self, ride_id: &RideId, actor: ActorId) {
        let mut rooms = self.rooms.lock().expect("ride rooms poisoned");
        rooms.entry(ride_id.clone()).or_default().insert(actor);
    }

    /// Deliver an event to every room member with a live connection,
    /// optionally skipping one actor (the originator).
    pub fn broadcast_ride(&self, ride_id: &RideId, event: &ServerEvent, exclude: Option<&ActorId>) {
        let members: Vec<ActorId> = {
            let rooms = self.rooms.lock().expect("ride rooms poisoned");
            match rooms.get(ride_id) {
                Some(members) => members.iter().cloned().collect(),
                None => return,
            }
        };
        for member in members {
            if exclude == Some(&member) {
                continue;
            }
            self.send_to_actor(&member, event.clone());
        }
    }

    /// Tear down a ride room once the ride is terminal.
    pub fn drop_room(&self, ride_id: &RideId) {
        let mut rooms = self.rooms.lock().expect("ride rooms poisoned");
        rooms.remove(ride_id);
    }

    #[cfg(test)]
    pub fn room_size(&self, ride_id: &RideId) -> usize {
        let rooms = self.rooms.lock().expect("ride rooms poisoned");
        rooms.get(ride_id).map(|m| m.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actor(id: &str) -> ActorId {
        ActorId::new(id)
    }

    fn channel() -> (
        mpsc::UnboundedSender<ServerEvent>,
        mpsc::UnboundedReceiver<ServerEvent>,
    ) {
        mpsc::unbounded_channel()
    }

    #[tokio::test]
    async fn test_send_to_registered_actor() {
        let registry = ConnectionRegistry::new();
        let (tx, mut rx) = channel();
        registry.register(actor("r-1"), tx);

        assert!(registry.send_to_actor(
            &actor("r-1"),
            ServerEvent::RideSearching {
                message: "searching".into()
            }
        ));
        assert!(matches!(
            rx.recv().await,
            Some(ServerEvent::RideSearching { .. })
        ));
    }

    #[tokio::test]
    async fn test_send_to_unknown_actor_is_dropped() {
        let registry = ConnectionRegistry::new();
        assert!(!registry.send_to_actor(
            &actor("ghost"),
            ServerEvent::RideStarted {
                ride_id: "x".into()
            }
        ));
    }

    #[tokio::test]
    async fn test_broadcast_with_exclusion() {
        let registry = ConnectionRegistry::new();
        let ride = RideId::new("ride-1");
        let (driver_tx, mut driver_rx) = channel();
        let (rider_tx, mut rider_rx) = channel();
        registry.register(actor("d-1"), driver_tx);
        registry.register(actor("r-1"), rider_tx);
        registry.subscribe(&ride, actor("d-1"));
        registry.subscribe(&ride, actor("r-1"));

        let event = ServerEvent::RideStarted {
            ride_id: "ride-1".into(),
        };
        registry.broadcast_ride(&ride, &event, Some(&actor("d-1")));

        assert!(matches!(
            rider_rx.recv().await,
            Some(ServerEvent::RideStarted { .. })
        ));
        assert!(driver_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unregister_clears_room_membership() {
        let registry = ConnectionRegistry::new();
        let ride = RideId::new("ride-1");
        let (tx, _rx) = channel();
        registry.register(actor("r-1"), tx);
        registry.subscribe(&ride, actor("r-1"));
        assert_eq!(registry.room_size(&ride), 1);

        registry.unregister(&actor("r-1"));
        assert_eq!(registry.room_size(&ride), 0);
        assert!(!registry.is_registered(&actor("r-1")));
    }

    #[tokio::test]
    async fn test_drop_room_silences_broadcasts() {
        let registry = ConnectionRegistry::new();
        let ride = RideId::new("ride-1");
        let (tx, mut rx) = channel();
        registry.register(actor("r-1"), tx);
        registry.subscribe(&ride, actor("r-1"));

        registry.drop_room(&ride);
        registry.broadcast_ride(
            &ride,
            &ServerEvent::RideStarted {
                ride_id: "ride-1".into(),
            },
            None,
        );
        assert!(rx.try_recv().is_err());
    }
}
