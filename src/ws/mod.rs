//! Realtime layer: wire messages, the connection registry, and the event
//! router that fans domain events out to drivers, riders, and ride rooms.

pub mod messages;
pub mod registry;
pub mod router;

pub use messages::{ActorRole, ClientMessage, ServerEvent};
pub use registry::ConnectionRegistry;
pub use router::{spawn_event_pump, EventRouter};
