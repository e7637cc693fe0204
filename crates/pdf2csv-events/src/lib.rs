// pdf2csv-events - Event bus and WebSocket fan-out
//
// The bus is a typed broadcast channel carrying lifecycle events; handlers
// subscribe explicitly and run in their own tasks, so a slow or failing
// subscriber never blocks the publisher. The hub is the only subscriber that
// touches sockets: it serializes each event once, keeps a bounded
// per-collection replay buffer, and drops clients whose write backlog fills.

mod bus;
mod hub;
mod replay;

pub use bus::EventBus;
pub use hub::{ClientId, WebSocketHub};
pub use replay::{ReplayBuffer, REPLAY_CAPACITY, REPLAY_TTL};
