//! Connection lifecycle controller
//!
//! One [`LifecycleController`] actor runs per configured connection. It owns
//! the connection's [`ConnectionState`] and processes commands from
//! [`LifecycleHandle`]s, results of the broker I/O tasks it spawned, and
//! callbacks of its broker handles, strictly one at a time.
//!
//! ```text
//! Disconnected --connect--> Connecting --handshake + subscriptions--> Connected
//!      ^                        |                                      |
//!      |                        +--failure--> Failed <--lost-----------+
//!      +------ Disconnecting <--disconnect--------------------------------+
//! ```

mod controller;
mod handle;
mod session;
mod state;


pub use controller::LifecycleController;
pub use handle::{ControllerTask, LifecycleHandle};
pub use state::{ConnectionEvent, ConnectionState};
