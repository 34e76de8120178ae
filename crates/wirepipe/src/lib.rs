//! Framed TCP message transport with pub/sub events.
//!
//! wirepipe exchanges discrete typed frames over one TCP connection and
//! layers a named-event publish/subscribe channel, a ping/RTT probe, and
//! an idle-timeout extension (linger) on top.
//!
//! # Crate Structure
//!
//! - [`frame`] — frame header codec and reserved type registry
//! - [`peer`] — connection state machine, event router, dial and listen

/// Re-export frame types.
pub mod frame {
    pub use wirepipe_frame::*;
}

/// Re-export peer types.
pub mod peer {
    pub use wirepipe_peer::*;
}
