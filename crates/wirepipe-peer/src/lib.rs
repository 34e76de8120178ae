//! Connection management for the wirepipe framed TCP transport.
//!
//! This is the "just works" layer: dial or listen, exchange typed frames,
//! publish and subscribe to named JSON events, probe liveness, and let
//! keepalive hold idle connections open.
//!
//! ```no_run
//! use wirepipe_peer::{dial, PipeListener};
//!
//! let listener = PipeListener::bind("127.0.0.1:4550")?;
//! listener.on("greet", |sender, args| {
//!     println!("{:?} sent {args:?}", sender.peer_addr());
//! });
//! std::thread::spawn(move || listener.run());
//!
//! let pipe = dial("127.0.0.1:4550")?;
//! pipe.emit("greet", &[serde_json::json!("hello")])?;
//! # Ok::<(), wirepipe_peer::PipeError>(())
//! ```

pub mod config;
pub mod connector;
pub mod emitter;
pub mod error;
pub mod listener;
pub mod pipe;
pub mod rtt;
mod sync;

pub use config::PipeConfig;
pub use connector::{dial, dial_with_config, dial_with_emitter};
pub use emitter::{Emitter, ListenerId};
pub use error::{PipeError, Result};
pub use listener::PipeListener;
pub use pipe::{Pipe, CLOSED_EVENT};
pub use rtt::RttHandle;
