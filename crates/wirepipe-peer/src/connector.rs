use std::net::TcpStream;
use std::sync::Arc;

use tracing::debug;

use crate::config::PipeConfig;
use crate::emitter::Emitter;
use crate::error::{PipeError, Result};
use crate::pipe::Pipe;

/// Connect to a listening endpoint with default configuration.
///
/// The returned pipe owns a fresh event router and a running read thread.
pub fn dial(addr: &str) -> Result<Pipe> {
    dial_with_config(addr, PipeConfig::default())
}

/// Connect with explicit configuration.
pub fn dial_with_config(addr: &str, config: PipeConfig) -> Result<Pipe> {
    dial_with_emitter(addr, Arc::new(Emitter::new()), config)
}

/// Connect and deliver pub/sub events into a caller-supplied router.
pub fn dial_with_emitter(addr: &str, emitter: Arc<Emitter>, config: PipeConfig) -> Result<Pipe> {
    let stream = TcpStream::connect(addr).map_err(|source| PipeError::Connect {
        addr: addr.to_owned(),
        source,
    })?;
    debug!(%addr, "connected");

    let pipe = Pipe::from_stream(stream, emitter, config)?;
    pipe.start()?;
    Ok(pipe)
}
