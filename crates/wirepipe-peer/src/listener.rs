use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, RwLock};
use std::thread;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::PipeConfig;
use crate::emitter::{Emitter, ListenerId};
use crate::error::{PipeError, Result};
use crate::pipe::Pipe;
use crate::sync::{read, write};

/// Consecutive accept failures tolerated before `run` gives up.
const MAX_ACCEPT_FAILURES: u32 = 5;
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

type PipeObserver = Arc<dyn Fn(&Pipe) + Send + Sync>;

/// Accepts connections and wraps each into a [`Pipe`] sharing one event
/// router, so pub/sub events from any accepted connection fan out through
/// the same handlers. Handlers disambiguate origin via the sender
/// argument.
pub struct PipeListener {
    listener: TcpListener,
    emitter: Arc<Emitter>,
    observers: RwLock<Vec<PipeObserver>>,
    config: PipeConfig,
}

impl PipeListener {
    /// Bind a listening socket with default configuration.
    pub fn bind(addr: &str) -> Result<Self> {
        Self::bind_with_config(addr, PipeConfig::default())
    }

    /// Bind with explicit per-connection configuration.
    pub fn bind_with_config(addr: &str, config: PipeConfig) -> Result<Self> {
        let listener = TcpListener::bind(addr).map_err(|source| PipeError::Bind {
            addr: addr.to_owned(),
            source,
        })?;
        info!(%addr, "listening");
        Ok(Self {
            listener,
            emitter: Arc::new(Emitter::new()),
            observers: RwLock::new(Vec::new()),
            config,
        })
    }

    /// The bound socket address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// The event router shared by every accepted pipe.
    pub fn emitter(&self) -> &Arc<Emitter> {
        &self.emitter
    }

    /// Register an observer notified once per accepted connection.
    pub fn subscribe<F>(&self, observer: F)
    where
        F: Fn(&Pipe) + Send + Sync + 'static,
    {
        write(&self.observers).push(Arc::new(observer));
    }

    /// Register an event handler on the shared router.
    pub fn on<F>(&self, event: &str, handler: F) -> ListenerId
    where
        F: Fn(&Pipe, &[Value]) + Send + Sync + 'static,
    {
        self.emitter.on(event, handler)
    }

    /// Remove an event handler by its registration handle.
    pub fn off(&self, event: &str, id: ListenerId) -> bool {
        self.emitter.off(event, id)
    }

    /// Accept connections without bound, for the lifetime of the call.
    ///
    /// Accept failures are retried with a short delay; after
    /// `MAX_ACCEPT_FAILURES` consecutive failures the loop gives up and
    /// returns [`PipeError::AcceptFailed`]. A successful accept resets the
    /// failure count.
    pub fn run(&self) -> Result<()> {
        let mut failures = 0u32;
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    failures = 0;
                    debug!(%addr, "accepted connection");
                    if let Err(err) = self.start_pipe(stream) {
                        warn!(error = %err, "failed to start accepted pipe");
                    }
                }
                Err(source) => {
                    failures += 1;
                    warn!(error = %source, failures, "accept failed");
                    if failures >= MAX_ACCEPT_FAILURES {
                        return Err(PipeError::AcceptFailed { failures, source });
                    }
                    thread::sleep(ACCEPT_RETRY_DELAY);
                }
            }
        }
    }

    /// Wrap an accepted stream exactly as dial does, start its read
    /// thread, and notify the per-connection observers off the accept
    /// loop.
    fn start_pipe(&self, stream: TcpStream) -> Result<()> {
        let pipe = Pipe::from_stream(stream, Arc::clone(&self.emitter), self.config.clone())?;
        pipe.start()?;

        let observers: Vec<PipeObserver> = read(&self.observers).clone();
        if observers.is_empty() {
            return Ok(());
        }
        let observed = pipe.clone();
        thread::Builder::new()
            .name("wirepipe-observe".into())
            .spawn(move || {
                for observer in &observers {
                    observer(&observed);
                }
            })?;
        Ok(())
    }
}

impl std::fmt::Debug for PipeListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipeListener")
            .field("local", &self.listener.local_addr().ok())
            .finish()
    }
}
