//! The per-connection state machine.
//!
//! A `Pipe` owns one TCP connection. A dedicated read thread drives the
//! frame loop (await header → read payload → dispatch); writes from any
//! thread serialize on a single write path so header and payload never
//! interleave with another writer's bytes. Control frames (linger, ping,
//! pong) are handled inside the read loop; every other frame type is
//! handed to the raw subscribers on a dispatch thread, which is also how
//! the built-in pub/sub layer receives its frames.

use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, RwLock};
use std::thread;
use std::time::Instant;

use bytes::{BufMut, Bytes, BytesMut};
use serde_json::Value;
use tracing::{debug, trace, warn};

use wirepipe_frame::{encode_header, frame_type, Frame, FrameError, Header, HEADER_SIZE};

use crate::config::PipeConfig;
use crate::emitter::{Emitter, ListenerId};
use crate::error::{PipeError, Result};
use crate::rtt::{RttHandle, RttSlot};
use crate::sync::{lock, read, write};

/// Payload assembly transfers at most this many bytes per sub-read.
const SUB_READ_SIZE: usize = 512;

/// Event emitted through the pipe's router when the connection reaches its
/// terminal closed state, with the pipe itself as the sender.
pub const CLOSED_EVENT: &str = "closed";

type RawSubscriber = Arc<dyn Fn(&Pipe, &Frame) + Send + Sync>;

struct Shared {
    /// Read side; also the shutdown handle that unblocks the read thread.
    stream: TcpStream,
    /// Serialized write path (cloned descriptor).
    writer: Mutex<TcpStream>,
    config: PipeConfig,
    emitter: Arc<Emitter>,
    linger: AtomicBool,
    closed: AtomicBool,
    last_write: Mutex<Instant>,
    ping_sent: Mutex<Option<Instant>>,
    rtt: Arc<RttSlot>,
    subscribers: RwLock<Vec<RawSubscriber>>,
    keepalive_stop: Mutex<Option<mpsc::Sender<()>>>,
    local_addr: Option<SocketAddr>,
    peer_addr: Option<SocketAddr>,
}

/// One framed connection. Cheap to clone; all clones share the same
/// underlying state.
#[derive(Clone)]
pub struct Pipe {
    shared: Arc<Shared>,
}

impl Pipe {
    /// Wrap a connected stream. The read loop is not running yet; callers
    /// follow up with [`start`](Self::start).
    pub(crate) fn from_stream(
        stream: TcpStream,
        emitter: Arc<Emitter>,
        config: PipeConfig,
    ) -> Result<Self> {
        stream.set_write_timeout(Some(config.write_timeout))?;
        let writer = stream.try_clone()?;
        let local_addr = stream.local_addr().ok();
        let peer_addr = stream.peer_addr().ok();

        let pipe = Self {
            shared: Arc::new(Shared {
                stream,
                writer: Mutex::new(writer),
                config,
                emitter,
                linger: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                last_write: Mutex::new(Instant::now()),
                ping_sent: Mutex::new(None),
                rtt: RttSlot::new(),
                subscribers: RwLock::new(Vec::new()),
                keepalive_stop: Mutex::new(None),
                local_addr,
                peer_addr,
            }),
        };
        pipe.subscribe(dispatch_pub_sub);
        Ok(pipe)
    }

    /// Spawn the read thread. Called exactly once, by dial or by the
    /// listener's accept loop.
    pub(crate) fn start(&self) -> Result<()> {
        let pipe = self.clone();
        thread::Builder::new()
            .name("wirepipe-read".into())
            .spawn(move || pipe.read_loop())?;
        Ok(())
    }

    /// Write one data frame: header then payload as one atomic unit under
    /// the write deadline. Returns the payload byte count.
    ///
    /// Zero-length chunks and chunks above `max_chunk` are rejected before
    /// anything touches the wire.
    pub fn write(&self, frame_type: u16, chunk: &[u8]) -> Result<usize> {
        let max = self.shared.config.max_chunk.min(u32::MAX as usize);
        if chunk.len() > max {
            return Err(FrameError::ChunkTooLarge {
                size: chunk.len(),
                max,
            }
            .into());
        }
        if chunk.is_empty() {
            return Err(FrameError::EmptyChunk.into());
        }
        self.write_frame(frame_type, chunk)
    }

    /// Encode `[event, args...]` as JSON and send it as a pub/sub frame.
    pub fn emit(&self, event: &str, args: &[Value]) -> Result<usize> {
        let mut list = Vec::with_capacity(args.len() + 1);
        list.push(Value::String(event.to_owned()));
        list.extend_from_slice(args);
        let encoded = serde_json::to_vec(&list)?;
        self.write(frame_type::PUB_SUB, &encoded)
    }

    /// Send a liveness probe and return the handle to await the measured
    /// round-trip time.
    ///
    /// The delivery slot has capacity one and keeps the latest
    /// measurement; pinging again before draining the handle simply
    /// replaces an unconsumed result.
    pub fn ping(&self) -> Result<RttHandle> {
        *lock(&self.shared.ping_sent) = Some(Instant::now());
        self.write_frame(frame_type::PING, &[])?;
        Ok(self.rtt())
    }

    /// Handle onto the RTT delivery slot.
    pub fn rtt(&self) -> RttHandle {
        RttHandle::new(Arc::clone(&self.shared.rtt))
    }

    /// Ask the peer to extend its idle read deadline for this connection,
    /// and extend our own for subsequent header waits.
    ///
    /// The extension is symmetric only if both ends call it.
    pub fn linger(&self) -> Result<()> {
        self.shared.linger.store(true, Ordering::SeqCst);
        self.write_frame(frame_type::LINGER, &[])?;
        Ok(())
    }

    /// Start the keepalive thread: every `ping_interval`, ping unless
    /// something was written since the last interval. The thread ends when
    /// a ping fails or the pipe closes.
    pub fn keepalive(&self) {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        *lock(&self.shared.keepalive_stop) = Some(stop_tx);

        let pipe = self.clone();
        let interval = self.shared.config.ping_interval;
        let spawned = thread::Builder::new()
            .name("wirepipe-keepalive".into())
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        let idle = lock(&pipe.shared.last_write).elapsed();
                        if idle >= interval && pipe.ping().is_err() {
                            return;
                        }
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
                }
            });
        if spawned.is_err() {
            warn!("failed to spawn keepalive thread");
        }
    }

    /// Append a raw-frame subscriber. Subscribers see every non-control
    /// frame as `(pipe, frame)` on a dispatch thread.
    pub fn subscribe<F>(&self, subscriber: F)
    where
        F: Fn(&Pipe, &Frame) + Send + Sync + 'static,
    {
        write(&self.shared.subscribers).push(Arc::new(subscriber));
    }

    /// Register an event handler on this pipe's router.
    pub fn on<F>(&self, event: &str, handler: F) -> ListenerId
    where
        F: Fn(&Pipe, &[Value]) + Send + Sync + 'static,
    {
        self.shared.emitter.on(event, handler)
    }

    /// Remove an event handler by its registration handle.
    pub fn off(&self, event: &str, id: ListenerId) -> bool {
        self.shared.emitter.off(event, id)
    }

    /// The event router this pipe delivers into. Shared with the listener
    /// for accepted pipes.
    pub fn emitter(&self) -> &Arc<Emitter> {
        &self.shared.emitter
    }

    /// Close the connection: unblocks the read thread, any blocked
    /// writer, and any RTT waiter, and stops the keepalive thread.
    ///
    /// Single-shot — a second call fails with
    /// [`PipeError::AlreadyClosed`].
    pub fn close(&self) -> Result<()> {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return Err(PipeError::AlreadyClosed);
        }
        self.teardown();
        Ok(())
    }

    /// True once the pipe has reached its terminal closed state.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Local socket address, captured at creation.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.shared.local_addr
    }

    /// Remote socket address, captured at creation.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.shared.peer_addr
    }

    fn read_loop(self) {
        loop {
            let header = match self.read_header() {
                Ok(header) => header,
                Err(err) => {
                    trace!(error = %err, "read loop ending");
                    break;
                }
            };
            if !header.is_valid() {
                warn!("invalid frame magic; closing");
                break;
            }
            match header.frame_type() {
                frame_type::LINGER => {
                    trace!("peer requested linger");
                    self.shared.linger.store(true, Ordering::SeqCst);
                }
                frame_type::PING => {
                    if self.write_frame(frame_type::PONG, &[]).is_err() {
                        break;
                    }
                }
                frame_type::PONG => self.record_pong(),
                other => {
                    let payload = match self.read_chunk(header.length()) {
                        Ok(payload) => payload,
                        Err(err) => {
                            debug!(error = %err, "payload read failed; closing");
                            break;
                        }
                    };
                    self.spawn_dispatch(Frame {
                        frame_type: other,
                        payload,
                    });
                }
            }
        }
        self.close_internal();
    }

    /// Read exactly 8 header bytes under the idle deadline selected by the
    /// linger flag.
    fn read_header(&self) -> Result<Header> {
        let idle = if self.shared.linger.load(Ordering::SeqCst) {
            self.shared.config.linger_timeout
        } else {
            self.shared.config.read_timeout
        };
        self.shared.stream.set_read_timeout(Some(idle))?;

        let mut buf = [0u8; HEADER_SIZE];
        let mut filled = 0;
        let mut stream = &self.shared.stream;
        while filled < HEADER_SIZE {
            match stream.read(&mut buf[filled..]) {
                Ok(0) => return Err(FrameError::ConnectionClosed.into()),
                Ok(count) => filled += count,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err).into()),
            }
        }
        Ok(Header::decode(&buf)?)
    }

    /// Read exactly `want` payload bytes in bounded sub-reads, each under
    /// the short read deadline regardless of the linger flag: payload
    /// assembly gets no extended idle grace once a header has arrived.
    fn read_chunk(&self, want: u32) -> Result<Bytes> {
        let want = want as usize;
        let max = self.shared.config.max_chunk;
        if want > max {
            return Err(FrameError::ChunkTooLarge { size: want, max }.into());
        }

        let mut buf = BytesMut::with_capacity(want);
        let mut stream = &self.shared.stream;
        while buf.len() < want {
            let take = (want - buf.len()).min(SUB_READ_SIZE);
            self.shared
                .stream
                .set_read_timeout(Some(self.shared.config.read_timeout))?;
            let mut chunk = [0u8; SUB_READ_SIZE];
            match stream.read(&mut chunk[..take]) {
                Ok(0) => return Err(FrameError::ConnectionClosed.into()),
                Ok(count) => buf.put_slice(&chunk[..count]),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err).into()),
            }
        }
        Ok(buf.freeze())
    }

    /// The single write path: every frame — explicit data, pub/sub, ping,
    /// pong, linger — goes through here. Header and payload are assembled
    /// into one buffer and written under the mutex, so concurrent writers
    /// never interleave on the wire.
    fn write_frame(&self, frame_type: u16, chunk: &[u8]) -> Result<usize> {
        if self.is_closed() {
            return Err(PipeError::Closed);
        }

        let mut wire = BytesMut::with_capacity(HEADER_SIZE + chunk.len());
        wire.put_slice(&encode_header(frame_type, chunk.len() as u32));
        wire.put_slice(chunk);

        {
            let mut writer = lock(&self.shared.writer);
            writer.write_all(&wire).map_err(FrameError::Io)?;
            writer.flush().map_err(FrameError::Io)?;
        }

        *lock(&self.shared.last_write) = Instant::now();
        Ok(chunk.len())
    }

    fn record_pong(&self) {
        match lock(&self.shared.ping_sent).take() {
            Some(sent_at) => self.shared.rtt.put(sent_at.elapsed()),
            None => warn!("dropping pong with no outstanding ping"),
        }
    }

    /// Hand a frame to the raw subscribers off the read thread, so a slow
    /// subscriber cannot stall the loop.
    fn spawn_dispatch(&self, frame: Frame) {
        let pipe = self.clone();
        let spawned = thread::Builder::new()
            .name("wirepipe-dispatch".into())
            .spawn(move || {
                let subscribers: Vec<RawSubscriber> = read(&pipe.shared.subscribers).clone();
                for subscriber in &subscribers {
                    subscriber(&pipe, &frame);
                }
            });
        if spawned.is_err() {
            warn!("failed to spawn dispatch thread");
        }
    }

    /// Close driven by the read loop; a no-op if the pipe was already
    /// closed explicitly.
    fn close_internal(&self) {
        if !self.shared.closed.swap(true, Ordering::SeqCst) {
            self.teardown();
        }
    }

    fn teardown(&self) {
        // Dropping the sender stops the keepalive thread at its next tick.
        lock(&self.shared.keepalive_stop).take();
        self.shared.rtt.close();
        if let Err(err) = self.shared.stream.shutdown(Shutdown::Both) {
            trace!(error = %err, "socket shutdown failed");
        }
        debug!(peer = ?self.shared.peer_addr, "pipe closed");
        self.shared.emitter.emit(CLOSED_EVENT, self, &[]);
    }
}

impl PartialEq for Pipe {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl Eq for Pipe {}

impl std::fmt::Debug for Pipe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipe")
            .field("local", &self.shared.local_addr)
            .field("peer", &self.shared.peer_addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Built-in subscriber translating pub/sub frames into router deliveries.
///
/// Undecodable payloads and non-string event keys are dropped with a
/// warning: the pub/sub layer is best-effort by contract.
fn dispatch_pub_sub(pipe: &Pipe, frame: &Frame) {
    if frame.frame_type != frame_type::PUB_SUB {
        return;
    }
    let values: Vec<Value> = match serde_json::from_slice(&frame.payload) {
        Ok(values) => values,
        Err(err) => {
            warn!(error = %err, "discarding pub/sub frame with undecodable payload");
            return;
        }
    };
    let Some(Value::String(event)) = values.first() else {
        warn!("discarding pub/sub frame without string event key");
        return;
    };
    pipe.shared.emitter.emit(event, pipe, &values[1..]);
}

#[cfg(test)]
pub(crate) mod testing {
    use std::io::Read;
    use std::net::{TcpListener, TcpStream};
    use std::sync::Arc;
    use std::time::Duration;

    use super::Pipe;
    use crate::config::PipeConfig;
    use crate::emitter::Emitter;

    pub(crate) fn test_config() -> PipeConfig {
        PipeConfig {
            max_chunk: 64 * 1024,
            read_timeout: Duration::from_millis(400),
            linger_timeout: Duration::from_millis(2500),
            write_timeout: Duration::from_millis(500),
            ping_interval: Duration::from_millis(150),
        }
    }

    fn stream_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback");
        let addr = listener.local_addr().expect("local addr");
        let accept = std::thread::spawn(move || listener.accept().expect("accept").0);
        let client = TcpStream::connect(addr).expect("connect");
        let server = accept.join().expect("accept thread");
        (client, server)
    }

    /// Two fully started pipes talking to each other, each with its own
    /// router.
    pub(crate) fn pipe_pair(config: PipeConfig) -> (Pipe, Pipe) {
        let (client_stream, server_stream) = stream_pair();
        let client = Pipe::from_stream(client_stream, Arc::new(Emitter::new()), config.clone())
            .expect("client pipe");
        client.start().expect("client read thread");
        let server =
            Pipe::from_stream(server_stream, Arc::new(Emitter::new()), config).expect("server pipe");
        server.start().expect("server read thread");
        (client, server)
    }

    /// One started pipe plus the raw peer socket, for tests that need to
    /// observe or forge wire bytes.
    pub(crate) fn raw_pair(config: PipeConfig) -> (Pipe, TcpStream) {
        let (client_stream, server_stream) = stream_pair();
        let pipe = Pipe::from_stream(client_stream, Arc::new(Emitter::new()), config)
            .expect("client pipe");
        pipe.start().expect("client read thread");
        (pipe, server_stream)
    }

    /// Read one whole frame off a raw socket.
    pub(crate) fn read_frame_raw(stream: &mut TcpStream) -> std::io::Result<(u16, Vec<u8>)> {
        let mut header = [0u8; wirepipe_frame::HEADER_SIZE];
        stream.read_exact(&mut header)?;
        let header = wirepipe_frame::Header::decode(&header)
            .map_err(|err| std::io::Error::other(err.to_string()))?;
        let mut payload = vec![0u8; header.length() as usize];
        if !payload.is_empty() {
            stream.read_exact(&mut payload)?;
        }
        Ok((header.frame_type(), payload))
    }

    /// Poll until the pipe reports closed or the deadline passes.
    pub(crate) fn wait_closed(pipe: &Pipe, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        while std::time::Instant::now() < deadline {
            if pipe.is_closed() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        pipe.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read as _, Write as _};
    use std::sync::mpsc;
    use std::time::{Duration, Instant};

    use super::testing::{pipe_pair, raw_pair, read_frame_raw, test_config, wait_closed};
    use super::*;

    #[test]
    fn data_frame_roundtrip() {
        let (client, server) = pipe_pair(test_config());
        let (tx, rx) = mpsc::channel();
        server.subscribe(move |_pipe, frame| {
            let _ = tx.send((frame.frame_type, frame.payload.to_vec()));
        });

        let written = client.write(300, b"hello wirepipe").expect("write");
        assert_eq!(written, 14);

        let (received_type, payload) = rx
            .recv_timeout(Duration::from_secs(2))
            .expect("frame should arrive");
        assert_eq!(received_type, 300);
        assert_eq!(payload, b"hello wirepipe");
    }

    #[test]
    fn large_payload_spans_sub_reads() {
        let (client, server) = pipe_pair(test_config());
        let (tx, rx) = mpsc::channel();
        server.subscribe(move |_pipe, frame| {
            let _ = tx.send(frame.payload.to_vec());
        });

        let payload: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
        client.write(300, &payload).expect("write");

        let received = rx
            .recv_timeout(Duration::from_secs(2))
            .expect("frame should arrive");
        assert_eq!(received, payload);
    }

    #[test]
    fn zero_length_data_frame_dispatches_empty_payload() {
        let (pipe, mut peer) = raw_pair(test_config());
        let (tx, rx) = mpsc::channel();
        pipe.subscribe(move |_pipe, frame| {
            let _ = tx.send((frame.frame_type, frame.payload.len()));
        });

        peer.write_all(&encode_header(300, 0)).expect("raw write");

        let (received_type, len) = rx
            .recv_timeout(Duration::from_secs(2))
            .expect("frame should arrive");
        assert_eq!(received_type, 300);
        assert_eq!(len, 0);
    }

    #[test]
    fn write_rejects_empty_chunk() {
        let (client, mut peer) = raw_pair(test_config());

        let err = client.write(300, b"").unwrap_err();
        assert!(matches!(err, PipeError::Frame(FrameError::EmptyChunk)));

        // Nothing may have touched the wire.
        peer.set_read_timeout(Some(Duration::from_millis(100)))
            .expect("set timeout");
        assert!(read_frame_raw(&mut peer).is_err());
    }

    #[test]
    fn write_rejects_oversize_chunk() {
        let config = test_config();
        let max = config.max_chunk;
        let (client, mut peer) = raw_pair(config);

        let err = client.write(300, &vec![0u8; max + 1]).unwrap_err();
        assert!(matches!(
            err,
            PipeError::Frame(FrameError::ChunkTooLarge { size, .. }) if size == max + 1
        ));

        peer.set_read_timeout(Some(Duration::from_millis(100)))
            .expect("set timeout");
        assert!(read_frame_raw(&mut peer).is_err());
    }

    #[test]
    fn concurrent_writers_do_not_interleave() {
        let (client, server) = pipe_pair(test_config());
        let (tx, rx) = mpsc::channel();
        server.subscribe(move |_pipe, frame| {
            let _ = tx.send(frame.clone());
        });

        let writers: Vec<_> = (0u8..3)
            .map(|fill| {
                let client = client.clone();
                std::thread::spawn(move || {
                    for _ in 0..20 {
                        client
                            .write(300 + u16::from(fill), &[fill; 700])
                            .expect("concurrent write");
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().expect("writer thread");
        }

        for _ in 0..60 {
            let frame = rx
                .recv_timeout(Duration::from_secs(2))
                .expect("frame should arrive");
            let fill = (frame.frame_type - 300) as u8;
            assert_eq!(frame.payload.len(), 700);
            assert!(frame.payload.iter().all(|byte| *byte == fill));
        }
    }

    #[test]
    fn ping_round_trip_measures_rtt() {
        let (client, _server) = pipe_pair(test_config());

        let started = Instant::now();
        let handle = client.ping().expect("ping");
        let rtt = handle
            .recv_timeout(Duration::from_secs(2))
            .expect("rtt should be delivered");

        assert!(rtt <= started.elapsed());
    }

    #[test]
    fn ping_is_answered_with_pong() {
        let (_pipe, mut peer) = raw_pair(test_config());

        peer.write_all(&encode_header(frame_type::PING, 0))
            .expect("raw ping");
        peer.set_read_timeout(Some(Duration::from_secs(2)))
            .expect("set timeout");

        let (received_type, payload) = read_frame_raw(&mut peer).expect("pong should arrive");
        assert_eq!(received_type, frame_type::PONG);
        assert!(payload.is_empty());
    }

    #[test]
    fn unsolicited_pong_is_dropped() {
        let (pipe, mut peer) = raw_pair(test_config());

        peer.write_all(&encode_header(frame_type::PONG, 0))
            .expect("raw pong");

        // No measurement may appear, and the pipe must stay usable.
        let err = pipe
            .rtt()
            .recv_timeout(Duration::from_millis(150))
            .unwrap_err();
        assert!(matches!(err, PipeError::Timeout(_)));
        assert!(!pipe.is_closed());

        // A real ping still round-trips.
        let handle = pipe.ping().expect("ping");
        peer.set_read_timeout(Some(Duration::from_secs(2)))
            .expect("set timeout");
        let (received_type, _) = read_frame_raw(&mut peer).expect("ping should arrive");
        assert_eq!(received_type, frame_type::PING);
        peer.write_all(&encode_header(frame_type::PONG, 0))
            .expect("raw pong reply");
        handle
            .recv_timeout(Duration::from_secs(2))
            .expect("rtt should be delivered");
    }

    #[test]
    fn corrupted_magic_closes_pipe() {
        let (pipe, mut peer) = raw_pair(test_config());

        peer.write_all(&[0xDE, 0xAD, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00])
            .expect("raw write");

        assert!(wait_closed(&pipe, Duration::from_secs(2)));
        assert!(matches!(
            pipe.write(300, b"x").unwrap_err(),
            PipeError::Closed
        ));
    }

    #[test]
    fn idle_past_read_timeout_closes_pipe() {
        let (pipe, _peer) = raw_pair(test_config());
        assert!(wait_closed(&pipe, Duration::from_secs(3)));
    }

    #[test]
    fn linger_frame_extends_idle_deadline() {
        let config = test_config();
        let gap = config.read_timeout + Duration::from_millis(300);
        let (pipe, mut peer) = raw_pair(config);
        let (tx, rx) = mpsc::channel();
        pipe.subscribe(move |_pipe, frame| {
            let _ = tx.send(frame.payload.to_vec());
        });

        peer.write_all(&encode_header(frame_type::LINGER, 0))
            .expect("linger frame");
        std::thread::sleep(gap);
        assert!(!pipe.is_closed());

        peer.write_all(&encode_header(300, 5)).expect("header");
        peer.write_all(b"after").expect("payload");
        let payload = rx
            .recv_timeout(Duration::from_secs(2))
            .expect("frame should arrive after the gap");
        assert_eq!(payload, b"after");
    }

    #[test]
    fn same_idle_gap_without_linger_closes_pipe() {
        let config = test_config();
        let gap = config.read_timeout + Duration::from_millis(300);
        let (pipe, _peer) = raw_pair(config);

        std::thread::sleep(gap);
        assert!(wait_closed(&pipe, Duration::from_secs(1)));
    }

    #[test]
    fn local_linger_call_extends_own_deadline() {
        let config = test_config();
        let gap = config.read_timeout + Duration::from_millis(300);
        let (pipe, mut peer) = raw_pair(config);

        pipe.linger().expect("linger");
        peer.set_read_timeout(Some(Duration::from_secs(2)))
            .expect("set timeout");
        let (received_type, _) = read_frame_raw(&mut peer).expect("linger frame should arrive");
        assert_eq!(received_type, frame_type::LINGER);

        std::thread::sleep(gap);
        assert!(!pipe.is_closed());
    }

    #[test]
    fn oversize_declared_length_closes_pipe() {
        let config = test_config();
        let declared = (config.max_chunk + 1) as u32;
        let (pipe, mut peer) = raw_pair(config);

        peer.write_all(&encode_header(300, declared))
            .expect("raw header");

        assert!(wait_closed(&pipe, Duration::from_secs(2)));
    }

    #[test]
    fn emit_delivers_event_with_args() {
        let (client, server) = pipe_pair(test_config());
        let (tx, rx) = mpsc::channel();
        let client_addr = client.local_addr();
        server.on("greet", move |sender, args| {
            let _ = tx.send((sender.peer_addr(), args.to_vec()));
        });

        client.emit("greet", &[Value::from("hello")]).expect("emit");

        let (sender_peer, args) = rx
            .recv_timeout(Duration::from_secs(2))
            .expect("handler should run");
        assert_eq!(sender_peer, client_addr);
        assert_eq!(args, vec![Value::from("hello")]);
        assert!(matches!(
            rx.recv_timeout(Duration::from_millis(200)),
            Err(mpsc::RecvTimeoutError::Timeout)
        ));
    }

    #[test]
    fn emit_without_args_delivers_empty_slice() {
        let (client, server) = pipe_pair(test_config());
        let (tx, rx) = mpsc::channel();
        server.on("ping-test", move |_sender, args| {
            let _ = tx.send(args.to_vec());
        });

        client.emit("ping-test", &[]).expect("emit");

        let args = rx
            .recv_timeout(Duration::from_secs(2))
            .expect("handler should run");
        assert!(args.is_empty());
    }

    #[test]
    fn undecodable_pub_sub_frames_are_swallowed() {
        let (client, server) = pipe_pair(test_config());
        let (tx, rx) = mpsc::channel();
        server.on("still-alive", move |_sender, _args| {
            let _ = tx.send(());
        });

        // Not JSON at all, then a JSON array without a string key: both
        // dropped without closing the connection.
        client
            .write(frame_type::PUB_SUB, b"not-json")
            .expect("write");
        client.write(frame_type::PUB_SUB, b"[42]").expect("write");
        client.emit("still-alive", &[]).expect("emit");

        rx.recv_timeout(Duration::from_secs(2))
            .expect("later event should still be delivered");
    }

    #[test]
    fn close_is_single_shot() {
        let (client, _server) = pipe_pair(test_config());

        client.close().expect("first close");
        assert!(matches!(
            client.close().unwrap_err(),
            PipeError::AlreadyClosed
        ));
    }

    #[test]
    fn close_unblocks_rtt_wait() {
        let (pipe, _peer) = raw_pair(test_config());

        let handle = pipe.ping().expect("ping");
        let waiter = std::thread::spawn(move || handle.recv());
        std::thread::sleep(Duration::from_millis(50));

        pipe.close().expect("close");
        let err = waiter.join().expect("waiter thread").unwrap_err();
        assert!(matches!(err, PipeError::Closed));
    }

    #[test]
    fn write_after_close_fails() {
        let (client, _server) = pipe_pair(test_config());
        client.close().expect("close");

        assert!(matches!(
            client.write(300, b"x").unwrap_err(),
            PipeError::Closed
        ));
        assert!(matches!(client.ping().unwrap_err(), PipeError::Closed));
    }

    #[test]
    fn peer_close_emits_closed_event() {
        let (client, server) = pipe_pair(test_config());
        let (tx, rx) = mpsc::channel();
        client.on(CLOSED_EVENT, move |_sender, _args| {
            let _ = tx.send(());
        });

        server.close().expect("close server side");

        rx.recv_timeout(Duration::from_secs(2))
            .expect("closed event should fire");
        assert!(wait_closed(&client, Duration::from_secs(2)));
    }

    #[test]
    fn keepalive_pings_idle_pipe() {
        let (pipe, mut peer) = raw_pair(test_config());
        pipe.keepalive();

        peer.set_read_timeout(Some(Duration::from_secs(2)))
            .expect("set timeout");
        let (received_type, _) = read_frame_raw(&mut peer).expect("keepalive ping should arrive");
        assert_eq!(received_type, frame_type::PING);
    }

    #[test]
    fn keepalive_suppressed_by_writes() {
        let config = test_config();
        let interval = config.ping_interval;
        let (pipe, mut peer) = raw_pair(config);
        // Extend the pipe's own idle deadline so it outlives the
        // observation window without inbound traffic.
        peer.write_all(&encode_header(frame_type::LINGER, 0))
            .expect("linger frame");
        pipe.keepalive();

        // Write well inside every interval for the whole observation
        // window, so the idle check never trips.
        let writer = {
            let pipe = pipe.clone();
            std::thread::spawn(move || {
                for _ in 0..20 {
                    pipe.write(300, b"busy").expect("write");
                    std::thread::sleep(interval / 3);
                }
            })
        };

        peer.set_read_timeout(Some(interval * 4)).expect("set timeout");
        let observation = Instant::now();
        while observation.elapsed() < interval * 4 {
            match read_frame_raw(&mut peer) {
                Ok((received_type, _)) => assert_ne!(
                    received_type,
                    frame_type::PING,
                    "keepalive must not ping an actively writing pipe"
                ),
                Err(_) => break,
            }
        }
        writer.join().expect("writer thread");
    }

    #[test]
    fn keepalive_stops_on_close() {
        let (pipe, peer) = raw_pair(test_config());
        pipe.keepalive();
        pipe.close().expect("close");

        // Drain whatever was in flight; after the shutdown the peer sees
        // EOF, never a late ping.
        peer.set_read_timeout(Some(Duration::from_secs(1)))
            .expect("set timeout");
        let mut buf = [0u8; 64];
        loop {
            match (&peer).read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(_) => continue,
            }
        }
    }
}
