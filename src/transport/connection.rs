//! Typed-message connections over ZeroMQ sockets.
//!
//! A [`Connection`] owns one socket in one of five [`Role`]s and moves whole
//! frames across it. Each frame travels as a single multi-part message:
//!
//! ```text
//! [routing identity]   only on Server/Worker sockets
//! [frame header]       protocol id, message index, payload size
//! [payload]            exactly `payload size` bytes
//! ```
//!
//! Receiving is bounded by a caller supplied timeout and reports one of three
//! outcomes through [`Receipt`]: a frame, a timeout, or a malformed message.
//! Malformed messages are consumed in full, so the next receive always starts
//! on a message boundary and the connection never needs to be reopened.
//!
//! Connections do no locking. A connection may move between threads but must
//! be used by one thread at a time.
//!
//! # Example
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use sdms::protocol::{self, PingRequest};
//! use sdms::transport::{Connection, ProtocolRegistry, Receipt, Role};
//!
//! let mut registry = ProtocolRegistry::new();
//! protocol::register(&mut registry).unwrap();
//!
//! let mut client = Connection::tcp(Role::Client, "localhost", 5800, Arc::new(registry)).unwrap();
//! client.send(&PingRequest::default(), None).unwrap();
//!
//! if let Receipt::Ready((reply, _)) = client.receive_message(5000).unwrap() {
//!     println!("reply: {reply:?}");
//! }
//! ```
use std::{fmt, sync::Arc};

use log::{debug, trace, warn};

use super::{
    FrameHeader, MAX_ROUTING_ID_LEN, Message, MessageBuffer, MessageId, ProtocolRegistry, codec,
    error::{ConnectionError, Malformed},
};

/// Socket topology of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// ROUTER socket, bound. Replies to individual peers by routing identity.
    Server,
    /// DEALER socket, connected. Backend peer of a server that carries routing
    /// identities through.
    Worker,
    /// DEALER socket, connected. One session with one server.
    Client,
    /// PUB socket, bound. Send only.
    Publisher,
    /// SUB socket, connected, subscribed to everything. Receive only.
    Subscriber,
}

impl Role {
    pub fn socket_type(self) -> zmq::SocketType {
        match self {
            Role::Server => zmq::SocketType::ROUTER,
            Role::Worker | Role::Client => zmq::SocketType::DEALER,
            Role::Publisher => zmq::SocketType::PUB,
            Role::Subscriber => zmq::SocketType::SUB,
        }
    }

    pub fn binds(self) -> bool {
        match self {
            Role::Server | Role::Publisher => true,
            Role::Worker | Role::Client | Role::Subscriber => false,
        }
    }

    /// Whether frames carry a routing identity part.
    pub fn routes(self) -> bool {
        match self {
            Role::Server | Role::Worker => true,
            Role::Client | Role::Publisher | Role::Subscriber => false,
        }
    }

    fn expected_parts(self) -> &'static str {
        match self {
            Role::Server => "3",
            Role::Worker => "2 or 3",
            Role::Client | Role::Publisher | Role::Subscriber => "2",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::Server => "server",
            Role::Worker => "worker",
            Role::Client => "client",
            Role::Publisher => "publisher",
            Role::Subscriber => "subscriber",
        };
        f.write_str(name)
    }
}

/// Opaque peer address assigned by a ROUTER socket. Echo it back unchanged to
/// reply to the same peer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoutingId(Vec<u8>);

impl RoutingId {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&[u8]> for RoutingId {
    fn from(value: &[u8]) -> Self {
        Self(value.to_vec())
    }
}

/// Where a received frame came from and what it is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub id: MessageId,
    pub routing_id: Option<RoutingId>,
}

/// Outcome of a receive that did not hit a transport failure.
#[derive(Debug)]
pub enum Receipt<T> {
    Ready(T),
    /// Nothing arrived within the timeout.
    TimedOut,
    /// A message arrived but was rejected; it has been discarded.
    Malformed(Malformed),
}

impl<T> Receipt<T> {
    pub fn ready(self) -> Option<T> {
        match self {
            Receipt::Ready(value) => Some(value),
            Receipt::TimedOut | Receipt::Malformed(_) => None,
        }
    }

    pub fn is_timed_out(&self) -> bool {
        matches!(self, Receipt::TimedOut)
    }

    pub fn is_malformed(&self) -> bool {
        matches!(self, Receipt::Malformed(_))
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Receipt<U> {
        match self {
            Receipt::Ready(value) => Receipt::Ready(f(value)),
            Receipt::TimedOut => Receipt::TimedOut,
            Receipt::Malformed(reason) => Receipt::Malformed(reason),
        }
    }
}

/// Socket options applied to every connection before it binds or connects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketOptions {
    pub keepalive: bool,
    /// Unanswered probes before the peer is considered gone.
    pub keepalive_count: i32,
    /// Idle seconds before the first probe.
    pub keepalive_idle: i32,
    /// Seconds between probes.
    pub keepalive_interval: i32,
    /// How long a closed socket may keep flushing pending messages.
    pub linger_ms: i32,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            keepalive: true,
            keepalive_count: 20,
            keepalive_idle: 540,
            keepalive_interval: 5,
            linger_ms: 100,
        }
    }
}

impl SocketOptions {
    fn apply(&self, socket: &zmq::Socket) -> Result<(), zmq::Error> {
        socket.set_tcp_keepalive(i32::from(self.keepalive))?;
        if self.keepalive {
            socket.set_tcp_keepalive_cnt(self.keepalive_count)?;
            socket.set_tcp_keepalive_idle(self.keepalive_idle)?;
            socket.set_tcp_keepalive_intvl(self.keepalive_interval)?;
        }
        socket.set_linger(self.linger_ms)
    }

    fn read(socket: &zmq::Socket) -> Result<Self, zmq::Error> {
        Ok(Self {
            keepalive: socket.get_tcp_keepalive()? == 1,
            keepalive_count: socket.get_tcp_keepalive_cnt()?,
            keepalive_idle: socket.get_tcp_keepalive_idle()?,
            keepalive_interval: socket.get_tcp_keepalive_intvl()?,
            linger_ms: socket.get_linger()?,
        })
    }
}

pub struct Connection {
    // Dropped before `context`.
    socket: zmq::Socket,
    context: zmq::Context,
    role: Role,
    address: String,
    registry: Arc<ProtocolRegistry>,
    buffer: MessageBuffer,
}

impl Connection {
    /// Opens a connection on a context of its own.
    pub fn open(
        role: Role,
        address: &str,
        registry: Arc<ProtocolRegistry>,
    ) -> Result<Self, ConnectionError> {
        Self::open_with(
            &zmq::Context::new(),
            role,
            address,
            registry,
            &SocketOptions::default(),
        )
    }

    /// Opens a connection on a shared context. Required for `inproc://`
    /// endpoints, which only reach sockets of the same context.
    pub fn open_in(
        context: &zmq::Context,
        role: Role,
        address: &str,
        registry: Arc<ProtocolRegistry>,
    ) -> Result<Self, ConnectionError> {
        Self::open_with(context, role, address, registry, &SocketOptions::default())
    }

    /// Opens `tcp://{host}:{port}`.
    pub fn tcp(
        role: Role,
        host: &str,
        port: u16,
        registry: Arc<ProtocolRegistry>,
    ) -> Result<Self, ConnectionError> {
        Self::open(role, &format!("tcp://{host}:{port}"), registry)
    }

    pub fn open_with(
        context: &zmq::Context,
        role: Role,
        address: &str,
        registry: Arc<ProtocolRegistry>,
        options: &SocketOptions,
    ) -> Result<Self, ConnectionError> {
        let socket = context
            .socket(role.socket_type())
            .map_err(setup_error(role, "create", address))?;
        options
            .apply(&socket)
            .map_err(setup_error(role, "configure", address))?;

        if role.binds() {
            socket
                .bind(address)
                .map_err(setup_error(role, "bind", address))?;
        } else {
            socket
                .connect(address)
                .map_err(setup_error(role, "connect", address))?;
        }

        if role == Role::Subscriber {
            socket
                .set_subscribe(b"")
                .map_err(setup_error(role, "subscribe", address))?;
        }

        debug!(
            "{role} connection {} {address}",
            if role.binds() { "bound to" } else { "connected to" }
        );

        Ok(Self {
            socket,
            context: context.clone(),
            role,
            address: address.to_string(),
            registry,
            buffer: MessageBuffer::new(),
        })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn context(&self) -> &zmq::Context {
        &self.context
    }

    pub fn registry(&self) -> &Arc<ProtocolRegistry> {
        &self.registry
    }

    /// The most recently sent or received frame.
    pub fn buffer(&self) -> &MessageBuffer {
        &self.buffer
    }

    /// Routing identity of the last received frame, if it carried one. After a
    /// malformed receive this is the identity of the rejected sender, when it
    /// got that far.
    pub fn routing_id(&self) -> Option<&[u8]> {
        match self.buffer.prefix() {
            [] => None,
            prefix => Some(prefix),
        }
    }

    pub fn poll_item(&self) -> zmq::PollItem<'_> {
        self.socket.as_poll_item(zmq::POLLIN)
    }

    pub(crate) fn socket_mut(&mut self) -> &mut zmq::Socket {
        &mut self.socket
    }

    /// Options currently in effect on the socket.
    pub fn socket_options(&self) -> Result<SocketOptions, ConnectionError> {
        Ok(SocketOptions::read(&self.socket)?)
    }

    /// Encodes and sends `message`. `routing_id` selects the peer on a server
    /// and is carried through by a worker; other roles ignore it.
    pub fn send(
        &mut self,
        message: &dyn Message,
        routing_id: Option<&RoutingId>,
    ) -> Result<(), ConnectionError> {
        let prefix = self.routing_prefix(routing_id)?;
        codec::encode_routed(message, prefix, &mut self.buffer)?;
        write_frame(&self.socket, self.role, &self.buffer)?;
        trace!("{} sent {} ({})", self.role, message.name(), message.message_id());
        Ok(())
    }

    /// Sends a frame that is already encoded, e.g. one received on another
    /// connection. The buffer's prefix is used as routing identity.
    pub fn send_buffer(&self, buffer: &MessageBuffer) -> Result<(), ConnectionError> {
        let routing_id = match buffer.prefix() {
            [] => None,
            prefix => Some(RoutingId::from(prefix)),
        };
        self.routing_prefix(routing_id.as_ref())?;
        write_frame(&self.socket, self.role, buffer)
    }

    /// Waits up to `timeout_ms` for one frame. A timeout of zero never blocks.
    ///
    /// On success the frame sits in [`buffer`](Self::buffer) until the next
    /// send or receive; [`decode`](Self::decode) turns it into a message.
    pub fn receive(&mut self, timeout_ms: u32) -> Result<Receipt<Envelope>, ConnectionError> {
        match self.socket.poll(zmq::POLLIN, i64::from(timeout_ms)) {
            Ok(0) | Err(zmq::Error::EINTR) => return Ok(Receipt::TimedOut),
            Ok(_) => {}
            Err(e) => return Err(e.into()),
        }

        let mut parts: [Option<zmq::Message>; 3] = [None, None, None];
        let mut received = 0;
        loop {
            let part = match self.socket.recv_msg(zmq::DONTWAIT) {
                Ok(part) => part,
                Err(zmq::Error::EAGAIN) if received == 0 => return Ok(Receipt::TimedOut),
                Err(zmq::Error::EAGAIN) => break,
                Err(e) => return Err(e.into()),
            };
            if let Some(slot) = parts.get_mut(received) {
                *slot = Some(part);
            }
            received += 1;

            if !self.socket.get_rcvmore()? {
                break;
            }
        }

        match self.load_frame(parts, received) {
            Ok(envelope) => {
                trace!("{} received {}", self.role, envelope.id);
                Ok(Receipt::Ready(envelope))
            }
            Err(reason) => {
                warn!("{} on {} dropped message: {reason}", self.role, self.address);
                self.buffer.discard_payload();
                Ok(Receipt::Malformed(reason))
            }
        }
    }

    /// Receives and decodes one message.
    pub fn receive_message(
        &mut self,
        timeout_ms: u32,
    ) -> Result<Receipt<(Box<dyn Message>, Envelope)>, ConnectionError> {
        let envelope = match self.receive(timeout_ms)? {
            Receipt::Ready(envelope) => envelope,
            Receipt::TimedOut => return Ok(Receipt::TimedOut),
            Receipt::Malformed(reason) => return Ok(Receipt::Malformed(reason)),
        };

        match self.decode() {
            Ok(message) => Ok(Receipt::Ready((message, envelope))),
            Err(reason) => {
                warn!("{} on {} dropped message: {reason}", self.role, self.address);
                Ok(Receipt::Malformed(reason))
            }
        }
    }

    /// Decodes the frame currently in the buffer.
    pub fn decode(&self) -> Result<Box<dyn Message>, Malformed> {
        codec::decode(&self.registry, &self.buffer)
    }

    fn routing_prefix<'a>(
        &self,
        routing_id: Option<&'a RoutingId>,
    ) -> Result<Option<&'a [u8]>, ConnectionError> {
        match (self.role.routes(), routing_id) {
            (true, Some(id)) if id.len() > MAX_ROUTING_ID_LEN => {
                Err(ConnectionError::RoutingIdTooLong(id.len()))
            }
            (true, Some(id)) => Ok(Some(id.as_bytes())),
            (true, None) if self.role == Role::Server => {
                Err(ConnectionError::MissingRoutingId(self.role))
            }
            (true, None) => Ok(None),
            (false, Some(_)) => {
                debug!("{} connection ignores routing identity", self.role);
                Ok(None)
            }
            (false, None) => Ok(None),
        }
    }

    fn load_frame(
        &mut self,
        parts: [Option<zmq::Message>; 3],
        received: usize,
    ) -> Result<Envelope, Malformed> {
        self.buffer.clear_prefix();
        let [first, second, third] = parts;
        let (routing_id, header, payload) = match (self.role, first, second, third) {
            (Role::Server | Role::Worker, Some(id), Some(header), Some(payload))
                if received == 3 =>
            {
                (Some(id), header, payload)
            }
            // A worker talking to a server directly gets no identity.
            (
                Role::Worker | Role::Client | Role::Publisher | Role::Subscriber,
                Some(header),
                Some(payload),
                None,
            ) => (None, header, payload),
            _ => {
                return Err(Malformed::PartCount {
                    expected: self.role.expected_parts(),
                    received,
                });
            }
        };

        let routing_id = match routing_id {
            Some(id) if id.len() > MAX_ROUTING_ID_LEN => {
                return Err(Malformed::RoutingIdTooLong(id.len()));
            }
            Some(id) => {
                self.buffer.set_prefix(&id);
                Some(RoutingId::from(&id[..]))
            }
            None => None,
        };

        let header = FrameHeader::from_bytes(&header)?;
        if payload.len() != header.payload_size as usize {
            return Err(Malformed::PayloadLength {
                declared: header.payload_size,
                actual: payload.len(),
            });
        }
        self.buffer.prepare(header).copy_from_slice(&payload);

        Ok(Envelope {
            id: header.message_id(),
            routing_id,
        })
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("role", &self.role)
            .field("address", &self.address)
            .field("buffer", &self.buffer)
            .finish_non_exhaustive()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        debug!("closing {} connection to {}", self.role, self.address);
    }
}

/// Waits up to `timeout_ms` for any of `connections` to become readable and
/// returns the indices of those that are.
pub fn poll(connections: &[&Connection], timeout_ms: u32) -> Result<Vec<usize>, ConnectionError> {
    let mut items = connections
        .iter()
        .map(|c| c.poll_item())
        .collect::<Vec<_>>();

    match zmq::poll(&mut items, i64::from(timeout_ms)) {
        Ok(_) => {}
        Err(zmq::Error::EINTR) => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    }

    Ok(items
        .iter()
        .enumerate()
        .filter(|(_, item)| item.is_readable())
        .map(|(i, _)| i)
        .collect())
}

fn write_frame(
    socket: &zmq::Socket,
    role: Role,
    buffer: &MessageBuffer,
) -> Result<(), ConnectionError> {
    let header = buffer.header().to_bytes()?;

    if role.routes() && buffer.prefix_len() > 0 {
        socket.send(buffer.prefix(), zmq::SNDMORE)?;
    }
    socket.send(&header[..], zmq::SNDMORE)?;
    socket.send(buffer.payload(), 0)?;
    Ok(())
}

fn setup_error<'a>(
    role: Role,
    action: &'static str,
    address: &'a str,
) -> impl FnOnce(zmq::Error) -> ConnectionError + 'a {
    move |source| ConnectionError::Setup {
        role,
        action,
        address: address.to_string(),
        source,
    }
}
