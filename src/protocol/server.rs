//! Facility server.
//!
//! A Server-role connection accepts requests from any number of clients and a
//! steerable ZeroMQ proxy hands them to a pool of Worker-role connections over
//! an in-process backend. Workers carry each client's routing identity through
//! so replies find their way back to the sender.
//!
//! ```text
//! clients ──tcp──▶ [ROUTER frontend] ══proxy══ [DEALER backend] ──inproc──▶ workers
//! ```
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    thread,
};

use log::{debug, info, warn};
use thiserror::Error;

use crate::transport::{
    Connection, ConnectionError, Message, ProtocolRegistry, Receipt, Role, RoutingId,
};

use super::{
    AckReply, ErrorCode, NackReply, PingRequest, ServiceStatus, StatusReply, StatusRequest,
    TextReply, TextRequest, thread::WorkerPool,
};

const DEFAULT_POLL_TIMEOUT_MS: u32 = 500;

static NEXT_SERVER: AtomicUsize = AtomicUsize::new(0);

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("failed to set up {what}: {source}")]
    Setup {
        what: &'static str,
        #[source]
        source: zmq::Error,
    },

    #[error("failed to spawn proxy thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("proxy failed: {0}")]
    Proxy(#[source] zmq::Error),

    #[error("proxy thread panicked")]
    Panicked,
}

/// Turns one decoded request into one reply.
pub trait RequestHandler: Send + Sync + 'static {
    fn handle(&self, request: &dyn Message) -> Box<dyn Message>;
}

/// Answers the Anon protocol: ping, status and text echo. Anything else is
/// refused with a [`NackReply`].
#[derive(Debug, Clone, Copy, Default)]
pub struct AnonHandler {
    pub status: ServiceStatus,
}

impl RequestHandler for AnonHandler {
    fn handle(&self, request: &dyn Message) -> Box<dyn Message> {
        if request.is::<PingRequest>() {
            Box::new(AckReply {})
        } else if request.is::<StatusRequest>() {
            Box::new(StatusReply {
                status: Some(self.status),
            })
        } else if let Some(text) = request.downcast_ref::<TextRequest>() {
            Box::new(TextReply {
                data: text.data.clone(),
            })
        } else {
            Box::new(NackReply::new(
                ErrorCode::Unsupported,
                format!("unsupported request {}", request.name()),
            ))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Frontend endpoint, e.g. `tcp://*:5800`.
    pub address: String,
    /// Worker threads; zero picks one per available core.
    pub threads: usize,
    /// How long a worker waits for a request before checking for shutdown.
    pub poll_timeout_ms: u32,
}

impl ServerConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            threads: 0,
            poll_timeout_ms: DEFAULT_POLL_TIMEOUT_MS,
        }
    }

    /// Listens on every interface at `port`.
    pub fn tcp(port: u16) -> Self {
        Self::new(format!("tcp://*:{port}"))
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    pub fn with_poll_timeout(mut self, timeout_ms: u32) -> Self {
        self.poll_timeout_ms = timeout_ms;
        self
    }

    fn worker_count(&self) -> usize {
        match self.threads {
            0 => thread::available_parallelism().map_or(1, |n| n.get()),
            n => n,
        }
    }
}

pub struct FacilityServer {
    config: ServerConfig,
    context: zmq::Context,
    registry: Arc<ProtocolRegistry>,
    handler: Arc<dyn RequestHandler>,
}

impl FacilityServer {
    pub fn new(
        config: ServerConfig,
        registry: Arc<ProtocolRegistry>,
        handler: impl RequestHandler,
    ) -> Self {
        Self {
            config,
            context: zmq::Context::new(),
            registry,
            handler: Arc::new(handler),
        }
    }

    /// Runs on `context` instead of a private one, so the frontend can be
    /// reached over `inproc://`.
    pub fn with_context(mut self, context: zmq::Context) -> Self {
        self.context = context;
        self
    }

    /// Binds the frontend, starts the workers and the proxy, and returns once
    /// the server is accepting requests.
    pub fn start(self) -> Result<ServerHandle, ServerError> {
        let n = NEXT_SERVER.fetch_add(1, Ordering::Relaxed);
        let backend_address = format!("inproc://sdms-workers-{n}");
        let control_address = format!("inproc://sdms-control-{n}");
        let ctx = &self.context;

        let mut frontend =
            Connection::open_in(ctx, Role::Server, &self.config.address, self.registry.clone())?;
        let mut backend = endpoint(ctx, zmq::SocketType::DEALER, &backend_address, "backend")?;
        let mut control_rx = endpoint(ctx, zmq::SocketType::PAIR, &control_address, "control")?;
        let control = ctx
            .socket(zmq::SocketType::PAIR)
            .map_err(|source| ServerError::Setup {
                what: "control",
                source,
            })?;
        control
            .set_linger(0)
            .and_then(|_| control.connect(&control_address))
            .map_err(|source| ServerError::Setup {
                what: "control",
                source,
            })?;

        let workers = self.config.worker_count();
        let pool = {
            let context = self.context.clone();
            let registry = self.registry.clone();
            let handler = self.handler.clone();
            let timeout = self.config.poll_timeout_ms;
            let backend_address = backend_address.clone();

            WorkerPool::new(workers, move |id, running| {
                let worker = Worker {
                    id,
                    timeout_ms: timeout,
                    handler: handler.as_ref(),
                };
                let connection =
                    Connection::open_in(&context, Role::Worker, &backend_address, registry.clone());
                match connection {
                    Ok(connection) => {
                        if let Err(e) = worker.serve(connection, running) {
                            warn!("worker {id} stopped: {e}");
                        }
                    }
                    Err(e) => warn!("worker {id} failed to connect: {e}"),
                }
            })
        };

        let proxy = thread::Builder::new()
            .name(format!("sdms-proxy-{n}"))
            .spawn(move || {
                let res = zmq::proxy_steerable(
                    frontend.socket_mut(),
                    &mut backend,
                    &mut control_rx,
                );
                debug!("proxy for {} exited", frontend.address());
                res
            })
            .map_err(ServerError::Spawn)?;

        info!(
            "facility server listening at {} with {workers} workers",
            self.config.address
        );

        Ok(ServerHandle {
            address: self.config.address,
            control,
            proxy: Some(proxy),
            pool,
        })
    }
}

pub struct ServerHandle {
    address: String,
    control: zmq::Socket,
    proxy: Option<thread::JoinHandle<Result<(), zmq::Error>>>,
    pool: WorkerPool,
}

impl ServerHandle {
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn workers(&self) -> usize {
        self.pool.len()
    }

    /// Stops the proxy, then waits for every worker to finish its current
    /// request.
    pub fn stop(mut self) -> Result<(), ServerError> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<(), ServerError> {
        let Some(proxy) = self.proxy.take() else {
            return Ok(());
        };
        info!("stopping facility server at {}", self.address);

        // Without the command the proxy never returns; leave it detached.
        let res = match self.control.send("TERMINATE", 0) {
            Ok(()) => match proxy.join() {
                Ok(res) => res.map_err(ServerError::Proxy),
                Err(_) => Err(ServerError::Panicked),
            },
            Err(e) => Err(ServerError::Proxy(e)),
        };

        self.pool.shutdown();
        res
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!("facility server at {} did not stop cleanly: {e}", self.address);
        }
    }
}

struct Worker<'a> {
    id: usize,
    timeout_ms: u32,
    handler: &'a dyn RequestHandler,
}

impl Worker<'_> {
    fn serve(&self, mut connection: Connection, running: &AtomicBool) -> Result<(), ConnectionError> {
        while running.load(Ordering::Acquire) {
            match connection.receive_message(self.timeout_ms)? {
                Receipt::Ready((request, envelope)) => {
                    debug!("worker {} handling {}", self.id, request.name());
                    let reply = self.handler.handle(request.as_ref());
                    self.reply(&mut connection, reply.as_ref(), envelope.routing_id.as_ref())?;
                }
                Receipt::TimedOut => {}
                Receipt::Malformed(reason) => {
                    // Refuse what can still be answered so the client does
                    // not wait out its timeout.
                    let Some(sender) = connection.routing_id().map(RoutingId::from) else {
                        continue;
                    };
                    let nack = NackReply::new(ErrorCode::BadRequest, reason.to_string());
                    self.reply(&mut connection, &nack, Some(&sender))?;
                }
            }
        }
        Ok(())
    }

    /// Sends `reply`, falling back to an internal-error Nack when the reply
    /// itself cannot be encoded. Only socket failures are returned.
    fn reply(
        &self,
        connection: &mut Connection,
        reply: &dyn Message,
        routing_id: Option<&RoutingId>,
    ) -> Result<(), ConnectionError> {
        match connection.send(reply, routing_id) {
            Err(ConnectionError::Codec(e)) => {
                warn!("worker {} could not encode {}: {e}", self.id, reply.name());
                let nack = NackReply::new(ErrorCode::Internal, e.to_string());
                match connection.send(&nack, routing_id) {
                    Err(ConnectionError::Codec(e)) => {
                        warn!("worker {} dropped reply: {e}", self.id);
                        Ok(())
                    }
                    res => res,
                }
            }
            res => res,
        }
    }
}

/// Creates a socket of `kind` bound to `address`.
fn endpoint(
    ctx: &zmq::Context,
    kind: zmq::SocketType,
    address: &str,
    what: &'static str,
) -> Result<zmq::Socket, ServerError> {
    let socket = ctx
        .socket(kind)
        .map_err(|source| ServerError::Setup { what, source })?;
    socket
        .set_linger(0)
        .and_then(|_| socket.bind(address))
        .map_err(|source| ServerError::Setup { what, source })?;
    Ok(socket)
}

#[cfg(test)]
mod tests {
    use bincode::{Decode, Encode};

    use crate::{
        protocol::{ClientError, FacilityClient, register},
        transport::{ProtocolDescriptor, TypedMessage},
    };

    use super::*;

    #[derive(Debug, Default, Clone, PartialEq, Eq, Encode, Decode)]
    struct Unknown {
        value: u32,
    }

    impl TypedMessage for Unknown {
        const PROTOCOL_ID: u16 = 40;
        const INDEX: u16 = 0;
        const NAME: &'static str = "Unknown";
    }

    fn registry() -> Arc<ProtocolRegistry> {
        let mut registry = ProtocolRegistry::new();
        register(&mut registry).unwrap();
        Arc::new(registry)
    }

    /// Answers every text request with a reply that cannot be encoded.
    struct BrokenText;

    impl RequestHandler for BrokenText {
        fn handle(&self, request: &dyn Message) -> Box<dyn Message> {
            if request.is::<TextRequest>() {
                Box::new(TextReply { data: None })
            } else {
                AnonHandler::default().handle(request)
            }
        }
    }

    fn start(ctx: &zmq::Context, name: &str, handler: AnonHandler) -> ServerHandle {
        let config = ServerConfig::new(format!("inproc://{name}"))
            .with_threads(2)
            .with_poll_timeout(20);

        FacilityServer::new(config, registry(), handler)
            .with_context(ctx.clone())
            .start()
            .unwrap()
    }

    fn client(ctx: &zmq::Context, name: &str, registry: Arc<ProtocolRegistry>) -> FacilityClient {
        let address = format!("inproc://{name}");
        let connection = Connection::open_in(ctx, Role::Client, &address, registry).unwrap();
        FacilityClient::new(connection, 2000)
    }

    #[test]
    fn anon_handler_replies() {
        let handler = AnonHandler {
            status: ServiceStatus::Degraded,
        };

        assert!(handler.handle(&PingRequest::default()).is::<AckReply>());
        assert_eq!(
            handler
                .handle(&StatusRequest::default())
                .downcast_ref::<StatusReply>()
                .unwrap()
                .status,
            Some(ServiceStatus::Degraded)
        );
        assert_eq!(
            handler
                .handle(&TextRequest::new("hi"))
                .downcast_ref::<TextReply>()
                .unwrap()
                .data
                .as_deref(),
            Some("hi")
        );
        assert!(handler.handle(&AckReply {}).is::<NackReply>());
    }

    #[test]
    fn thread_count_defaults_to_cores() {
        assert!(ServerConfig::tcp(5800).worker_count() >= 1);
        assert_eq!(ServerConfig::tcp(5800).with_threads(3).worker_count(), 3);
        assert_eq!(ServerConfig::tcp(5800).address, "tcp://*:5800");
    }

    #[test]
    fn serves_anon_requests() {
        let ctx = zmq::Context::new();
        let server = start(&ctx, "facility-anon", AnonHandler::default());
        assert_eq!(server.workers(), 2);

        let mut client = client(&ctx, "facility-anon", registry());
        client.ping().unwrap();
        assert_eq!(client.status().unwrap(), ServiceStatus::Normal);
        assert_eq!(client.text("hello facility").unwrap(), "hello facility");

        server.stop().unwrap();
    }

    #[test]
    fn replies_go_to_each_client() {
        let ctx = zmq::Context::new();
        let server = start(&ctx, "facility-many", AnonHandler::default());

        let handles = (0..4)
            .map(|i| {
                let mut client = client(&ctx, "facility-many", registry());
                thread::spawn(move || {
                    for n in 0..5 {
                        let text = format!("client {i} message {n}");
                        assert_eq!(client.text(&text).unwrap(), text);
                    }
                })
            })
            .collect::<Vec<_>>();

        for handle in handles {
            handle.join().unwrap();
        }
        server.stop().unwrap();
    }

    #[test]
    fn unsupported_and_unknown_requests_are_refused() {
        let ctx = zmq::Context::new();
        let server = start(&ctx, "facility-refuse", AnonHandler::default());

        let mut client = client(&ctx, "facility-refuse", registry());
        assert!(matches!(
            client.request::<AckReply>(&AckReply {}),
            Err(ClientError::Rejected {
                code: ErrorCode::Unsupported,
                ..
            })
        ));

        let mut extended = ProtocolRegistry::new();
        register(&mut extended).unwrap();
        extended
            .register(
                ProtocolDescriptor::new("unknown")
                    .with_id(40)
                    .message::<Unknown>(),
            )
            .unwrap();
        let mut stranger = self::client(&ctx, "facility-refuse", Arc::new(extended));
        assert!(matches!(
            stranger.request::<AckReply>(&Unknown { value: 1 }),
            Err(ClientError::Rejected {
                code: ErrorCode::BadRequest,
                ..
            })
        ));

        // The server keeps serving after refusing.
        client.ping().unwrap();
        server.stop().unwrap();
    }

    #[test]
    fn request_missing_required_field_is_refused() {
        let ctx = zmq::Context::new();
        let config = ServerConfig::new("inproc://facility-incomplete")
            .with_threads(1)
            .with_poll_timeout(20);
        let server = FacilityServer::new(config, registry(), AnonHandler::default())
            .with_context(ctx.clone())
            .start()
            .unwrap();

        let raw = ctx.socket(zmq::SocketType::DEALER).unwrap();
        raw.connect("inproc://facility-incomplete").unwrap();
        let header = crate::transport::FrameHeader {
            protocol_id: crate::protocol::ANON_PROTOCOL_ID,
            message_index: 5,
            payload_size: 1,
        }
        .to_bytes()
        .unwrap();
        for _ in 0..3 {
            raw.send_multipart([&header[..], [0u8].as_slice()], 0)
                .unwrap();
        }

        // The single worker answered each one and is still serving.
        let mut client = client(&ctx, "facility-incomplete", registry());
        client.ping().unwrap();
        for _ in 0..3 {
            assert_eq!(raw.poll(zmq::POLLIN, 1000).unwrap(), 1);
            let parts = raw.recv_multipart(0).unwrap();
            assert_eq!(parts.len(), 2);
        }

        drop(raw);
        server.stop().unwrap();
    }

    #[test]
    fn unencodable_reply_becomes_internal_error() {
        let ctx = zmq::Context::new();
        let config = ServerConfig::new("inproc://facility-broken")
            .with_threads(1)
            .with_poll_timeout(20);
        let server = FacilityServer::new(config, registry(), BrokenText)
            .with_context(ctx.clone())
            .start()
            .unwrap();

        let mut client = client(&ctx, "facility-broken", registry());
        for _ in 0..3 {
            assert!(matches!(
                client.text("echo"),
                Err(ClientError::Rejected {
                    code: ErrorCode::Internal,
                    ..
                })
            ));
        }
        client.ping().unwrap();

        server.stop().unwrap();
    }
}
