use std::sync::Arc;

use log::debug;
use thiserror::Error;

use crate::transport::{
    Connection, ConnectionError, Malformed, Message, ProtocolRegistry, Receipt, Role,
    TypedMessage,
};

use super::{
    AckReply, ErrorCode, NackReply, PingRequest, ServiceStatus, StatusReply, StatusRequest,
    TextReply, TextRequest,
};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("no reply within {0} ms")]
    Timeout(u32),

    #[error("invalid reply: {0}")]
    Malformed(#[from] Malformed),

    #[error("request rejected ({code:?}): {message}")]
    Rejected { code: ErrorCode, message: String },

    #[error("expected {expected}, received {received}")]
    UnexpectedReply {
        expected: &'static str,
        received: &'static str,
    },
}

/// Request/reply session with one facility server.
#[derive(Debug)]
pub struct FacilityClient {
    connection: Connection,
    timeout_ms: u32,
}

impl FacilityClient {
    pub fn new(connection: Connection, timeout_ms: u32) -> Self {
        Self {
            connection,
            timeout_ms,
        }
    }

    pub fn connect(
        host: &str,
        port: u16,
        timeout_ms: u32,
        registry: Arc<ProtocolRegistry>,
    ) -> Result<Self, ClientError> {
        let connection = Connection::tcp(Role::Client, host, port, registry)?;
        Ok(Self::new(connection, timeout_ms))
    }

    pub fn timeout_ms(&self) -> u32 {
        self.timeout_ms
    }

    pub fn set_timeout(&mut self, timeout_ms: u32) {
        self.timeout_ms = timeout_ms;
    }

    /// Sends `request` and waits for a reply of type `R`. A [`NackReply`] is
    /// turned into [`ClientError::Rejected`].
    ///
    /// Replies that arrived after an earlier request timed out are discarded
    /// first. A reply still in flight at that point is not.
    pub fn request<R: TypedMessage>(&mut self, request: &dyn Message) -> Result<R, ClientError> {
        self.discard_stale()?;
        debug!("sending {}", request.name());
        self.connection.send(request, None)?;

        let reply = match self.connection.receive_message(self.timeout_ms)? {
            Receipt::Ready((reply, _)) => reply,
            Receipt::TimedOut => return Err(ClientError::Timeout(self.timeout_ms)),
            Receipt::Malformed(reason) => return Err(reason.into()),
        };

        let reply = match reply.downcast::<NackReply>() {
            Ok(nack) => {
                let nack = *nack;
                return Err(ClientError::Rejected {
                    code: nack.err_code.unwrap_or_default(),
                    message: nack.err_msg.unwrap_or_default(),
                });
            }
            Err(reply) => reply,
        };

        reply
            .downcast::<R>()
            .map(|reply| *reply)
            .map_err(|other| ClientError::UnexpectedReply {
                expected: R::NAME,
                received: other.name(),
            })
    }

    fn discard_stale(&mut self) -> Result<(), ConnectionError> {
        loop {
            match self.connection.receive(0)? {
                Receipt::TimedOut => return Ok(()),
                Receipt::Ready(envelope) => debug!("discarding stale reply {}", envelope.id),
                Receipt::Malformed(_) => {}
            }
        }
    }

    pub fn ping(&mut self) -> Result<(), ClientError> {
        self.request::<AckReply>(&PingRequest::default())?;
        Ok(())
    }

    pub fn status(&mut self) -> Result<ServiceStatus, ClientError> {
        let reply = self.request::<StatusReply>(&StatusRequest::default())?;
        Ok(reply.status.unwrap_or_default())
    }

    pub fn text(&mut self, message: &str) -> Result<String, ClientError> {
        let reply = self.request::<TextReply>(&TextRequest::new(message))?;
        Ok(reply.data.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use crate::protocol::register;

    use super::*;

    fn registry() -> Arc<ProtocolRegistry> {
        let mut registry = ProtocolRegistry::new();
        register(&mut registry).unwrap();
        Arc::new(registry)
    }

    /// Server end that answers one request with `reply`.
    fn answer_once(server: &mut Connection, reply: &dyn Message) {
        let envelope = server.receive(2000).unwrap().ready().unwrap();
        server.send(reply, envelope.routing_id.as_ref()).unwrap();
    }

    #[test]
    fn timeout_without_server_reply() {
        let ctx = zmq::Context::new();
        let _server =
            Connection::open_in(&ctx, Role::Server, "inproc://client-timeout", registry()).unwrap();
        let connection =
            Connection::open_in(&ctx, Role::Client, "inproc://client-timeout", registry()).unwrap();
        let mut client = FacilityClient::new(connection, 30);

        assert!(matches!(client.ping(), Err(ClientError::Timeout(30))));
    }

    #[test]
    fn wrong_reply_type_is_reported() {
        let ctx = zmq::Context::new();
        let mut server =
            Connection::open_in(&ctx, Role::Server, "inproc://client-wrong", registry()).unwrap();
        let connection =
            Connection::open_in(&ctx, Role::Client, "inproc://client-wrong", registry()).unwrap();
        let mut client = FacilityClient::new(connection, 2000);

        let requester = std::thread::spawn(move || client.status());
        answer_once(&mut server, &AckReply {});

        assert!(matches!(
            requester.join().unwrap(),
            Err(ClientError::UnexpectedReply {
                expected: "StatusReply",
                received: "AckReply"
            })
        ));
    }

    #[test]
    fn nack_is_rejection() {
        let ctx = zmq::Context::new();
        let mut server =
            Connection::open_in(&ctx, Role::Server, "inproc://client-nack", registry()).unwrap();
        let connection =
            Connection::open_in(&ctx, Role::Client, "inproc://client-nack", registry()).unwrap();
        let mut client = FacilityClient::new(connection, 2000);

        let requester = std::thread::spawn(move || client.text("hello"));
        answer_once(&mut server, &NackReply::new(ErrorCode::Internal, "down"));

        match requester.join().unwrap() {
            Err(ClientError::Rejected { code, message }) => {
                assert_eq!(code, ErrorCode::Internal);
                assert_eq!(message, "down");
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn late_reply_is_not_taken_for_the_next_one() {
        let ctx = zmq::Context::new();
        let mut server =
            Connection::open_in(&ctx, Role::Server, "inproc://client-late", registry()).unwrap();
        let connection =
            Connection::open_in(&ctx, Role::Client, "inproc://client-late", registry()).unwrap();
        let mut client = FacilityClient::new(connection, 30);

        assert!(matches!(client.text("a"), Err(ClientError::Timeout(30))));
        answer_once(
            &mut server,
            &TextReply {
                data: Some("a".into()),
            },
        );
        std::thread::sleep(std::time::Duration::from_millis(50));

        client.set_timeout(2000);
        let requester = std::thread::spawn(move || client.text("b"));
        answer_once(
            &mut server,
            &TextReply {
                data: Some("b".into()),
            },
        );

        assert_eq!(requester.join().unwrap().unwrap(), "b");
    }
}
