//! CoAP over UDP.
//!
//! Each exchange binds its own ephemeral socket, so concurrent requests
//! never see each other's datagrams and no shared receive loop is needed.
//!
//! Confirmable requests are retransmitted with exponential back-off until
//! an ACK arrives or `max_retransmit` is exhausted. An ACK may carry the
//! response (piggybacked) or be empty, in which case the response follows
//! later as its own message, matched by token.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::net::UdpSocket;
use tokio::time::{timeout_at, Instant};

use coapblock_core::config::TransportConfig;
use coapblock_core::wire::MessageType;
use coapblock_core::{Destination, Message, Request, Response};

use crate::breaker::ConnectivityBreaker;
use crate::transport::{Transport, TransportError};

const TOKEN_LEN: usize = 4;
const RECV_BUFFER_LEN: usize = 4096;

/// What an incoming datagram means for the current exchange.
#[derive(Debug)]
enum Incoming {
    /// ACK carrying the response.
    Piggybacked(Response),
    /// Empty ACK: response will come separately.
    EmptyAck,
    /// Response in its own CON or NON message. `ack` is the message ID to
    /// acknowledge when it was confirmable.
    Separate { response: Response, ack: Option<u16> },
    Reset,
    Unrelated,
}

fn classify(msg: &Message, message_id: u16, token: &[u8]) -> Incoming {
    match msg.kind {
        MessageType::Acknowledgement if msg.message_id == message_id => {
            if msg.code.is_empty() {
                Incoming::EmptyAck
            } else if msg.token == token {
                Incoming::Piggybacked(Response::from_message(msg))
            } else {
                Incoming::Unrelated
            }
        }
        MessageType::Reset if msg.message_id == message_id => Incoming::Reset,
        MessageType::Confirmable | MessageType::NonConfirmable
            if msg.token == token && msg.code.is_response() =>
        {
            Incoming::Separate {
                response: Response::from_message(msg),
                ack: (msg.kind == MessageType::Confirmable).then_some(msg.message_id),
            }
        }
        _ => Incoming::Unrelated,
    }
}

/// UDP transport. Cheap to clone; clones share the breaker.
#[derive(Debug, Clone)]
pub struct UdpTransport {
    config: TransportConfig,
    breaker: Option<Arc<ConnectivityBreaker>>,
}

impl UdpTransport {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            breaker: None,
        }
    }

    /// Count connectivity failures against `breaker`.
    pub fn with_breaker(mut self, breaker: Arc<ConnectivityBreaker>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    async fn exchange(&self, request: Request) -> Result<Response, TransportError> {
        let peer = resolve(&request.destination).await?;
        let local: SocketAddr = if peer.is_ipv6() {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(peer).await?;

        let (message_id, token, first_timeout) = {
            let mut rng = rand::thread_rng();
            let token: [u8; TOKEN_LEN] = rng.gen();
            (rng.gen::<u16>(), token, self.initial_timeout(&mut rng))
        };

        let datagram = request.to_message(message_id, token.to_vec()).encode()?;
        if datagram.len() > self.config.max_packet_size {
            return Err(TransportError::TooLarge {
                size: datagram.len(),
                max: self.config.max_packet_size,
            });
        }

        tracing::debug!(
            %peer,
            method = ?request.method,
            message_id,
            token = hex::encode(token),
            confirmable = request.confirmable,
            block1 = ?request.block1,
            len = datagram.len(),
            "sending request"
        );

        let mut exchange = Exchange {
            socket,
            message_id,
            token,
            buf: vec![0u8; RECV_BUFFER_LEN],
        };

        let response = if request.confirmable {
            self.confirmable(&mut exchange, &datagram, first_timeout).await?
        } else {
            exchange.socket.send(&datagram).await?;
            let deadline = Instant::now() + self.config.response_timeout();
            exchange.await_response(deadline).await?
        };

        tracing::debug!(%peer, message_id, code = %response.code, len = response.payload.len(), "response received");
        Ok(response)
    }

    async fn confirmable(
        &self,
        exchange: &mut Exchange,
        datagram: &[u8],
        first_timeout: Duration,
    ) -> Result<Response, TransportError> {
        let mut wait = first_timeout;

        for attempt in 0..=self.config.max_retransmit {
            if attempt > 0 {
                tracing::debug!(message_id = exchange.message_id, attempt, "retransmitting");
            }
            exchange.socket.send(datagram).await?;

            let Some(deadline) = Instant::now().checked_add(wait) else {
                break;
            };
            loop {
                let Some(msg) = exchange.recv_until(deadline).await? else {
                    break;
                };
                match classify(&msg, exchange.message_id, &exchange.token) {
                    Incoming::Piggybacked(response) => return Ok(response),
                    Incoming::EmptyAck => {
                        tracing::trace!(message_id = exchange.message_id, "empty ACK, awaiting separate response");
                        let deadline = Instant::now() + self.config.response_timeout();
                        return exchange.await_response(deadline).await;
                    }
                    // ACK was lost but the response got through.
                    Incoming::Separate { response, ack } => {
                        exchange.acknowledge(ack).await?;
                        return Ok(response);
                    }
                    Incoming::Reset => return Err(TransportError::Reset),
                    Incoming::Unrelated => {
                        tracing::trace!(message_id = msg.message_id, "ignoring unrelated datagram");
                    }
                }
            }
            wait = wait.saturating_mul(2);
        }

        Err(TransportError::Timeout)
    }

    /// ACK_TIMEOUT scaled by a random factor in [1, ACK_RANDOM_FACTOR].
    /// A factor that is not finite, or a product too large for a `Duration`,
    /// falls back to the unscaled timeout.
    fn initial_timeout(&self, rng: &mut impl Rng) -> Duration {
        let base = self.config.ack_timeout();
        let factor = self.config.ack_random_factor;
        if !(factor.is_finite() && factor > 1.0) {
            return base;
        }
        Duration::try_from_secs_f64(base.as_secs_f64() * rng.gen_range(1.0..factor)).unwrap_or(base)
    }
}

impl Transport for UdpTransport {
    async fn send(&self, request: Request) -> Result<Response, TransportError> {
        let result = self.exchange(request).await;
        if let (Err(e), Some(breaker)) = (&result, &self.breaker) {
            if e.is_connectivity() {
                breaker.record_failure();
            }
        }
        result
    }
}

/// Socket and identifiers for one request/response exchange.
struct Exchange {
    socket: UdpSocket,
    message_id: u16,
    token: [u8; TOKEN_LEN],
    buf: Vec<u8>,
}

impl Exchange {
    /// Next decodable datagram, or `None` once `deadline` passes.
    async fn recv_until(&mut self, deadline: Instant) -> Result<Option<Message>, TransportError> {
        loop {
            let len = match timeout_at(deadline, self.socket.recv(&mut self.buf)).await {
                Ok(result) => result?,
                Err(_) => return Ok(None),
            };
            match Message::decode(&self.buf[..len]) {
                Ok(msg) => return Ok(Some(msg)),
                Err(e) => {
                    tracing::debug!(error = %e, len, "discarding malformed datagram");
                }
            }
        }
    }

    /// Wait for a response matched by token (separate or non-confirmable).
    async fn await_response(&mut self, deadline: Instant) -> Result<Response, TransportError> {
        while let Some(msg) = self.recv_until(deadline).await? {
            match classify(&msg, self.message_id, &self.token) {
                Incoming::Piggybacked(response) => return Ok(response),
                Incoming::Separate { response, ack } => {
                    self.acknowledge(ack).await?;
                    return Ok(response);
                }
                Incoming::Reset => return Err(TransportError::Reset),
                Incoming::EmptyAck | Incoming::Unrelated => {}
            }
        }
        Err(TransportError::Timeout)
    }

    async fn acknowledge(&self, message_id: Option<u16>) -> Result<(), TransportError> {
        if let Some(id) = message_id {
            let ack = Message::empty_ack(id).encode()?;
            self.socket.send(&ack).await?;
            tracing::trace!(message_id = id, "acknowledged separate response");
        }
        Ok(())
    }
}

async fn resolve(destination: &Destination) -> Result<SocketAddr, TransportError> {
    tokio::net::lookup_host((destination.host.as_str(), destination.port))
        .await
        .map_err(|e| TransportError::Resolve(format!("{}: {e}", destination.host)))?
        .next()
        .ok_or_else(|| TransportError::Resolve(destination.host.clone()))
}
