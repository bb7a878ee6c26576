//! Scripted CoAP server on loopback.
//!
//! Every datagram it receives is logged. Requests are passed to a handler
//! that decides how to answer; ACKs from the client are only logged.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

use coapblock_core::block::BlockOption;
use coapblock_core::wire::{option, MessageType};
use coapblock_core::{Code, Message};

/// How the server answers one request.
pub enum Reply {
    /// Response in the ACK (CON) or as a NON response (NON).
    Piggyback(Code, Vec<u8>),
    /// Empty ACK now, then a confirmable response with a fresh message ID.
    Separate(Code, Vec<u8>),
    /// Say nothing.
    Drop,
    Reset,
}

pub struct TestServer {
    addr: SocketAddr,
    log: Arc<Mutex<Vec<Message>>>,
    task: JoinHandle<()>,
}

impl TestServer {
    pub async fn spawn<F>(mut handler: F) -> Result<Self>
    where
        F: FnMut(&Message) -> Reply + Send + 'static,
    {
        let socket = UdpSocket::bind("127.0.0.1:0").await?;
        let addr = socket.local_addr()?;
        let log = Arc::new(Mutex::new(Vec::new()));
        let seen = log.clone();

        let task = tokio::spawn(async move {
            let mut buf = vec![0u8; 4096];
            let mut next_id: u16 = 0x4000;
            loop {
                let Ok((len, from)) = socket.recv_from(&mut buf).await else {
                    return;
                };
                let Ok(msg) = Message::decode(&buf[..len]) else {
                    continue;
                };
                seen.lock().unwrap().push(msg.clone());
                if !msg.code.is_request() {
                    continue;
                }

                next_id = next_id.wrapping_add(1);
                for out in answer(&msg, handler(&msg), next_id) {
                    let _ = socket.send_to(&out.encode().unwrap(), from).await;
                }
            }
        });

        Ok(Self { addr, log, task })
    }

    /// Block1 sink: answers 2.31 to every block with `more` set and
    /// `final_code` to the last, collecting the payload into `body`.
    pub async fn assembling(final_code: Code, body: Arc<Mutex<Vec<u8>>>) -> Result<Self> {
        Self::spawn(move |msg| {
            let Some(value) = msg.uint_option(option::BLOCK1) else {
                body.lock().unwrap().extend_from_slice(&msg.payload);
                return Reply::Piggyback(final_code, Vec::new());
            };
            let block = BlockOption::decode(value).unwrap();
            let mut body = body.lock().unwrap();
            if block.index as usize * block.size.bytes() != body.len() {
                return Reply::Piggyback(Code::REQUEST_ENTITY_INCOMPLETE, Vec::new());
            }
            body.extend_from_slice(&msg.payload);
            if block.more {
                Reply::Piggyback(Code::CONTINUE, Vec::new())
            } else {
                Reply::Piggyback(final_code, Vec::new())
            }
        })
        .await
    }

    pub fn url(&self, path: &str) -> String {
        format!("coap://{}/{}", self.addr, path.trim_start_matches('/'))
    }

    /// Requests received, retransmissions included.
    pub fn requests(&self) -> Vec<Message> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.code.is_request())
            .cloned()
            .collect()
    }

    /// Empty ACKs received from the client.
    pub fn acks(&self) -> Vec<Message> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.kind == MessageType::Acknowledgement)
            .cloned()
            .collect()
    }

    /// Poll until `count` ACKs have arrived.
    pub async fn wait_for_acks(&self, count: usize) -> Result<Vec<Message>> {
        for _ in 0..100 {
            let acks = self.acks();
            if acks.len() >= count {
                return Ok(acks);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        bail!("expected {count} ACKs, got {}", self.acks().len())
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn answer(req: &Message, reply: Reply, fresh_id: u16) -> Vec<Message> {
    let response = |kind, message_id, code, payload: Vec<u8>| Message {
        kind,
        code,
        message_id,
        token: req.token.clone(),
        options: Vec::new(),
        payload: Bytes::from(payload),
    };

    match reply {
        Reply::Piggyback(code, payload) if req.kind == MessageType::Confirmable => {
            vec![response(MessageType::Acknowledgement, req.message_id, code, payload)]
        }
        Reply::Piggyback(code, payload) => {
            vec![response(MessageType::NonConfirmable, fresh_id, code, payload)]
        }
        Reply::Separate(code, payload) => vec![
            Message::empty_ack(req.message_id),
            response(MessageType::Confirmable, fresh_id, code, payload),
        ],
        Reply::Drop => Vec::new(),
        Reply::Reset => vec![Message {
            kind: MessageType::Reset,
            code: Code::EMPTY,
            message_id: req.message_id,
            token: Vec::new(),
            options: Vec::new(),
            payload: Bytes::new(),
        }],
    }
}
