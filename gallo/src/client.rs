//! Correlation of requests and responses.
//!
//! Any number of tasks may have a request in flight at once. Each request
//! gets a correlation id that no other in-flight request holds, and parks on
//! a oneshot slot keyed by that id. A single receive task reassembles
//! incoming frames and completes the slot each response names, so responses
//! may arrive in any order.

use crate::error::{Error, ProtocolError, Result, TransportError};
use crate::link::Link;
use gallo_proto::frame::{Decoder, Frame, MAX_FRAME_SIZE};
use gallo_proto::wire::{Endpoint, Reply};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

const ID_SPACE: usize = u16::MAX as usize + 1;

type Completion = Result<Vec<u8>>;

struct Slot {
    endpoint: u8,
    token: u64,
    done: oneshot::Sender<Completion>,
}

struct Table {
    next_seq: u16,
    // Distinguishes successive holders of the same id.
    next_token: u64,
    pending: HashMap<u16, Slot>,
    open: bool,
}

struct Shared {
    table: Mutex<Table>,
    closed: watch::Sender<bool>,
}

impl Shared {
    /// Takes an id no pending request holds.
    fn register(&self, endpoint: u8) -> Result<(u16, u64, oneshot::Receiver<Completion>)> {
        let mut table = self.table.lock();
        if !table.open {
            return Err(TransportError::Disconnected.into());
        }
        if table.pending.len() >= ID_SPACE {
            return Err(ProtocolError::IdsExhausted.into());
        }
        let mut seq = table.next_seq;
        while table.pending.contains_key(&seq) {
            seq = seq.wrapping_add(1);
        }
        table.next_seq = seq.wrapping_add(1);
        let token = table.next_token;
        table.next_token += 1;

        let (done, rx) = oneshot::channel();
        table.pending.insert(
            seq,
            Slot {
                endpoint,
                token,
                done,
            },
        );
        Ok((seq, token, rx))
    }

    fn resolve(&self, seq: u16, endpoint: u8, body: &[u8]) {
        let slot = self.table.lock().pending.remove(&seq);
        let Some(slot) = slot else {
            warn!(seq, endpoint, "unmatched response");
            return;
        };
        let completion = if slot.endpoint == endpoint {
            Ok(body.to_vec())
        } else {
            warn!(seq, endpoint, expected = slot.endpoint, "response names the wrong endpoint");
            Err(ProtocolError::EndpointMismatch.into())
        };
        if slot.done.send(completion).is_err() {
            debug!(seq, endpoint, "requester went away before its response");
        }
    }

    fn holds(&self, seq: u16, token: u64) -> bool {
        let table = self.table.lock();
        table.pending.get(&seq).is_some_and(|slot| slot.token == token)
    }

    fn forget(&self, seq: u16, token: u64) {
        let mut table = self.table.lock();
        if table.pending.get(&seq).is_some_and(|slot| slot.token == token) {
            table.pending.remove(&seq);
        }
    }

    /// Fails every pending request and refuses new ones.
    fn abort_all(&self) {
        let drained: Vec<(u16, Slot)> = {
            let mut table = self.table.lock();
            table.open = false;
            table.pending.drain().collect()
        };
        if !drained.is_empty() {
            debug!(count = drained.len(), "aborting pending requests");
        }
        for (_, slot) in drained {
            let _ = slot.done.send(Err(TransportError::Disconnected.into()));
        }
        self.closed.send_replace(true);
    }
}

/// A request to send in place of a pending one whose requester went away.
struct Withdraw {
    endpoint: Endpoint,
    body: Vec<u8>,
}

/// Releases the slot if the requesting future is dropped before completion.
///
/// A request that carries a [`Withdraw`] keeps its id once sent: the board
/// still holds it and will answer it after the withdrawal.
struct Pending<'a> {
    client: &'a Client,
    seq: u16,
    token: u64,
    withdraw: Option<Withdraw>,
}

impl Drop for Pending<'_> {
    fn drop(&mut self) {
        match self.withdraw.take() {
            Some(withdraw) if self.client.shared.holds(self.seq, self.token) => {
                self.client.withdraw(self.seq, self.token, withdraw)
            }
            _ => self.client.shared.forget(self.seq, self.token),
        }
    }
}

fn encode(seq: u16, endpoint: Endpoint, body: &[u8]) -> Result<Vec<u8>> {
    let frame = Frame {
        seq,
        endpoint: endpoint.id(),
        body,
    };
    match postcard::to_stdvec_cobs(&frame) {
        Ok(encoded) if encoded.len() <= MAX_FRAME_SIZE => Ok(encoded),
        _ => Err(ProtocolError::RequestTooLarge {
            max: MAX_FRAME_SIZE as u16,
        }
        .into()),
    }
}

/// `Client` owns the correlation table and the receive task for one link.
pub struct Client {
    shared: Arc<Shared>,
    tx: mpsc::Sender<Vec<u8>>,
    receiver: JoinHandle<()>,
}

impl Client {
    /// Starts the receive task on the current tokio runtime.
    pub fn new(link: Link) -> Self {
        let (tx, rx) = link.into_parts();
        let (closed, _) = watch::channel(false);
        let shared = Arc::new(Shared {
            table: Mutex::new(Table {
                next_seq: 0,
                next_token: 0,
                pending: HashMap::new(),
                open: true,
            }),
            closed,
        });
        let receiver = tokio::spawn(receive(shared.clone(), rx));
        Self {
            shared,
            tx,
            receiver,
        }
    }

    /// Sends `body` to `endpoint` and returns the raw response body.
    pub async fn submit(&self, endpoint: Endpoint, body: &[u8]) -> Result<Vec<u8>> {
        self.exchange(endpoint, body, None).await
    }

    async fn exchange(
        &self,
        endpoint: Endpoint,
        body: &[u8],
        withdraw: Option<Withdraw>,
    ) -> Result<Vec<u8>> {
        let (seq, token, rx) = self.shared.register(endpoint.id())?;
        let mut pending = Pending {
            client: self,
            seq,
            token,
            withdraw: None,
        };

        let encoded = encode(seq, endpoint, body)?;
        trace!(seq, %endpoint, len = body.len(), "request");
        if self.tx.send(encoded).await.is_err() {
            self.shared.abort_all();
            return Err(TransportError::Disconnected.into());
        }
        pending.withdraw = withdraw;

        let body = rx.await.map_err(|_| Error::Transport(TransportError::Disconnected))??;
        trace!(seq, %endpoint, len = body.len(), "response");
        Ok(body)
    }

    /// Sends `withdraw` on behalf of the dropped request `seq`.
    ///
    /// Runs inside `Drop`, so the frame is queued without waiting when the
    /// link has room and handed to a task otherwise. Only a frame queued at
    /// once is certain to reach the board ahead of later requests.
    fn withdraw(&self, seq: u16, token: u64, withdraw: Withdraw) {
        let Withdraw { endpoint, body } = withdraw;
        let (cancel, cancel_token, _) = match self.shared.register(endpoint.id()) {
            Ok(slot) => slot,
            Err(e) => {
                debug!(seq, %endpoint, "cannot withdraw: {}", e);
                self.shared.forget(seq, token);
                return;
            }
        };
        let give_up = || {
            self.shared.forget(cancel, cancel_token);
            self.shared.forget(seq, token);
        };
        let encoded = match encode(cancel, endpoint, &body) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!(seq, %endpoint, "cannot withdraw: {}", e);
                return give_up();
            }
        };
        debug!(seq, cancel, %endpoint, "withdrawing");
        match self.tx.try_send(encoded) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(encoded)) => match Handle::try_current() {
                Ok(handle) => {
                    let tx = self.tx.clone();
                    let shared = self.shared.clone();
                    handle.spawn(async move {
                        if tx.send(encoded).await.is_err() {
                            shared.abort_all();
                        }
                    });
                }
                Err(_) => {
                    warn!(seq, %endpoint, "cannot withdraw outside a runtime");
                    give_up();
                }
            },
            Err(mpsc::error::TrySendError::Closed(_)) => self.shared.abort_all(),
        }
    }

    /// Sends a typed request and decodes the typed reply.
    pub async fn call<Req, Resp>(&self, endpoint: Endpoint, req: &Req) -> Result<Resp>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let body = postcard::to_stdvec(req).map_err(|_| ProtocolError::MalformedRequest)?;
        let body = self.submit(endpoint, &body).await?;
        decode_reply(&body)
    }

    /// Like [`call`](Self::call), but if the returned future is dropped
    /// while the board still holds the request, `undo` is sent to
    /// `undo_endpoint` so the board lets go of it.
    pub async fn call_withdrawable<Req, Undo, Resp>(
        &self,
        endpoint: Endpoint,
        req: &Req,
        undo_endpoint: Endpoint,
        undo: &Undo,
    ) -> Result<Resp>
    where
        Req: Serialize + ?Sized,
        Undo: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let body = postcard::to_stdvec(req).map_err(|_| ProtocolError::MalformedRequest)?;
        let withdraw = Withdraw {
            endpoint: undo_endpoint,
            body: postcard::to_stdvec(undo).map_err(|_| ProtocolError::MalformedRequest)?,
        };
        let body = self.exchange(endpoint, &body, Some(withdraw)).await?;
        decode_reply(&body)
    }

    /// Number of requests still waiting for a response.
    pub fn pending_count(&self) -> usize {
        self.shared.table.lock().pending.len()
    }

    pub fn is_closed(&self) -> bool {
        !self.shared.table.lock().open
    }

    /// Resolves once the link has gone down.
    pub async fn wait_closed(&self) {
        let mut closed = self.shared.closed.subscribe();
        let _ = closed.wait_for(|closed| *closed).await;
    }
}

fn decode_reply<Resp: DeserializeOwned>(body: &[u8]) -> Result<Resp> {
    let reply: Reply<Resp> =
        postcard::from_bytes(body).map_err(|_| ProtocolError::MalformedResponse)?;
    Ok(reply?)
}

impl Drop for Client {
    fn drop(&mut self) {
        self.receiver.abort();
        self.shared.abort_all();
    }
}

async fn receive(shared: Arc<Shared>, mut rx: mpsc::Receiver<Vec<u8>>) {
    let mut decoder = Box::new(Decoder::<MAX_FRAME_SIZE>::new());
    while let Some(chunk) = rx.recv().await {
        for byte in chunk {
            match decoder.push(byte) {
                None => {}
                Some(Ok(raw)) => match Frame::decode(raw) {
                    Ok(frame) => shared.resolve(frame.seq, frame.endpoint, frame.body),
                    Err(e) => warn!("{}", e),
                },
                Some(Err(e)) => warn!("{}", e),
            }
        }
    }
    debug!("link closed");
    shared.abort_all();
}
