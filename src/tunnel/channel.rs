//! Duplex channel: one WebSocket wrapped into a typed send queue, a typed
//! receive sequence, and an idempotent close.
//!
//! Three tasks cooperate per channel:
//!
//! 1. **writer** — drains the send queue, encodes with the codec, writes one
//!    binary WebSocket frame per message. Encode or write failure triggers
//!    close.
//! 2. **reader** — blocks on the socket, decodes each frame onto the receive
//!    queue. Read failure, a close frame, or a decode failure triggers close.
//! 3. **terminator** — waits for the close signal, recovers the sink from
//!    the writer, and closes the socket.
//!
//! Close is single-shot: a compare-and-swap on an atomic flag guards the
//! transition, and a cancellation token publishes it to all three tasks and
//! to any caller parked in [`DuplexChannel::send`] or
//! [`DuplexChannel::closed`]. Both queues are bounded; senders block rather
//! than drop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::ws::Message;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::TunnelError;
use crate::tunnel::codec::{Decoder, Encoder};

/// The single-shot close signal shared by the channel handle and its tasks.
#[derive(Clone)]
struct CloseSignal {
    closed: Arc<AtomicBool>,
    token: CancellationToken,
}

impl CloseSignal {
    fn new() -> Self {
        Self {
            closed: Arc::new(AtomicBool::new(false)),
            token: CancellationToken::new(),
        }
    }

    /// Transition to closed. Returns `true` only for the call that wins the
    /// compare-and-swap.
    fn trigger(&self) -> bool {
        let initiated = self
            .closed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if initiated {
            self.token.cancel();
        }
        initiated
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn cancelled(&self) {
        self.token.cancelled().await;
    }
}

/// A typed, ordered, closeable view over one WebSocket.
///
/// `S` is the outbound message type, `R` the inbound one. The socket and the
/// codec are consumed at construction; the handle itself is cheap to share
/// behind an `Arc`.
pub struct DuplexChannel<S, R> {
    send_tx: mpsc::Sender<S>,
    recv_rx: Mutex<mpsc::Receiver<R>>,
    signal: CloseSignal,
}

impl<S, R> DuplexChannel<S, R>
where
    S: Send + 'static,
    R: Send + 'static,
{
    /// Wrap `socket`, spawning the writer, reader, and terminator tasks.
    ///
    /// `capacity` bounds both the send and receive queues.
    pub fn new<W, C>(socket: W, codec: C, capacity: usize) -> Self
    where
        W: Stream<Item = Result<Message, axum::Error>>
            + Sink<Message, Error = axum::Error>
            + Send
            + 'static,
        C: Encoder<S> + Decoder<R> + Send + Sync + 'static,
    {
        let (send_tx, mut send_rx) = mpsc::channel::<S>(capacity);
        let (recv_tx, recv_rx) = mpsc::channel::<R>(capacity);
        let signal = CloseSignal::new();
        let codec = Arc::new(codec);
        let (mut sink, mut stream) = socket.split();

        let writer = {
            let signal = signal.clone();
            let codec = Arc::clone(&codec);
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        () = signal.cancelled() => break,
                        msg = send_rx.recv() => {
                            let Some(msg) = msg else { break };
                            let frame = match codec.encode(&msg) {
                                Ok(frame) => frame,
                                Err(err) => {
                                    warn!(%err, "failed to encode outbound message");
                                    signal.trigger();
                                    break;
                                }
                            };
                            if let Err(err) = sink.send(Message::Binary(frame.into())).await {
                                let err = TunnelError::Socket(err.to_string());
                                debug!(%err, "write failed");
                                signal.trigger();
                                break;
                            }
                        }
                    }
                }
                sink
            })
        };

        {
            let signal = signal.clone();
            tokio::spawn(async move {
                signal.cancelled().await;
                if let Ok(mut sink) = writer.await {
                    let _ = sink.close().await;
                }
            });
        }

        {
            let signal = signal.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        () = signal.cancelled() => break,
                        frame = stream.next() => match frame {
                            Some(Ok(Message::Binary(data))) => match codec.decode(data) {
                                Ok(msg) => {
                                    if recv_tx.send(msg).await.is_err() {
                                        break;
                                    }
                                }
                                Err(err) => {
                                    warn!(%err, "failed to decode inbound frame");
                                    signal.trigger();
                                    break;
                                }
                            },
                            Some(Ok(Message::Close(_))) | None => {
                                signal.trigger();
                                break;
                            }
                            // Text, ping, and pong frames are not part of the
                            // tunnel protocol.
                            Some(Ok(_)) => {}
                            Some(Err(err)) => {
                                let err = TunnelError::Socket(err.to_string());
                                debug!(%err, "read failed");
                                signal.trigger();
                                break;
                            }
                        }
                    }
                }
            });
        }

        Self {
            send_tx,
            recv_rx: Mutex::new(recv_rx),
            signal,
        }
    }

    /// Queue `msg` for the writer. Messages leave the socket one at a time
    /// in submission order. Blocks while the queue is full.
    ///
    /// # Errors
    ///
    /// [`TunnelError::ChannelClosed`] once the channel has closed, including
    /// while waiting for queue space.
    pub async fn send(&self, msg: S) -> Result<(), TunnelError> {
        if self.signal.is_closed() {
            return Err(TunnelError::ChannelClosed);
        }
        tokio::select! {
            () = self.signal.cancelled() => Err(TunnelError::ChannelClosed),
            permit = self.send_tx.reserve() => match permit {
                Ok(permit) => {
                    permit.send(msg);
                    Ok(())
                }
                Err(_) => Err(TunnelError::ChannelClosed),
            },
        }
    }

    /// Next inbound message, in wire order. `None` once the channel closes
    /// and the queue is drained.
    pub async fn recv(&self) -> Option<R> {
        self.recv_rx.lock().await.recv().await
    }

    /// Close the channel. Idempotent: returns `true` for the call that
    /// initiated the close, `false` if it was already closed.
    pub fn close(&self) -> bool {
        self.signal.trigger()
    }

    /// Whether the channel has closed.
    pub fn is_closed(&self) -> bool {
        self.signal.is_closed()
    }

    /// Resolves when the channel transitions to closed. Already-closed
    /// channels resolve immediately.
    pub async fn closed(&self) {
        self.signal.cancelled().await;
    }
}

impl<S, R> Drop for DuplexChannel<S, R> {
    fn drop(&mut self) {
        // A handle dropped without close() still releases the socket.
        self.signal.trigger();
    }
}
