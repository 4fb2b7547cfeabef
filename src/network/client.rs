//! Client Connections
//!
//! One [`Client`] per live WebSocket connection, plus its pump pair: an
//! inbound task feeding decoded events into dispatch, and an outbound task
//! draining the client's queue onto the socket. The outbound task is the
//! connection's only writer, so delivery order per client is the enqueue
//! order. Either task observing a transport failure (or cancellation) tears
//! the connection down.

use std::sync::Arc;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::network::dispatch::Dispatcher;
use crate::network::protocol::Event;
use crate::session::lobby::Lobby;

/// A live, admitted connection.
pub struct Client {
    name: String,
    seq: u64,
    token: String,
    lobby: Arc<Lobby>,
    egress: mpsc::Sender<Event>,
    cancel: CancellationToken,
}

impl Client {
    /// Create a client handle and the receiving end of its outbound queue.
    ///
    /// The queue is bounded by `egress_capacity`; see [`Client::send`] for
    /// the overflow policy.
    pub fn new(
        name: String,
        token: String,
        lobby: Arc<Lobby>,
        egress_capacity: usize,
    ) -> (Arc<Self>, mpsc::Receiver<Event>) {
        let (egress, egress_rx) = mpsc::channel(egress_capacity);
        let seq = lobby.next_seq();
        let client = Arc::new(Self {
            name,
            seq,
            token,
            lobby,
            egress,
            cancel: CancellationToken::new(),
        });
        (client, egress_rx)
    }

    /// Authenticated username, used as the display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Join sequence within the lobby.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// The (consumed) admission token this connection presented.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// The lobby this connection belongs to, for its whole lifetime.
    pub fn lobby(&self) -> &Arc<Lobby> {
        &self.lobby
    }

    /// Enqueue an outbound event.
    ///
    /// Never blocks. A full queue means the consumer has stalled; the client
    /// is disconnected so the broadcaster and the other clients stay live.
    pub fn send(&self, event: Event) {
        match self.egress.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(client = %self.name, "outbound queue full, disconnecting");
                self.cancel.cancel();
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    /// Request teardown of both pump tasks.
    pub fn disconnect(&self) {
        self.cancel.cancel();
    }

    /// Whether teardown has been requested.
    pub fn is_disconnected(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Drive the connection until it closes, then deregister.
    ///
    /// Spawns the outbound pump, runs the inbound pump in place, and on exit
    /// of either cancels the other, removes the client from its lobby, and
    /// drops the socket.
    pub async fn run(
        self: Arc<Self>,
        ws: WebSocketStream<TcpStream>,
        egress_rx: mpsc::Receiver<Event>,
        dispatcher: Arc<Dispatcher>,
    ) {
        let (sink, stream) = ws.split();

        let writer = tokio::spawn(Self::write_pump(self.clone(), sink, egress_rx));
        self.read_pump(stream, dispatcher).await;

        self.cancel.cancel();
        let _ = writer.await;

        self.lobby.remove_client(self.seq);
        debug!(client = %self.name, lobby = %self.lobby.id(), "connection closed");
    }

    /// Inbound pump: decode frames and feed the dispatcher.
    ///
    /// Decode and dispatch failures are per-message: they are logged,
    /// reported back on the same connection, and the pump keeps going. Only
    /// transport-level failures end the loop.
    async fn read_pump(
        self: &Arc<Self>,
        mut stream: SplitStream<WebSocketStream<TcpStream>>,
        dispatcher: Arc<Dispatcher>,
    ) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        let event = match Event::from_json(&text) {
                            Ok(event) => event,
                            Err(err) => {
                                debug!(client = %self.name, %err, "undecodable frame");
                                self.send(Event::error("invalid message format"));
                                continue;
                            }
                        };
                        if let Err(err) = dispatcher.dispatch(&event, self) {
                            debug!(client = %self.name, event = %event.kind, %err, "event rejected");
                            self.send(Event::error(&err.to_string()));
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {
                        // Binary frames are not part of the protocol; pings
                        // and pongs are handled by the transport.
                    }
                    Some(Err(err)) => {
                        debug!(client = %self.name, %err, "transport error");
                        break;
                    }
                },
            }
        }
    }

    /// Outbound pump: the connection's single writer, draining the queue in
    /// FIFO order.
    async fn write_pump(
        client: Arc<Self>,
        mut sink: SplitSink<WebSocketStream<TcpStream>, Message>,
        mut egress_rx: mpsc::Receiver<Event>,
    ) {
        loop {
            tokio::select! {
                _ = client.cancel.cancelled() => break,
                event = egress_rx.recv() => {
                    let Some(event) = event else { break };
                    let text = match event.to_json() {
                        Ok(text) => text,
                        Err(err) => {
                            error!(client = %client.name, %err, "failed to serialize event");
                            continue;
                        }
                    };
                    if sink.send(Message::Text(text)).await.is_err() {
                        client.cancel.cancel();
                        break;
                    }
                }
            }
        }
        let _ = sink.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::problem::ProblemSet;
    use std::time::Duration;

    fn test_lobby() -> Arc<Lobby> {
        Lobby::new(
            "lobby-1".into(),
            "Trivia".into(),
            600,
            ProblemSet::default_set(),
            Duration::from_secs(5),
            Duration::from_secs(1),
        )
    }

    #[tokio::test]
    async fn test_send_preserves_fifo_order() {
        let lobby = test_lobby();
        let (client, mut rx) = Client::new("alice".into(), "tok".into(), lobby, 8);

        client.send(Event::new_member("first"));
        client.send(Event::new_member("second"));

        assert_eq!(rx.recv().await.unwrap().payload["name"], "first");
        assert_eq!(rx.recv().await.unwrap().payload["name"], "second");
    }

    #[tokio::test]
    async fn test_overflow_disconnects() {
        let lobby = test_lobby();
        let (client, _rx) = Client::new("alice".into(), "tok".into(), lobby, 1);

        client.send(Event::game_over(1));
        assert!(!client.is_disconnected());

        // Queue full and nobody draining: the client is cut loose.
        client.send(Event::game_over(2));
        assert!(client.is_disconnected());
    }

    #[tokio::test]
    async fn test_send_after_receiver_dropped_is_quiet() {
        let lobby = test_lobby();
        let (client, rx) = Client::new("alice".into(), "tok".into(), lobby, 4);
        drop(rx);

        // Must not panic; the pump teardown handles deregistration.
        client.send(Event::game_over(0));
    }

    #[tokio::test]
    async fn test_seq_is_unique_per_lobby() {
        let lobby = test_lobby();
        let (a, _rx_a) = Client::new("a".into(), "t".into(), lobby.clone(), 4);
        let (b, _rx_b) = Client::new("b".into(), "t".into(), lobby.clone(), 4);
        assert_ne!(a.seq(), b.seq());
        assert_eq!(a.token(), "t");
    }
}
