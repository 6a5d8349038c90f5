//! The point to point channel between the coordinator and a single worker.

use std::{io, time::Duration};

use log::trace;
use tokio::{sync::mpsc, time};

/// The outcome of a bounded wait on an endpoint.
#[derive(Debug, PartialEq)]
pub enum Polled<T> {
    /// A message arrived.
    Ready(T),
    /// Nothing arrived within the timeout, the channel is still open.
    Idle,
    /// The other end is gone and every message was consumed.
    Closed,
}

/// One end of a bidirectional FIFO channel.
///
/// Sends `S` messages and receives `R` messages.
#[derive(Debug)]
pub struct Endpoint<S, R> {
    tx: mpsc::Sender<S>,
    rx: mpsc::Receiver<R>,
}

impl<S, R> Endpoint<S, R> {
    /// Sends `msg` to the other end, waiting for capacity if needed.
    ///
    /// # Arguments
    /// * `msg` - The message to send.
    ///
    /// # Returns
    /// A `BrokenPipe` io error if the other end is gone.
    pub async fn send(&self, msg: S) -> io::Result<()> {
        self.tx.send(msg).await.map_err(|_| {
            trace!("send on a closed endpoint");
            io::Error::new(io::ErrorKind::BrokenPipe, "the other end of the channel is closed")
        })
    }

    /// Waits for the next message.
    ///
    /// # Returns
    /// `None` once the other end is gone and the channel is drained.
    pub async fn recv(&mut self) -> Option<R> {
        self.rx.recv().await
    }

    /// Waits at most `timeout` for the next message.
    ///
    /// Cancel safe, an elapsed wait never loses a message.
    ///
    /// # Arguments
    /// * `timeout` - The maximum time to wait.
    pub async fn poll(&mut self, timeout: Duration) -> Polled<R> {
        match time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(msg)) => Polled::Ready(msg),
            Ok(None) => Polled::Closed,
            Err(_) => Polled::Idle,
        }
    }

    /// Whether the other end dropped its receiving half.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Creates both ends of a bidirectional channel.
///
/// Messages are delivered in the order they were sent on each direction.
///
/// # Arguments
/// * `capacity` - The amount of in-flight messages per direction, at least one.
///
/// # Returns
/// The two endpoints, the first one sends `A` and the second one sends `B`.
pub fn channel<A, B>(capacity: usize) -> (Endpoint<A, B>, Endpoint<B, A>) {
    let (a_tx, a_rx) = mpsc::channel(capacity.max(1));
    let (b_tx, b_rx) = mpsc::channel(capacity.max(1));

    let a = Endpoint { tx: a_tx, rx: b_rx };
    let b = Endpoint { tx: b_tx, rx: a_rx };
    (a, b)
}
