//! Background consumer that applies a handler once per notification key.

use std::io;
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::bus::{EventBus, Subscription};
use crate::ledger::DeliveryLedger;
use crate::message::OutboundMessage;

/// Handle to control and join a running consumer.
#[derive(Debug)]
pub struct ConsumerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
    ledger: Arc<DeliveryLedger>,
}

impl ConsumerHandle {
    /// Request graceful shutdown and wait for the consumer to stop.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }

    /// Keys handled so far.
    pub fn ledger(&self) -> &DeliveryLedger {
        &self.ledger
    }
}

/// Consumes one topic of [`OutboundMessage`]s with at-least-once input and
/// at-most-once handling per key.
#[derive(Debug)]
pub struct DedupConsumer;

impl DedupConsumer {
    /// Spawn a consumer thread for `topic`.
    ///
    /// The subscription is taken before this returns, so nothing published
    /// afterwards is missed. Messages on other topics are ignored and repeated
    /// keys are dropped through `ledger`.
    pub fn spawn<B, H, E>(
        name: &str,
        bus: &B,
        topic: &'static str,
        ledger: Arc<DeliveryLedger>,
        mut handler: H,
    ) -> io::Result<ConsumerHandle>
    where
        B: EventBus<OutboundMessage> + ?Sized,
        H: FnMut(OutboundMessage) -> Result<(), E> + Send + 'static,
        E: core::fmt::Display + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let sub = bus.subscribe();
        let worker_ledger = ledger.clone();
        let worker = name.to_string();

        let join = thread::Builder::new().name(name.to_string()).spawn(move || {
            consume_loop(&worker, topic, sub, shutdown_rx, &worker_ledger, &mut handler)
        })?;

        Ok(ConsumerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
            ledger,
        })
    }
}

fn consume_loop<H, E>(
    worker: &str,
    topic: &str,
    sub: Subscription<OutboundMessage>,
    shutdown_rx: mpsc::Receiver<()>,
    ledger: &DeliveryLedger,
    handler: &mut H,
) where
    H: FnMut(OutboundMessage) -> Result<(), E>,
    E: core::fmt::Display,
{
    let tick = Duration::from_millis(100);

    loop {
        if shutdown_rx.try_recv().is_ok() {
            break;
        }

        match sub.recv_timeout(tick) {
            Ok(msg) => {
                if msg.topic != topic {
                    continue;
                }
                if !ledger.accept(&msg) {
                    debug!(worker, key = %msg.key, "duplicate delivery dropped");
                    continue;
                }
                let key = msg.key.clone();
                if let Err(err) = handler(msg) {
                    warn!(worker, key = %key, error = %err, "consumer handler failed");
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
}
