//! A transport that delivers into memory
//!
//! Records every accepted message and can be told to fail, either when
//! opening a connection or when sending to particular recipients. Clones
//! share state, so a test can keep one handle and give another to the code
//! under test.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use postbox_common::{Message, normalize_address};

use crate::{Connection, ErrorKind, Transport, TransportError};

#[derive(Debug, Default)]
struct State {
    delivered: Vec<Message>,
    /// Opens beyond the count fail with the error
    open_failure: Option<(usize, TransportError)>,
    recipient_failures: HashMap<String, ErrorKind>,
    disconnects: HashSet<String>,
    send_delay: Option<Duration>,
    opens: usize,
    closes: usize,
    attempts: usize,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    state: Arc<Mutex<State>>,
}

impl MemoryTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every subsequent `open` fail with `error`
    pub fn fail_open(&self, error: TransportError) {
        let mut state = self.state();
        let opened = state.opens;
        state.open_failure = Some((opened, error));
    }

    /// Let `successes` more opens through, then fail the rest with `error`
    pub fn fail_open_after(&self, successes: usize, error: TransportError) {
        let mut state = self.state();
        let opened = state.opens + successes;
        state.open_failure = Some((opened, error));
    }

    /// Make every send to `address` fail with `kind`
    pub fn fail_recipient(&self, address: &str, kind: ErrorKind) {
        self.state()
            .recipient_failures
            .insert(normalize_address(address), kind);
    }

    /// Make every send to `address` drop the connection it was sent on
    pub fn disconnect_on(&self, address: &str) {
        self.state().disconnects.insert(normalize_address(address));
    }

    /// Wait this long before completing each send
    pub fn delay_sends(&self, delay: Duration) {
        self.state().send_delay = Some(delay);
    }

    /// Messages accepted so far, in the order they were sent
    #[must_use]
    pub fn delivered(&self) -> Vec<Message> {
        self.state().delivered.clone()
    }

    #[must_use]
    pub fn opens(&self) -> usize {
        self.state().opens
    }

    #[must_use]
    pub fn closes(&self) -> usize {
        self.state().closes
    }

    /// Sends attempted, successful or not
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.state().attempts
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open(&self) -> crate::Result<Box<dyn Connection>> {
        let mut state = self.state();
        state.opens += 1;

        if let Some((allowed, error)) = &state.open_failure
            && state.opens > *allowed
        {
            return Err(error.clone());
        }

        Ok(Box::new(MemoryConnection {
            transport: self.clone(),
            closed: false,
            lost: false,
        }))
    }
}

#[derive(Debug)]
struct MemoryConnection {
    transport: MemoryTransport,
    closed: bool,
    lost: bool,
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn send(&mut self, message: &Message) -> crate::Result<()> {
        if self.closed {
            return Err(TransportError::socket("Connection is closed"));
        }
        if self.lost {
            return Err(TransportError::socket("Connection was lost"));
        }

        let delay = {
            let mut state = self.transport.state();
            state.attempts += 1;
            state.send_delay
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.transport.state();
        let address = normalize_address(&message.to_address);
        if state.disconnects.contains(&address) {
            self.lost = true;
            return Err(TransportError::socket(format!(
                "Connection lost while sending to {}",
                message.to_address
            )));
        }

        if let Some(kind) = state
            .recipient_failures
            .get(&address)
        {
            return Err(TransportError::new(
                *kind,
                format!("{kind} for {}", message.to_address),
            ));
        }

        state.delivered.push(message.clone());
        Ok(())
    }

    fn is_usable(&self) -> bool {
        !self.closed && !self.lost
    }

    async fn close(&mut self) -> crate::Result<()> {
        if !self.closed {
            self.closed = true;
            self.transport.state().closes += 1;
        }
        Ok(())
    }
}
