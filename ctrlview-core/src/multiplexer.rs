//! Shared server-push streams
//!
//! A [`Multiplexer`] keeps at most one underlying stream open per
//! (operation, filter signature) pair. Subscribers to the same key share the
//! stream, receive every merged snapshot in arrival order, and a late
//! subscriber is caught up with the last snapshot immediately.
//!
//! The registry is owned by the multiplexer value (cloning shares it), so a
//! process creates one per operation at start-up and injects it where
//! needed. Every registry mutation happens under a single lock acquisition.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::merge::MergeResponse;
use crate::request::{Modifier, build_request, filter_signature};
use crate::subscription::Subscription;
use crate::transport::{ControllerTransport, Metadata, StreamOperation, TransportError, TransportEvent};

/// What a subscriber receives
#[derive(Debug)]
pub enum StreamUpdate<R> {
    /// The merged snapshot after the latest message
    Data(Arc<R>),
    /// The stream failed; the last snapshot stays cached
    Error(TransportError),
    /// The server closed the stream; no further updates follow
    End,
}

impl<R> Clone for StreamUpdate<R> {
    fn clone(&self) -> Self {
        match self {
            StreamUpdate::Data(data) => StreamUpdate::Data(data.clone()),
            StreamUpdate::Error(err) => StreamUpdate::Error(err.clone()),
            StreamUpdate::End => StreamUpdate::End,
        }
    }
}

type ListenerId = u64;

struct Entry<R> {
    /// Bumped whenever the underlying stream is reopened
    generation: u64,
    snapshot: Option<Arc<R>>,
    listeners: BTreeMap<ListenerId, mpsc::UnboundedSender<StreamUpdate<R>>>,
    cancel: Subscription,
    pump: Option<JoinHandle<()>>,
    failed: bool,
}

impl<R> Entry<R> {
    fn broadcast(&self, update: StreamUpdate<R>) {
        for tx in self.listeners.values() {
            // a closed receiver is released through its own subscription
            let _ = tx.send(update.clone());
        }
    }

    fn close_stream(&mut self) {
        self.cancel.dispose();
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

struct Registry<R> {
    entries: HashMap<String, Entry<R>>,
    next_listener: ListenerId,
    next_generation: u64,
}

impl<R> Default for Registry<R> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            next_listener: 0,
            next_generation: 0,
        }
    }
}

type SharedRegistry<R> = Arc<Mutex<Registry<R>>>;

fn lock<R>(registry: &Mutex<Registry<R>>) -> MutexGuard<'_, Registry<R>> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle returned by [`Multiplexer::subscribe`]. Dropping it unsubscribes.
#[derive(Debug)]
pub struct StreamSubscription<R> {
    key: String,
    updates: mpsc::UnboundedReceiver<StreamUpdate<R>>,
    handle: Subscription,
}

impl<R> StreamSubscription<R> {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Next update, or `None` once unsubscribed and drained
    pub async fn next(&mut self) -> Option<StreamUpdate<R>> {
        self.updates.recv().await
    }

    /// Next update if one is already queued
    pub fn try_next(&mut self) -> Option<StreamUpdate<R>> {
        self.updates.try_recv().ok()
    }

    /// Release this subscriber. Idempotent.
    pub fn unsubscribe(&mut self) {
        self.handle.dispose();
    }

    pub fn is_subscribed(&self) -> bool {
        !self.handle.is_disposed()
    }
}

/// Reference-counted stream sharing for one streaming operation
pub struct Multiplexer<O: StreamOperation> {
    transport: Arc<dyn ControllerTransport>,
    metadata: Arc<Metadata>,
    registry: SharedRegistry<O::Response>,
}

impl<O: StreamOperation> Clone for Multiplexer<O> {
    fn clone(&self) -> Self {
        Self {
            transport: self.transport.clone(),
            metadata: self.metadata.clone(),
            registry: self.registry.clone(),
        }
    }
}

impl<O: StreamOperation> Multiplexer<O> {
    pub fn new(transport: Arc<dyn ControllerTransport>, metadata: Arc<Metadata>) -> Self {
        Self {
            transport,
            metadata,
            registry: Arc::new(Mutex::new(Registry::default())),
        }
    }

    /// Registry key for a modifier list: `<operation>|<signature>`
    pub fn registry_key(modifiers: &[Modifier<O::Request>]) -> String {
        format!("{}|{}", O::NAME, filter_signature(modifiers))
    }

    /// Subscribe to the stream described by `modifiers`, opening it if no
    /// identical stream is open. Must be called within a tokio runtime.
    pub fn subscribe(&self, modifiers: &[Modifier<O::Request>]) -> StreamSubscription<O::Response> {
        let key = Self::registry_key(modifiers);
        let (tx, updates) = mpsc::unbounded_channel();

        let mut registry = lock(&self.registry);
        let listener = registry.next_listener;
        registry.next_listener += 1;

        let reopen = match registry.entries.get(&key) {
            Some(entry) => entry.failed,
            None => true,
        };
        if reopen {
            let generation = registry.next_generation;
            registry.next_generation += 1;

            let stream = O::open(self.transport.as_ref(), build_request(modifiers), &self.metadata);
            let (events, cancel) = stream.into_parts();
            let pump = tokio::spawn(pump::<O::Response>(
                self.registry.clone(),
                key.clone(),
                generation,
                events,
            ));

            match registry.entries.get_mut(&key) {
                Some(entry) => {
                    debug!(key = %key, "reopening failed stream");
                    entry.close_stream();
                    entry.generation = generation;
                    entry.cancel = cancel;
                    entry.pump = Some(pump);
                    entry.failed = false;
                }
                None => {
                    debug!(key = %key, "opening stream");
                    registry.entries.insert(
                        key.clone(),
                        Entry {
                            generation,
                            snapshot: None,
                            listeners: BTreeMap::new(),
                            cancel,
                            pump: Some(pump),
                            failed: false,
                        },
                    );
                }
            }
        } else {
            debug!(key = %key, "sharing open stream");
        }

        if let Some(entry) = registry.entries.get_mut(&key) {
            if let Some(snapshot) = &entry.snapshot {
                let _ = tx.send(StreamUpdate::Data(snapshot.clone()));
            }
            entry.listeners.insert(listener, tx);
        }
        drop(registry);

        let registry = self.registry.clone();
        let entry_key = key.clone();
        let handle = Subscription::new(move || unsubscribe(&registry, &entry_key, listener));

        StreamSubscription { key, updates, handle }
    }

    /// Number of underlying streams currently tracked
    pub fn open_streams(&self) -> usize {
        lock(&self.registry).entries.len()
    }

    /// Subscribers attached to `key`, zero if none is open
    pub fn ref_count(&self, key: &str) -> usize {
        lock(&self.registry)
            .entries
            .get(key)
            .map_or(0, |entry| entry.listeners.len())
    }

    /// Last merged snapshot for `key`
    pub fn snapshot(&self, key: &str) -> Option<Arc<O::Response>> {
        lock(&self.registry)
            .entries
            .get(key)
            .and_then(|entry| entry.snapshot.clone())
    }

    /// Cancel every open stream and forget all subscribers
    pub fn shutdown(&self) {
        let mut registry = lock(&self.registry);
        for (key, mut entry) in registry.entries.drain() {
            debug!(key = %key, "closing stream on shutdown");
            entry.close_stream();
        }
    }
}

fn unsubscribe<R>(registry: &Mutex<Registry<R>>, key: &str, listener: ListenerId) {
    let mut registry = lock(registry);
    let Some(entry) = registry.entries.get_mut(key) else {
        return;
    };
    if entry.listeners.remove(&listener).is_none() || !entry.listeners.is_empty() {
        return;
    }
    if let Some(mut entry) = registry.entries.remove(key) {
        debug!(key = %key, "last subscriber left, closing stream");
        entry.close_stream();
    }
}

async fn pump<R: MergeResponse + Send + Sync + 'static>(
    registry: SharedRegistry<R>,
    key: String,
    generation: u64,
    mut events: mpsc::UnboundedReceiver<TransportEvent<R>>,
) {
    while let Some(event) = events.recv().await {
        let mut guard = lock(&registry);
        let Some(entry) = guard.entries.get_mut(&key) else {
            return;
        };
        if entry.generation != generation {
            return;
        }

        match event {
            TransportEvent::Data(message) => {
                let merged = Arc::new(R::merge(entry.snapshot.as_deref(), message));
                trace!(key = %key, records = merged.len(), "merged stream message");
                entry.snapshot = Some(merged.clone());
                entry.broadcast(StreamUpdate::Data(merged));
            }
            TransportEvent::Status(status) if status.is_ok() => {}
            TransportEvent::Status(status) => {
                warn!(key = %key, code = %status.code, details = %status.details, "stream failed");
                entry.failed = true;
                entry.pump = None;
                entry.broadcast(StreamUpdate::Error(status.into()));
                return;
            }
            TransportEvent::End => break,
        }
    }

    // end of stream, or the transport dropped its sender
    let mut guard = lock(&registry);
    let current = guard
        .entries
        .get(&key)
        .is_some_and(|entry| entry.generation == generation);
    if current {
        if let Some(mut entry) = guard.entries.remove(&key) {
            debug!(key = %key, "stream ended");
            entry.pump = None;
            entry.broadcast(StreamUpdate::End);
        }
    }
}
