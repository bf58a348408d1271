//! Named in-process channels decoupling producer and consumer chains.
//!
//! The registry is an explicit context object created by the graph builder
//! and shared (`Arc`) between the builder and the chains, so several nodes
//! can coexist in one process without hidden statics. Registration and
//! lazy creation go through the map's per-key entry API with no suspension
//! point, so two call sites can never race two channels onto one name.

use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::stream::{self, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::element::{Data, DataStream, StageFn};
use crate::error::{PipelineError, Result};

const SCHEME: &str = "queue://";

/// Drop the in-process scheme prefix, if present.
pub fn strip_scheme(address: &str) -> &str {
    address.strip_prefix(SCHEME).unwrap_or(address)
}

/// One named FIFO hand-off queue: any number of writers, one reader.
pub struct Channel {
    tx: mpsc::UnboundedSender<Data>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<Data>>>,
}

impl Channel {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Channel {
            tx,
            rx: Mutex::new(Some(rx)),
        }
    }
}

impl Default for Channel {
    fn default() -> Self {
        Self::new()
    }
}

/// Table of named channels for one node.
pub struct ChannelRegistry {
    channels: DashMap<String, Arc<Channel>>,
}

impl ChannelRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(ChannelRegistry {
            channels: DashMap::new(),
        })
    }

    /// Register `channel` under `preferred` (default `"channel"`). If the
    /// name is taken, probe `name.01`, `name.02`, ... until one is free.
    /// Returns the assigned name. Each probe is an atomic per-key entry,
    /// so concurrent registrations get distinct names.
    pub fn register(&self, channel: Channel, preferred: Option<&str>) -> String {
        let base = preferred.map(strip_scheme).unwrap_or("channel");
        let channel = Arc::new(channel);
        let mut n = 0usize;
        let mut candidate = base.to_string();
        loop {
            match self.channels.entry(candidate.clone()) {
                Entry::Vacant(e) => {
                    e.insert(channel);
                    debug!(name = %candidate, "registered channel");
                    return candidate;
                }
                Entry::Occupied(_) => {
                    n += 1;
                    candidate = format!("{base}.{n:02}");
                }
            }
        }
    }

    /// Look up a channel, creating it on first reference.
    pub fn lookup_or_create(&self, address: &str) -> Arc<Channel> {
        self.channels
            .entry(strip_scheme(address).to_string())
            .or_default()
            .clone()
    }

    pub fn contains(&self, address: &str) -> bool {
        self.channels.contains_key(strip_scheme(address))
    }

    /// All registered names, for diagnostics.
    pub fn names(&self) -> Vec<String> {
        self.channels.iter().map(|e| e.key().clone()).collect()
    }

    /// Enqueue one item, creating the channel on first reference. Delivery
    /// is not durable: a channel whose reader is gone drops the item.
    pub fn put(&self, address: &str, data: Data) {
        let chan = self.lookup_or_create(address);
        if chan.tx.send(data).is_err() {
            warn!(name = %strip_scheme(address), "channel reader closed, dropping item");
        }
    }

    /// The read head of a channel: a lazy sequence yielding each enqueued
    /// item as it becomes available, suspending when empty. Creates the
    /// channel on first reference; a channel is drained by exactly one
    /// reader, so a second `recv` on the same name fails.
    pub fn recv(&self, address: &str) -> Result<DataStream> {
        let name = strip_scheme(address);
        let chan = self.lookup_or_create(name);
        let rx = chan
            .rx
            .lock()
            .map_err(|_| PipelineError::ChannelBusy(name.to_string()))?
            .take()
            .ok_or_else(|| PipelineError::ChannelBusy(name.to_string()))?;
        debug!(name, "reading channel");
        Ok(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|d| (Ok(d), rx))
        })
        .boxed())
    }

    /// A pass-through fan-out stage: every incoming item is enqueued into
    /// each named channel, then forwarded unchanged downstream. All the
    /// targets must already exist; a missing one fails the build.
    pub fn send(&self, addresses: &[String]) -> Result<StageFn> {
        let mut targets = Vec::with_capacity(addresses.len());
        for address in addresses {
            let name = strip_scheme(address).to_string();
            let chan = self.channels.get(&name).ok_or_else(|| {
                warn!(name = %name, known = ?self.names(), "unknown send target");
                PipelineError::UnknownChannel(name.clone())
            })?;
            targets.push((name, chan.tx.clone()));
        }
        Ok(Box::new(move |source: DataStream| {
            source
                .map(move |item| {
                    let data = item?;
                    for (name, tx) in &targets {
                        // a closed target means its reader chain is gone;
                        // delivery is not durable, so drop and continue
                        if tx.send(data.clone()).is_err() {
                            warn!(target = %name, "send target closed, dropping item");
                        }
                    }
                    Ok(data)
                })
                .boxed()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn register_appends_numeric_suffixes() {
        let reg = ChannelRegistry::new();
        assert_eq!(reg.register(Channel::new(), Some("Q")), "Q");
        assert_eq!(reg.register(Channel::new(), Some("Q")), "Q.01");
        assert_eq!(reg.register(Channel::new(), Some("Q")), "Q.02");
        let mut names = reg.names();
        names.sort();
        assert_eq!(names, vec!["Q", "Q.01", "Q.02"]);
    }

    #[tokio::test]
    async fn send_then_recv_round_trip_in_order() {
        let reg = ChannelRegistry::new();
        reg.lookup_or_create("ch");
        let stage = reg.send(&["ch".to_string()]).unwrap();
        let source = stream::iter([1, 2, 3].map(|n| Ok(json!(n)))).boxed();

        // send is pass-through: the items come out unchanged
        let forwarded: Vec<i64> = stage(source)
            .map(|r| r.unwrap().as_i64().unwrap())
            .collect()
            .await;
        assert_eq!(forwarded, vec![1, 2, 3]);

        let mut rx = reg.recv("ch").unwrap();
        for expected in [1, 2, 3] {
            assert_eq!(rx.next().await.unwrap().unwrap(), json!(expected));
        }
    }

    #[tokio::test]
    async fn send_to_unknown_channel_fails() {
        let reg = ChannelRegistry::new();
        assert!(matches!(
            reg.send(&["nowhere".to_string()]),
            Err(PipelineError::UnknownChannel(name)) if name == "nowhere"
        ));
    }

    #[tokio::test]
    async fn recv_lazily_creates_and_claims_the_reader() {
        let reg = ChannelRegistry::new();
        let _head = reg.recv("queue://late").unwrap();
        assert!(reg.contains("late"));
        assert!(matches!(
            reg.recv("late"),
            Err(PipelineError::ChannelBusy(name)) if name == "late"
        ));
    }

    #[tokio::test]
    async fn put_reaches_the_reader() {
        let reg = ChannelRegistry::new();
        let mut head = reg.recv("in").unwrap();
        reg.put("in", json!("hello"));
        assert_eq!(head.next().await.unwrap().unwrap(), json!("hello"));
    }
}
