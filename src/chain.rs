//! A chain: an ordered pipeline of stages driven by one source, run as a
//! single cancellable task.

use std::sync::Arc;

use futures::stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::channel::ChannelRegistry;
use crate::element::{Buffer, Data, DataStream, Element, StageFn, wrap_source};
use crate::error::{PipelineError, Result};

/// `Created → Built → Running → {Stopped | Failed}`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainState {
    Created,
    Built,
    Running,
    Stopped,
    Failed,
}

/// Where a chain's items come from.
pub enum ChainSource {
    /// A native producer; consumed once by `build`.
    Producer(Option<DataStream>),
    /// Drained through the buffer's `get` operation.
    Buffer(Arc<dyn Buffer>),
    /// The read head of a named registry channel, claimed at build time so
    /// forward references between chains resolve in any declaration order.
    Channel(String, Arc<ChannelRegistry>),
}

pub struct Chain {
    name: String,
    source: ChainSource,
    stages: Vec<StageFn>,
    stream: Option<DataStream>,
    state: ChainState,
}

impl Chain {
    pub fn new(name: impl Into<String>, source: ChainSource) -> Self {
        Chain {
            name: name.into(),
            source,
            stages: Vec::new(),
            stream: None,
            state: ChainState::Created,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ChainState {
        self.state
    }

    pub fn push_stage(&mut self, stage: StageFn) {
        self.stages.push(stage);
    }

    /// Enqueue data for this chain's own run loop. Defined only when the
    /// source is a registry channel.
    pub fn put(&self, data: Data) -> Result<()> {
        match &self.source {
            ChainSource::Channel(name, registry) => {
                registry.put(name, data);
                Ok(())
            }
            _ => Err(PipelineError::NoWritableSource(self.name.clone())),
        }
    }

    /// Resolve the source into the head sequence and fold every stage onto
    /// it in declaration order. May be called at most once.
    pub fn build(&mut self) -> Result<()> {
        if self.state != ChainState::Created {
            return Err(PipelineError::AlreadyBuilt(self.name.clone()));
        }
        info!(chain = %self.name, "building chain");
        let mut head = match &mut self.source {
            ChainSource::Producer(slot) => slot
                .take()
                .ok_or_else(|| PipelineError::AlreadyBuilt(self.name.clone()))?,
            ChainSource::Buffer(buf) => wrap_source(&self.name, Element::Buffer(buf.clone()))?,
            ChainSource::Channel(name, registry) => registry.recv(name)?,
        };
        for stage in self.stages.drain(..) {
            head = stage(head);
        }
        self.stream = Some(head);
        self.state = ChainState::Built;
        Ok(())
    }

    /// Drive the terminal sequence to exhaustion, yielding control between
    /// items so sibling chains make progress. Cancellation stops the chain
    /// cleanly; any other error is wrapped with the chain name and
    /// re-raised to the supervisor.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        if self.state == ChainState::Created {
            self.build()?;
        }
        let mut stream = self
            .stream
            .take()
            .ok_or_else(|| PipelineError::AlreadyBuilt(self.name.clone()))?;
        self.state = ChainState::Running;
        info!(chain = %self.name, "starting chain");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(chain = %self.name, "stopping chain");
                    self.state = ChainState::Stopped;
                    return Ok(());
                }
                item = stream.next() => match item {
                    Some(Ok(_)) => tokio::task::yield_now().await,
                    Some(Err(e)) => {
                        error!(chain = %self.name, error = %format!("{e:#}"), "chain failed");
                        self.state = ChainState::Failed;
                        return Err(PipelineError::Chain {
                            chain: self.name.clone(),
                            source: e,
                        });
                    }
                    None => {
                        info!(chain = %self.name, "chain exhausted");
                        self.state = ChainState::Stopped;
                        return Ok(());
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{iter_producer, wrap};
    use serde_json::json;
    use std::time::Duration;

    fn producer_source(items: Vec<Data>) -> ChainSource {
        match iter_producer(items) {
            Element::Producer(s) => ChainSource::Producer(Some(s)),
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn chain_drives_transforms_in_order() {
        let reg = ChannelRegistry::new();
        reg.lookup_or_create("out");

        let mut chain = Chain::new(
            "double",
            producer_source(vec![json!(1), json!(2), json!(3)]),
        );
        let stage = wrap(
            "x2",
            Element::transform(|d| Ok(json!(d.as_i64().unwrap() * 2))),
        )
        .unwrap();
        chain.push_stage(stage);
        chain.push_stage(reg.send(&["out".to_string()]).unwrap());

        chain.run(CancellationToken::new()).await.unwrap();

        let mut head = reg.recv("out").unwrap();
        for expected in [2, 4, 6] {
            assert_eq!(head.next().await.unwrap().unwrap(), json!(expected));
        }
    }

    #[tokio::test]
    async fn rebuilding_a_built_chain_is_an_error() {
        let mut chain = Chain::new("once", producer_source(vec![]));
        chain.build().unwrap();
        assert!(matches!(
            chain.build(),
            Err(PipelineError::AlreadyBuilt(name)) if name == "once"
        ));
    }

    #[tokio::test]
    async fn cancellation_is_not_a_failure() {
        let reg = ChannelRegistry::new();
        // channel-sourced chain: suspends forever waiting for input
        let chain = Chain::new("idle", ChainSource::Channel("idle".into(), reg.clone()));
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(chain.run(cancel.clone()));
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn stage_error_fails_the_chain_with_its_name() {
        let mut chain = Chain::new("bad", producer_source(vec![json!(1)]));
        chain.push_stage(
            wrap(
                "boom",
                Element::transform(|_| anyhow::bail!("element exploded")),
            )
            .unwrap(),
        );
        let err = chain.run(CancellationToken::new()).await.unwrap_err();
        match err {
            PipelineError::Chain { chain, source } => {
                assert_eq!(chain, "bad");
                assert!(source.to_string().contains("element exploded"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn put_requires_a_channel_source() {
        let chain = Chain::new("p", producer_source(vec![]));
        assert!(matches!(
            chain.put(json!(1)),
            Err(PipelineError::NoWritableSource(_))
        ));

        let reg = ChannelRegistry::new();
        let chain = Chain::new("q", ChainSource::Channel("q".into(), reg.clone()));
        chain.put(json!(7)).unwrap();
        let mut head = reg.recv("q").unwrap();
        assert_eq!(head.next().await.unwrap().unwrap(), json!(7));
    }
}
