//! The node supervisor: owns the built chains of one node, launches one
//! task per chain, wires shutdown signals to coordinated cancellation and
//! aggregates the outcomes.

use std::sync::Arc;

use anyhow::anyhow;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::chain::Chain;
use crate::channel::ChannelRegistry;
use crate::error::{PipelineError, Result};

pub struct Node {
    name: String,
    chains: Vec<Chain>,
    registry: Arc<ChannelRegistry>,
    cancel: CancellationToken,
}

impl Node {
    pub fn new(name: impl Into<String>, chains: Vec<Chain>, registry: Arc<ChannelRegistry>) -> Self {
        Node {
            name: name.into(),
            chains,
            registry,
            cancel: CancellationToken::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn chain_names(&self) -> Vec<String> {
        self.chains.iter().map(|c| c.name().to_string()).collect()
    }

    pub fn registry(&self) -> Arc<ChannelRegistry> {
        self.registry.clone()
    }

    /// Cancelling this token stops every chain of the node; the same token
    /// is triggered by SIGINT/SIGTERM while `run` is active.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Launch one task per chain and wait for all of them.
    ///
    /// A chain stopping cleanly does not affect its siblings. The first
    /// failure cancels every remaining chain in an orderly way and is
    /// propagated to the caller once they have all stopped. An external
    /// interrupt cancels every chain together and resolves `Ok`.
    pub async fn run(mut self) -> Result<()> {
        info!(node = %self.name, chains = self.chains.len(), "starting node");
        let mut tasks: FuturesUnordered<_> = self
            .chains
            .drain(..)
            .map(|chain| {
                let name = chain.name().to_string();
                let handle = tokio::spawn(chain.run(self.cancel.child_token()));
                async move { (name, handle.await) }
            })
            .collect();

        let signals = install_shutdown_handler(self.cancel.clone());

        let mut outcome = Ok(());
        while let Some((name, joined)) = tasks.next().await {
            let failure = match joined {
                Ok(Ok(())) => {
                    info!(node = %self.name, chain = %name, "chain finished");
                    continue;
                }
                Ok(Err(e)) => {
                    error!(node = %self.name, chain = %name, error = %e, "chain failed");
                    e
                }
                Err(join_err) => {
                    error!(node = %self.name, chain = %name, error = %join_err, "chain task aborted");
                    PipelineError::Chain {
                        chain: name,
                        source: anyhow!(join_err),
                    }
                }
            };
            // first failure wins; cancel the siblings and keep draining
            // so every chain gets an orderly stop before we report it
            if outcome.is_ok() {
                outcome = Err(failure);
                self.cancel.cancel();
            }
        }
        signals.abort();
        info!(node = %self.name, "node finished");
        outcome
    }
}

/// Trigger coordinated cancellation on SIGINT (Ctrl-C) or SIGTERM.
fn install_shutdown_handler(cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let interrupted = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "cannot listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        };
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};
            match signal(SignalKind::terminate()) {
                Ok(mut term) => {
                    tokio::select! {
                        _ = interrupted => {}
                        _ = term.recv() => {}
                    }
                }
                Err(e) => {
                    warn!(error = %e, "cannot listen for SIGTERM");
                    interrupted.await;
                }
            }
        }
        #[cfg(not(unix))]
        interrupted.await;

        info!("shutdown requested, cancelling all chains");
        cancel.cancel();
    })
}
