//! Pluggable transport providers.
//!
//! Every provider implements the same contract: `recv(address)` is a lazy
//! sequence of messages, `send(addresses)` is a pass-through fan-out
//! stage. The address scheme selects the provider: none or `queue://` is
//! the in-process channel registry, `tcp://` is the bundled line-delimited
//! JSON transport. `kafka://` is recognized as the topic-log scheme but no
//! topic-log client is bundled.

pub mod tcp;

use crate::builder::BuildContext;
use crate::chain::ChainSource;
use crate::channel::strip_scheme;
use crate::element::{DataStream, StageFn};
use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Registry,
    Tcp,
}

fn scheme(address: &str) -> Option<&str> {
    address.split_once("://").map(|(s, _)| s)
}

pub fn provider_for(address: &str) -> Result<Provider> {
    match scheme(address) {
        None | Some("") | Some("queue") => Ok(Provider::Registry),
        Some("tcp") => Ok(Provider::Tcp),
        Some("kafka") => Err(PipelineError::config(
            "the topic-log transport is not bundled in this build",
            address,
        )),
        Some(other) => Err(PipelineError::config(
            format!("unknown transport scheme `{other}`"),
            address,
        )),
    }
}

pub fn is_registry_address(address: &str) -> bool {
    matches!(provider_for(address), Ok(Provider::Registry))
}

/// Resolve an address in source position.
pub fn recv_source(ctx: &BuildContext, address: &str) -> Result<ChainSource> {
    match provider_for(address)? {
        Provider::Registry => Ok(ChainSource::Channel(
            strip_scheme(address).to_string(),
            ctx.registry.clone(),
        )),
        Provider::Tcp => Ok(ChainSource::Producer(Some(tcp::recv(address)?))),
    }
}

/// The lazy message sequence behind `io.recv`.
pub fn recv(ctx: &BuildContext, address: &str) -> Result<DataStream> {
    match provider_for(address)? {
        Provider::Registry => ctx.registry.recv(address),
        Provider::Tcp => tcp::recv(address),
    }
}

/// The fan-out send stage behind `io.send` and forwarding targets. The
/// provider is selected by the first address, as all the targets of one
/// stage travel over one transport.
pub fn send_stage(ctx: &BuildContext, addresses: &[String]) -> Result<StageFn> {
    let first = addresses.first().ok_or_else(|| {
        PipelineError::config("empty forwarding-target list", "send")
    })?;
    match provider_for(first)? {
        Provider::Registry => ctx.registry.send(addresses),
        Provider::Tcp => tcp::send(addresses.to_vec()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schemes_select_providers() {
        assert_eq!(provider_for("plain").unwrap(), Provider::Registry);
        assert_eq!(provider_for("queue://q").unwrap(), Provider::Registry);
        assert_eq!(provider_for("tcp://127.0.0.1:9000").unwrap(), Provider::Tcp);
        assert!(provider_for("kafka://topic").is_err());
        assert!(matches!(
            provider_for("carrier-pigeon://x"),
            Err(PipelineError::Configuration { msg, .. }) if msg.contains("carrier-pigeon")
        ));
    }
}
