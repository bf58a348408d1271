//! Turns a configuration tree into an executable object graph.
//!
//! Names resolve through an explicit factory registry populated from the
//! built-in provider namespaces at startup; user extensions hook in
//! through [`GraphBuilder::with_factory`]. A name with a scheme or
//! without a `.` separator is a channel/transport reference (the default
//! channel-provider namespace).

use std::sync::Arc;

use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use serde_json::Value;
use tracing::{debug, info};

use crate::chain::{Chain, ChainSource};
use crate::channel::ChannelRegistry;
use crate::config::{ChainConfig, ConfigDoc, Kwargs, strip_marker};
use crate::element::{Buffer, DataStream, Element, StageFn, TransformFn, wrap};
use crate::error::{PipelineError, Result};
use crate::node::Node;
use crate::transport;

/// Constructs one element from parsed keyword arguments.
pub type Factory = Arc<dyn Fn(&BuildContext, Kwargs) -> anyhow::Result<Element> + Send + Sync>;

/// Dotted name → element factory.
pub struct FactoryRegistry {
    factories: DashMap<String, Factory>,
}

impl FactoryRegistry {
    pub fn new() -> Self {
        FactoryRegistry {
            factories: DashMap::new(),
        }
    }

    pub fn register(&self, name: &str, factory: Factory) {
        self.factories.insert(name.to_string(), factory);
    }

    pub fn resolve(&self, name: &str) -> Option<Factory> {
        self.factories.get(name).map(|f| f.clone())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.factories.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

impl Default for FactoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared state handed to factories while one node is being built.
pub struct BuildContext {
    pub registry: Arc<ChannelRegistry>,
    factories: Arc<FactoryRegistry>,
}

impl BuildContext {
    /// Resolve `name` and call its factory with `kwargs`. A construction
    /// failure is wrapped with the element name and position.
    pub fn build_named(&self, name: &str, kwargs: Kwargs, at: &str) -> Result<Element> {
        let factory = self.factories.resolve(name).ok_or_else(|| {
            PipelineError::config(
                format!(
                    "cannot resolve `{name}`; known elements: {}",
                    self.factories.names().join(", ")
                ),
                at,
            )
        })?;
        factory(self, kwargs).map_err(|e| {
            PipelineError::config(format!("failed to construct `{name}`: {e:#}"), at)
        })
    }

    /// Build an element from an inline object-construction value inside
    /// keyword arguments: either `"obj@name"` or `{ obj@name: { args } }`.
    pub fn build_value(&self, value: &Value, at: &str) -> Result<Element> {
        match value {
            Value::String(s) if s.starts_with(crate::config::OBJ_MARKER) => {
                self.build_named(strip_marker(s), Kwargs::new(), at)
            }
            Value::Object(map) if map.len() == 1 => {
                let (name, args) = map.iter().next().expect("len checked above");
                if !name.starts_with(crate::config::OBJ_MARKER) {
                    return Err(PipelineError::config(
                        format!("`{name}` is not an object construction (missing obj@ marker)"),
                        at,
                    ));
                }
                let kwargs = match args {
                    Value::Object(m) => m.clone(),
                    Value::Null => Kwargs::new(),
                    other => {
                        return Err(PipelineError::config(
                            format!("arguments of `{name}` must be a mapping, got {other}"),
                            at,
                        ));
                    }
                };
                self.build_named(strip_marker(name), kwargs, at)
            }
            other => Err(PipelineError::config(
                format!("expected an object construction, got {other}"),
                at,
            )),
        }
    }

    /// Like [`build_value`], but the element must be a pure transform.
    pub fn transform_arg(&self, value: &Value, at: &str) -> Result<TransformFn> {
        match self.build_value(value, at)? {
            Element::Transform(f) => Ok(f),
            other => Err(PipelineError::UnsupportedElement {
                name: at.to_string(),
                shape: other.shape(),
            }),
        }
    }
}

/// A name with a scheme, or without a `.` path separator, refers to a
/// channel or transport address rather than a constructible object.
fn is_reference(name: &str) -> bool {
    name.contains("://") || !name.contains('.')
}

/// Endless tick producer fed to a pacing stage used in source position.
fn ticks() -> DataStream {
    stream::repeat(Value::Bool(true)).map(Ok).boxed()
}

/// Pass-through stage that also enqueues every item into a buffer; the
/// glue between the two halves of a split chain.
fn buffer_put_stage(buf: Arc<dyn Buffer>) -> StageFn {
    Box::new(move |source: DataStream| {
        source
            .then(move |item| {
                let buf = buf.clone();
                async move {
                    let data = item?;
                    buf.put(data.clone()).await?;
                    Ok(data)
                }
            })
            .boxed()
    })
}

pub struct GraphBuilder {
    factories: Arc<FactoryRegistry>,
}

impl GraphBuilder {
    /// A builder with every built-in provider namespace installed.
    pub fn new() -> Self {
        let factories = FactoryRegistry::new();
        crate::elements::install(&factories);
        GraphBuilder {
            factories: Arc::new(factories),
        }
    }

    /// Register a user-supplied element factory under a dotted name.
    pub fn with_factory(self, name: &str, factory: Factory) -> Self {
        self.factories.register(name, factory);
        self
    }

    /// Build the named node from a parsed configuration document. Fails
    /// before any chain starts on malformed descriptors, unresolved
    /// names, misplaced sources or unknown forwarding targets.
    pub fn build(&self, doc: &ConfigDoc, node_name: &str) -> Result<Node> {
        let chain_cfgs = doc.node(node_name).ok_or_else(|| {
            PipelineError::config(
                format!(
                    "no node `{node_name}`; available nodes: {:?}",
                    doc.node_names()
                ),
                "config",
            )
        })?;
        info!(node = node_name, chains = chain_cfgs.len(), "building node");

        let registry = ChannelRegistry::new();
        let ctx = BuildContext {
            registry: registry.clone(),
            factories: self.factories.clone(),
        };

        // Channels come into existence on first reference, independent of
        // declaration order: create every implicit input channel before
        // any send stage resolves its targets.
        for cfg in chain_cfgs {
            match &cfg.source {
                None => {
                    registry.lookup_or_create(&cfg.name);
                }
                Some(src) => {
                    let (name, _) = src.parts(&cfg.name)?;
                    if is_reference(name) && transport::is_registry_address(name) {
                        registry.lookup_or_create(name);
                    }
                }
            }
        }

        let mut chains = Vec::new();
        for cfg in chain_cfgs {
            chains.extend(self.build_chain(&ctx, cfg)?);
        }
        Ok(Node::new(node_name, chains, registry))
    }

    /// Build one chain descriptor; a buffer element mid-chain splits it
    /// into consecutive chains glued by the buffer.
    fn build_chain(&self, ctx: &BuildContext, cfg: &ChainConfig) -> Result<Vec<Chain>> {
        debug!(chain = %cfg.name, "building chain");
        let source = match &cfg.source {
            None => ChainSource::Channel(cfg.name.clone(), ctx.registry.clone()),
            Some(src) => {
                let at = format!("{}[source]", cfg.name);
                let (name, kwargs) = src.parts(&at)?;
                if is_reference(name) {
                    if !kwargs.is_empty() {
                        return Err(PipelineError::config(
                            format!("channel reference `{name}` takes no arguments"),
                            at,
                        ));
                    }
                    transport::recv_source(ctx, name)?
                } else {
                    match ctx.build_named(name, kwargs, &at)? {
                        Element::Producer(s) => ChainSource::Producer(Some(s)),
                        Element::Buffer(buf) => ChainSource::Buffer(buf),
                        // a pacing stage in source position drives itself
                        Element::Stage(stage) => ChainSource::Producer(Some(stage(ticks()))),
                        el @ Element::Transform(_) => {
                            return Err(PipelineError::UnsupportedElement {
                                name: name.to_string(),
                                shape: el.shape(),
                            });
                        }
                    }
                }
            }
        };

        let mut chains = Vec::new();
        let mut current = Chain::new(cfg.name.clone(), source);
        let mut splits = 0usize;

        for (i, step) in cfg.steps.iter().enumerate() {
            let at = format!("{}[{i}]", cfg.name);
            let (name, kwargs) = step.parts(&at)?;
            if is_reference(name) {
                return Err(PipelineError::config(
                    format!("`{name}` is a source reference; only the first position of a chain may be a source"),
                    at,
                ));
            }
            match ctx.build_named(name, kwargs, &at)? {
                el @ (Element::Transform(_) | Element::Stage(_)) => {
                    current.push_stage(wrap(name, el)?);
                }
                Element::Producer(_) => {
                    return Err(PipelineError::config(
                        format!("`{name}` is a producer; only the first position of a chain may be a source"),
                        at,
                    ));
                }
                Element::Buffer(buf) => {
                    splits += 1;
                    current.push_stage(buffer_put_stage(buf.clone()));
                    chains.push(current);
                    current = Chain::new(
                        format!("{}.{splits:02}", cfg.name),
                        ChainSource::Buffer(buf),
                    );
                }
            }
        }

        if !cfg.to.is_empty() {
            current.push_stage(transport::send_stage(ctx, &cfg.to)?);
        }
        chains.push(current);
        Ok(chains)
    }
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}
