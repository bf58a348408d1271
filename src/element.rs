//! The uniform streaming-stage abstraction.
//!
//! Heterogeneous processing units (pure transforms, native stream stages,
//! producers, buffers) are normalized by [`wrap`] and [`wrap_source`] into
//! one shape: a function from an input [`DataStream`] to an output
//! [`DataStream`]. A chain is then just a fold of stages over its source.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde_json::Value;

use crate::error::{PipelineError, Result};

/// The item type flowing through every pipeline.
pub type Data = Value;

/// A lazy, cancellable sequence of items. Errors travel as items so a
/// failure inside any stage reaches the chain drive loop.
pub type DataStream = BoxStream<'static, anyhow::Result<Data>>;

/// One processing stage: maps the upstream sequence to a downstream one.
pub type StageFn = Box<dyn FnOnce(DataStream) -> DataStream + Send>;

/// A pure per-item transform.
pub type TransformFn = Arc<dyn Fn(Data) -> anyhow::Result<Data> + Send + Sync>;

/// An asynchronous get/put buffer. `get` returning `Ok(None)` means the
/// buffer is exhausted and the consuming stream should end.
#[async_trait]
pub trait Buffer: Send + Sync {
    async fn put(&self, data: Data) -> anyhow::Result<()>;
    async fn get(&self) -> anyhow::Result<Option<Data>>;
}

/// A processing unit before adaptation, as produced by element factories.
pub enum Element {
    /// A pure function applied to every item.
    Transform(TransformFn),
    /// Already a native streaming stage.
    Stage(StageFn),
    /// Emits items on its own; only valid in source position.
    Producer(DataStream),
    /// Async put/get hand-off; source position or chain split point.
    Buffer(Arc<dyn Buffer>),
}

impl Element {
    /// The apparent shape, for error reporting.
    pub fn shape(&self) -> &'static str {
        match self {
            Element::Transform(_) => "transformer",
            Element::Stage(_) => "stage",
            Element::Producer(_) => "producer",
            Element::Buffer(_) => "buffer",
        }
    }

    pub fn transform(f: impl Fn(Data) -> anyhow::Result<Data> + Send + Sync + 'static) -> Self {
        Element::Transform(Arc::new(f))
    }
}

/// Normalize `candidate` into a stage.
///
/// A native stage passes through unchanged; a transform is lifted into a
/// stage that applies it to every upstream item, preserving order and
/// count. Producers and buffers have no stage shape and are rejected.
pub fn wrap(name: &str, candidate: Element) -> Result<StageFn> {
    match candidate {
        Element::Stage(f) => Ok(f),
        Element::Transform(f) => Ok(Box::new(move |source: DataStream| {
            source.map(move |item| item.and_then(|d| f(d))).boxed()
        })),
        other => Err(PipelineError::UnsupportedElement {
            name: name.to_string(),
            shape: other.shape(),
        }),
    }
}

/// Normalize `candidate` into the head sequence of a pipeline.
///
/// Accepts a native producer, or a buffer (drained through its `get`
/// operation). Anything else is rejected.
pub fn wrap_source(name: &str, candidate: Element) -> Result<DataStream> {
    match candidate {
        Element::Producer(s) => Ok(s),
        Element::Buffer(buf) => Ok(stream::unfold(buf, |buf| async move {
            match buf.get().await {
                Ok(Some(data)) => Some((Ok(data), buf)),
                Ok(None) => None,
                Err(e) => Some((Err(e), buf)),
            }
        })
        .boxed()),
        other => Err(PipelineError::UnsupportedElement {
            name: name.to_string(),
            shape: other.shape(),
        }),
    }
}

/// A finite producer over owned items, mostly for tests and demos.
pub fn iter_producer<I>(items: I) -> Element
where
    I: IntoIterator<Item = Data>,
    I::IntoIter: Send + 'static,
{
    Element::Producer(stream::iter(items.into_iter().map(Ok)).boxed())
}
