//! Declarative streaming pipelines over tokio.
//!
//! A YAML document describes nodes; each node is a list of chains, each
//! chain a source followed by transform and stage elements, optionally
//! forwarding its output to other chains by name or transport address.
//! [`GraphBuilder`] turns the document into a [`Node`], which runs every
//! chain concurrently until its source ends, a stage fails, or the node
//! is cancelled.
//!
//! ```no_run
//! # async fn demo() -> anyhow::Result<()> {
//! let doc = snapflow::config::load_file("pipeline.yml").await?;
//! let node = snapflow::GraphBuilder::new().build(&doc, "main")?;
//! node.run().await?;
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod chain;
pub mod channel;
pub mod config;
pub mod element;
pub mod elements;
pub mod error;
pub mod logger;
pub mod node;
pub mod parallel;
pub mod status;
pub mod timing;
pub mod transport;

pub use builder::{BuildContext, Factory, FactoryRegistry, GraphBuilder};
pub use chain::{Chain, ChainSource, ChainState};
pub use channel::ChannelRegistry;
pub use element::{Buffer, Data, DataStream, Element, StageFn, TransformFn};
pub use error::{PipelineError, Result};
pub use node::Node;
