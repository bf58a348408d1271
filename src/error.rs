use thiserror::Error;

/// Errors raised while building or running a pipeline node.
///
/// Everything except `Chain` is a build-time failure: node construction
/// aborts before any chain task starts. `Chain` wraps whatever went wrong
/// inside a running chain's drive loop, tagged with the chain name.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("configuration error: {msg} in {at}")]
    Configuration { msg: String, at: String },

    #[error("unsupported element type: `{name}` is a {shape}")]
    UnsupportedElement { name: String, shape: &'static str },

    #[error("unknown channel `{0}`")]
    UnknownChannel(String),

    #[error("channel `{0}` is already consumed by another reader")]
    ChannelBusy(String),

    #[error("chain `{0}` is already built")]
    AlreadyBuilt(String),

    #[error("chain `{0}` has no writable source")]
    NoWritableSource(String),

    #[error("chain `{chain}` failed")]
    Chain {
        chain: String,
        #[source]
        source: anyhow::Error,
    },
}

impl PipelineError {
    pub fn config(msg: impl Into<String>, at: impl Into<String>) -> Self {
        PipelineError::Configuration {
            msg: msg.into(),
            at: at.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
