//! Built-in element provider namespaces.
//!
//! Each factory takes the parsed keyword arguments of one descriptor and
//! returns an [`Element`]; [`install`] registers all of them under their
//! dotted names.

pub mod misc;
pub mod output;
pub mod source;

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::builder::FactoryRegistry;
use crate::config::Kwargs;
use crate::element::Element;
use crate::parallel::{ParallelBridge, PoolKind};
use crate::{status, timing, transport};

/// Deserialize keyword arguments into a typed parameter struct.
fn params<T: DeserializeOwned>(kwargs: Kwargs) -> anyhow::Result<T> {
    Ok(serde_json::from_value(Value::Object(kwargs))?)
}

fn default_seconds() -> f64 {
    1.0
}

#[derive(Deserialize)]
struct EveryParams {
    #[serde(default = "default_seconds")]
    seconds: f64,
}

#[derive(Deserialize)]
struct ParallelParams {
    function: Value,
    #[serde(default = "ParallelParams::default_pool")]
    pool: String,
    #[serde(default)]
    max_workers: Option<usize>,
}

impl ParallelParams {
    fn default_pool() -> String {
        "thread".to_string()
    }
}

#[derive(Deserialize)]
struct AddressParams {
    #[serde(deserialize_with = "one_or_many_addresses")]
    address: Vec<String>,
}

fn one_or_many_addresses<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(v) => v,
    })
}

#[derive(Deserialize)]
struct StatusParams {
    address: String,
    #[serde(default = "default_seconds")]
    timeout: f64,
}

/// Register every built-in provider namespace.
pub fn install(registry: &FactoryRegistry) {
    registry.register(
        "timing.every",
        Arc::new(|_ctx, kwargs| {
            let p: EveryParams = params(kwargs)?;
            Ok(Element::Stage(timing::every(Duration::from_secs_f64(
                p.seconds,
            ))))
        }),
    );

    registry.register(
        "output.dump",
        Arc::new(|_ctx, kwargs| {
            let p: output::DumpParams = params(kwargs)?;
            Ok(output::dump(p))
        }),
    );
    registry.register(
        "output.dump_to_file",
        Arc::new(|_ctx, kwargs| {
            let p: output::DumpToFileParams = params(kwargs)?;
            output::dump_to_file(p)
        }),
    );
    registry.register(
        "output.log",
        Arc::new(|_ctx, kwargs| {
            let p: output::LogParams = params(kwargs)?;
            Ok(output::log(p))
        }),
    );

    registry.register(
        "source.read_lines",
        Arc::new(|_ctx, kwargs| {
            let p: source::ReadLinesParams = params(kwargs)?;
            Ok(source::read_lines(p))
        }),
    );

    registry.register(
        "misc.run_shell",
        Arc::new(|_ctx, kwargs| {
            let p: misc::RunShellParams = params(kwargs)?;
            Ok(misc::run_shell(p))
        }),
    );

    registry.register(
        "parallel.parallel",
        Arc::new(|ctx, kwargs| {
            let p: ParallelParams = params(kwargs)?;
            let func = ctx.transform_arg(&p.function, "parallel.function")?;
            let pool = PoolKind::parse(&p.pool)?;
            Ok(Element::Buffer(Arc::new(ParallelBridge::new(
                func,
                pool,
                p.max_workers,
            ))))
        }),
    );

    registry.register(
        "io.recv",
        Arc::new(|ctx, kwargs| {
            let p: AddressParams = params(kwargs)?;
            let address = p
                .address
                .first()
                .ok_or_else(|| anyhow::anyhow!("io.recv needs exactly one address"))?;
            Ok(Element::Producer(transport::recv(ctx, address)?))
        }),
    );
    registry.register(
        "io.send",
        Arc::new(|ctx, kwargs| {
            let p: AddressParams = params(kwargs)?;
            Ok(Element::Stage(transport::send_stage(ctx, &p.address)?))
        }),
    );

    registry.register(
        "status.request",
        Arc::new(|_ctx, kwargs| {
            let p: StatusParams = params(kwargs)?;
            Ok(Element::Producer(status::request(
                &p.address,
                Duration::from_secs_f64(p.timeout),
            )?))
        }),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_builtin_namespaces_are_installed() {
        let registry = FactoryRegistry::new();
        install(&registry);
        for name in [
            "timing.every",
            "output.dump",
            "output.dump_to_file",
            "output.log",
            "source.read_lines",
            "misc.run_shell",
            "parallel.parallel",
            "io.recv",
            "io.send",
            "status.request",
        ] {
            assert!(registry.resolve(name).is_some(), "missing {name}");
        }
    }
}
