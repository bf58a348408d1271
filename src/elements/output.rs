//! Output steps: print, append to a file, or log each item, always
//! passing it through unchanged.

use std::io::Write;

use anyhow::Context;
use serde::Deserialize;
use tracing::info;

use crate::element::Element;

#[derive(Deserialize)]
pub struct DumpParams {
    #[serde(default = "DumpParams::default_prefix")]
    pub prefix: String,
    #[serde(default)]
    pub rewrite: bool,
}

impl DumpParams {
    fn default_prefix() -> String {
        "DUMP".to_string()
    }
}

/// Print each item to stdout with a prefix. With `rewrite` the line ends
/// in `\r` so the next one overwrites it.
pub fn dump(p: DumpParams) -> Element {
    Element::transform(move |data| {
        if p.rewrite {
            print!("{} {data}\r", p.prefix);
            let _ = std::io::stdout().flush();
        } else {
            println!("{} {data}", p.prefix);
        }
        Ok(data)
    })
}

#[derive(Deserialize)]
pub struct DumpToFileParams {
    pub fname: String,
}

/// Append each item to a text file, truncated at build time.
pub fn dump_to_file(p: DumpToFileParams) -> anyhow::Result<Element> {
    std::fs::write(&p.fname, "#------\n").with_context(|| format!("cannot write {}", p.fname))?;
    let fname = p.fname;
    Ok(Element::transform(move |data| {
        let mut f = std::fs::OpenOptions::new()
            .append(true)
            .open(&fname)
            .with_context(|| format!("cannot open {fname}"))?;
        writeln!(f, "{data}")?;
        Ok(data)
    }))
}

#[derive(Deserialize)]
pub struct LogParams {
    #[serde(default = "LogParams::default_logger")]
    pub logger: String,
    #[serde(default = "LogParams::default_fmt")]
    pub fmt: String,
}

impl LogParams {
    fn default_logger() -> String {
        "snapflow".to_string()
    }
    fn default_fmt() -> String {
        "{}".to_string()
    }
}

/// Log each item through `tracing` at info level.
pub fn log(p: LogParams) -> Element {
    Element::transform(move |data| {
        let rendered = p.fmt.replace("{}", &data.to_string());
        info!(logger = %p.logger, "{rendered}");
        Ok(data)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{Element, wrap};
    use futures::stream::{self, StreamExt};
    use serde_json::json;

    #[tokio::test]
    async fn dump_to_file_truncates_then_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        let fname = path.to_string_lossy().to_string();

        let el = dump_to_file(DumpToFileParams { fname: fname.clone() }).unwrap();
        let stage = wrap("dump_to_file", el).unwrap();
        let source = stream::iter([json!(1), json!("two")].map(Ok)).boxed();
        let out: Vec<_> = stage(source).map(|r| r.unwrap()).collect().await;
        assert_eq!(out, vec![json!(1), json!("two")]);

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "#------\n1\n\"two\"\n");
    }

    #[tokio::test]
    async fn log_passes_items_through() {
        let el = log(LogParams {
            logger: "test".into(),
            fmt: "got {}".into(),
        });
        let stage = wrap("log", el).unwrap();
        let source = stream::iter([json!(42)].map(Ok)).boxed();
        let out: Vec<_> = stage(source).map(|r| r.unwrap()).collect().await;
        assert_eq!(out, vec![json!(42)]);
    }

    #[test]
    fn dump_builds_with_defaults() {
        let el = dump(DumpParams {
            prefix: DumpParams::default_prefix(),
            rewrite: false,
        });
        assert!(matches!(el, Element::Transform(_)));
    }
}
