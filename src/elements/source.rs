//! Data sources reading from files or standard input.

use std::time::Duration;

use anyhow::Context;
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

use crate::element::Element;

#[derive(Deserialize)]
pub struct ReadLinesParams {
    pub fname: String,
    /// Minimum delay between lines, in seconds.
    #[serde(default)]
    pub delay: f64,
}

type Reader = Box<dyn AsyncBufRead + Send + Unpin>;

/// Yield each line of a file (or stdin, with `fname: stdin`) as a string
/// item, with a minimum delay between lines. The file opens lazily on
/// first poll; an open failure fails the consuming chain.
pub fn read_lines(p: ReadLinesParams) -> Element {
    let delay = Duration::from_secs_f64(p.delay);
    let fname = p.fname;
    Element::Producer(
        stream::once(async move {
            let reader: anyhow::Result<Reader> = if fname == "stdin" {
                Ok(Box::new(BufReader::new(tokio::io::stdin())))
            } else {
                match tokio::fs::File::open(&fname).await {
                    Ok(f) => Ok(Box::new(BufReader::new(f))),
                    Err(e) => Err(e).with_context(|| format!("cannot open {fname}")),
                }
            };
            match reader {
                Ok(reader) => stream::unfold(
                    (reader.lines(), true),
                    move |(mut lines, first)| async move {
                        if !first {
                            tokio::time::sleep(delay).await;
                        }
                        match lines.next_line().await {
                            Ok(Some(line)) => Some((
                                Ok(Value::String(line.trim_end().to_string())),
                                (lines, false),
                            )),
                            Ok(None) => None,
                            Err(e) => Some((Err(e.into()), (lines, false))),
                        }
                    },
                )
                .boxed(),
                Err(e) => stream::once(async move { Err(e) }).boxed(),
            }
        })
        .flatten()
        .boxed(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{Element, wrap_source};
    use serde_json::json;
    use std::io::Write;

    #[tokio::test]
    async fn yields_each_line_in_order() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "alpha").unwrap();
        writeln!(file, "beta").unwrap();
        file.flush().unwrap();

        let el = read_lines(ReadLinesParams {
            fname: file.path().to_string_lossy().to_string(),
            delay: 0.0,
        });
        let mut s = wrap_source("read_lines", el).unwrap();
        assert_eq!(s.next().await.unwrap().unwrap(), json!("alpha"));
        assert_eq!(s.next().await.unwrap().unwrap(), json!("beta"));
        assert!(s.next().await.is_none());
    }

    #[tokio::test]
    async fn missing_file_is_a_stream_error() {
        let el = read_lines(ReadLinesParams {
            fname: "/definitely/not/here".into(),
            delay: 0.0,
        });
        let mut s = match el {
            Element::Producer(s) => s,
            _ => unreachable!(),
        };
        assert!(s.next().await.unwrap().is_err());
    }
}
