//! Line-delimited JSON over TCP.
//!
//! `recv` binds a listener and fans in messages from any number of peer
//! connections; `send` connects to each target and reconnects with capped
//! backoff on any failure, so a transient drop never kills the chain.

use std::time::Duration;

use anyhow::anyhow;
use futures::sink::SinkExt;
use futures::stream::{self, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::{Framed, FramedRead, LinesCodec};
use tracing::{debug, info, warn};

use crate::element::{Data, DataStream, StageFn};
use crate::error::{PipelineError, Result};

const MAX_BACKOFF: Duration = Duration::from_secs(10);

/// `tcp://host:port` → `host:port`, validated at build time.
pub fn host_port(address: &str) -> Result<String> {
    let rest = address
        .strip_prefix("tcp://")
        .ok_or_else(|| PipelineError::config("expected a tcp://host:port address", address))?;
    if rest.rsplit_once(':').is_none_or(|(_, p)| p.parse::<u16>().is_err()) {
        return Err(PipelineError::config(
            "expected a tcp://host:port address",
            address,
        ));
    }
    Ok(rest.to_string())
}

/// Bind `address` and yield every message received from any connection.
/// The listener starts lazily on first poll; a bind failure is a stream
/// error (fatal for the consuming chain), everything after that is
/// recovered and logged.
pub fn recv(address: &str) -> Result<DataStream> {
    let addr = host_port(address)?;
    Ok(stream::once(async move {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(accept_loop(addr, tx));
        stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) })
    })
    .flatten()
    .boxed())
}

async fn accept_loop(addr: String, tx: mpsc::UnboundedSender<anyhow::Result<Data>>) {
    let listener = match TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            let _ = tx.send(Err(anyhow!("cannot bind {addr}: {e}")));
            return;
        }
    };
    info!(address = %addr, "listening");
    loop {
        if tx.is_closed() {
            return;
        }
        match listener.accept().await {
            Ok((stream, peer)) => {
                debug!(address = %addr, peer = %peer, "peer connected");
                tokio::spawn(read_connection(stream, tx.clone()));
            }
            Err(e) => {
                warn!(address = %addr, error = %e, "accept failed, retrying");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

async fn read_connection(stream: TcpStream, tx: mpsc::UnboundedSender<anyhow::Result<Data>>) {
    let mut lines = FramedRead::new(stream, LinesCodec::new());
    while let Some(line) = lines.next().await {
        match line {
            Ok(text) => match serde_json::from_str::<Data>(&text) {
                Ok(data) => {
                    if tx.send(Ok(data)).is_err() {
                        return;
                    }
                }
                Err(e) => warn!(error = %e, "dropping undecodable message"),
            },
            Err(e) => {
                warn!(error = %e, "connection lost");
                return;
            }
        }
    }
}

type Connection = Framed<TcpStream, LinesCodec>;

/// Connect to every target and forward each incoming item to all of them
/// before passing it downstream unchanged.
pub fn send(addresses: Vec<String>) -> Result<StageFn> {
    let targets: Vec<String> = addresses.iter().map(|a| host_port(a)).collect::<Result<_>>()?;
    Ok(Box::new(move |source: DataStream| {
        let conns: Vec<Option<Connection>> = targets.iter().map(|_| None).collect();
        stream::unfold(
            (source, targets, conns),
            |(mut source, targets, mut conns)| async move {
                let item = source.next().await?;
                let out = match item {
                    Ok(data) => {
                        deliver(&targets, &mut conns, &data).await;
                        Ok(data)
                    }
                    Err(e) => Err(e),
                };
                Some((out, (source, targets, conns)))
            },
        )
        .boxed()
    }))
}

/// Push one item to every target, reconnecting as long as it takes.
async fn deliver(targets: &[String], conns: &mut [Option<Connection>], data: &Data) {
    let line = data.to_string();
    for (addr, conn) in targets.iter().zip(conns.iter_mut()) {
        let mut backoff = Duration::from_millis(250);
        loop {
            let framed = match conn {
                Some(f) => f,
                None => match TcpStream::connect(addr.as_str()).await {
                    Ok(s) => {
                        info!(address = %addr, "connected");
                        conn.insert(Framed::new(s, LinesCodec::new()))
                    }
                    Err(e) => {
                        warn!(address = %addr, error = %e, "connect failed, retrying");
                        tokio::time::sleep(backoff).await;
                        backoff = (backoff * 2).min(MAX_BACKOFF);
                        continue;
                    }
                },
            };
            match framed.send(line.clone()).await {
                Ok(()) => break,
                Err(e) => {
                    warn!(address = %addr, error = %e, "send failed, reconnecting");
                    *conn = None;
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn host_port_validates_addresses() {
        assert_eq!(host_port("tcp://127.0.0.1:9000").unwrap(), "127.0.0.1:9000");
        assert!(host_port("127.0.0.1:9000").is_err());
        assert!(host_port("tcp://nohost").is_err());
        assert!(host_port("tcp://host:notaport").is_err());
    }

    #[tokio::test]
    async fn send_and_recv_round_trip() {
        let address = "tcp://127.0.0.1:39871";
        let mut incoming = recv(address).unwrap();

        let stage = send(vec![address.to_string()]).unwrap();
        let source = stream::iter([1, 2, 3].map(|n| Ok(json!(n)))).boxed();
        let forward = tokio::spawn(async move {
            let out: Vec<_> = stage(source).map(|r| r.unwrap()).collect().await;
            out
        });

        for expected in [1, 2, 3] {
            assert_eq!(incoming.next().await.unwrap().unwrap(), json!(expected));
        }
        // pass-through on the sending side too
        assert_eq!(forward.await.unwrap(), vec![json!(1), json!(2), json!(3)]);
    }

    #[tokio::test]
    async fn bind_failure_is_a_stream_error() {
        // occupy the port first
        let holder = TcpListener::bind("127.0.0.1:39872").await.unwrap();
        let mut incoming = recv("tcp://127.0.0.1:39872").unwrap();
        let err = incoming.next().await.unwrap().unwrap_err();
        assert!(err.to_string().contains("cannot bind"), "{err}");
        drop(holder);
    }
}
