//! Liveness check endpoint and its polling client.
//!
//! The responder answers every request line with a fixed or computed
//! payload. The client polls it as a producer stage; a timeout yields a
//! sentinel item instead of failing, so a monitoring loop runs forever.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use futures::sink::SinkExt;
use futures::stream::{self, StreamExt};
use serde_json::json;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{debug, info, warn};

use crate::element::DataStream;
use crate::error::Result;
use crate::transport::tcp::host_port;

pub type StatusFn = Arc<dyn Fn() -> String + Send + Sync>;

pub fn fixed(payload: &str) -> StatusFn {
    let payload = payload.to_string();
    Arc::new(move || payload.clone())
}

/// Bind `address` and answer each request with the current status.
/// Failure to bind is startup-fatal and returned to the caller before any
/// chain runs.
pub async fn status_server(address: &str, status: StatusFn) -> anyhow::Result<JoinHandle<()>> {
    let addr = host_port(address)?;
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("cannot bind status responder on {addr}"))?;
    info!(address = %addr, "status responder listening");
    Ok(tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    debug!(peer = %peer, "status peer connected");
                    tokio::spawn(answer(stream, status.clone()));
                }
                Err(e) => {
                    warn!(error = %e, "status accept failed, retrying");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }))
}

async fn answer(stream: TcpStream, status: StatusFn) {
    let mut framed = Framed::new(stream, LinesCodec::new());
    while let Some(Ok(request)) = framed.next().await {
        debug!(request = %request, "status request");
        if framed.send(status()).await.is_err() {
            return;
        }
    }
}

struct Poller {
    addr: String,
    timeout: Duration,
    conn: Option<Framed<TcpStream, LinesCodec>>,
}

/// A producer polling the responder at `address`. Each item reports the
/// reply and the round-trip time in seconds; an unreachable or silent
/// responder yields a sentinel item and the loop keeps going.
pub fn request(address: &str, timeout: Duration) -> Result<DataStream> {
    let addr = host_port(address)?;
    let poller = Poller {
        addr,
        timeout,
        conn: None,
    };
    Ok(stream::unfold(poller, |mut poller| async move {
        let item = poll_once(&mut poller).await;
        Some((Ok(item), poller))
    })
    .boxed())
}

async fn poll_once(poller: &mut Poller) -> serde_json::Value {
    let t0 = Instant::now();
    let framed = match &mut poller.conn {
        Some(f) => f,
        None => match TcpStream::connect(poller.addr.as_str()).await {
            Ok(s) => poller.conn.insert(Framed::new(s, LinesCodec::new())),
            Err(e) => {
                warn!(address = %poller.addr, error = %e, "status responder unreachable");
                tokio::time::sleep(poller.timeout).await;
                return sentinel("UNREACHABLE", t0);
            }
        },
    };
    if framed.send("STATUS".to_string()).await.is_err() {
        poller.conn = None;
        return sentinel("UNREACHABLE", t0);
    }
    match tokio::time::timeout(poller.timeout, framed.next()).await {
        Ok(Some(Ok(reply))) => json!({
            "status": reply,
            "elapsed": t0.elapsed().as_secs_f64(),
        }),
        Ok(_) => {
            poller.conn = None;
            sentinel("UNREACHABLE", t0)
        }
        Err(_) => sentinel("TIMEOUT", t0),
    }
}

fn sentinel(kind: &str, t0: Instant) -> serde_json::Value {
    json!({ "status": kind, "elapsed": t0.elapsed().as_secs_f64() })
}
