//! Deadline-based pacing.
//!
//! `every` enforces a minimum delay between successive items: it computes
//! the next deadline from the previous one rather than from "now", so a
//! slow consumer does not accumulate drift.

use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio::time::Instant;

use crate::element::{DataStream, StageFn};

/// A stage forwarding each upstream item no faster than `period`. The
/// first item passes immediately. Used as a source it paces an endless
/// tick producer (the builder supplies the ticks).
pub fn every(period: Duration) -> StageFn {
    Box::new(move |source: DataStream| {
        stream::unfold(
            (source, Instant::now()),
            move |(mut source, deadline)| async move {
                let item = source.next().await?;
                tokio::time::sleep_until(deadline).await;
                Some((item, (source, deadline + period)))
            },
        )
        .boxed()
    })
}
