//! Minimal runtime for a streaming operator graph.
//!
//! Characteristics:
//! - single-input operators, two-input co-operators and N-way unions
//! - bounded channels (backpressure)
//! - watermarks, checkpoint barriers and End are propagated
//! - every spawned task returns a handle so the caller can wait for drain

pub mod metrics;

use anyhow::Result;
use async_trait::async_trait;
use tandem_checkpoint::{BarrierResult, BarrierTracker};
use tandem_core::{StreamMessage, Timestamp};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

pub use metrics::{MetricsSnapshot, PipelineMetrics};

pub type Sender<T> = mpsc::Sender<StreamMessage<T>>;
pub type Receiver<T> = mpsc::Receiver<StreamMessage<T>>;

/// Outbound collector for an operator.
#[derive(Clone)]
pub struct Emitter<T> {
    tx: Sender<T>,
}

impl<T: Send + 'static> Emitter<T> {
    pub fn new(tx: Sender<T>) -> Self {
        Self { tx }
    }

    pub async fn emit(&mut self, msg: StreamMessage<T>) -> Result<()> {
        self.tx
            .send(msg)
            .await
            .map_err(|_| anyhow::anyhow!("downstream channel closed"))
    }

    pub async fn data(&mut self, item: T) -> Result<()> {
        self.emit(StreamMessage::Data(item)).await
    }

    pub async fn watermark(&mut self, ts: Timestamp) -> Result<()> {
        self.emit(StreamMessage::Watermark(ts)).await
    }

    pub async fn barrier(&mut self, checkpoint_id: u64) -> Result<()> {
        self.emit(StreamMessage::Barrier(checkpoint_id)).await
    }

    pub async fn end(&mut self) -> Result<()> {
        self.emit(StreamMessage::End).await
    }
}

/// An operator transforms an input stream into an output stream.
#[async_trait]
pub trait Operator: Send + 'static {
    type In: Send + 'static;
    type Out: Send + 'static;

    async fn on_message(
        &mut self,
        msg: StreamMessage<Self::In>,
        out: &mut Emitter<Self::Out>,
    ) -> Result<()>;

    /// Called when initializing the operator.
    async fn open(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called when closing the operator.
    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// A two-input operator.
///
/// The runtime owns the control messages: watermarks are combined as the
/// minimum over both inputs, barriers are forwarded once both inputs have
/// delivered them, and End is emitted after both inputs have ended.
#[async_trait]
pub trait CoOperator: Send + 'static {
    type In1: Send + 'static;
    type In2: Send + 'static;
    type Out: Send + 'static;

    async fn on_left(&mut self, item: Self::In1, out: &mut Emitter<Self::Out>) -> Result<()>;

    async fn on_right(&mut self, item: Self::In2, out: &mut Emitter<Self::Out>) -> Result<()>;

    /// Called when the combined watermark advances.
    async fn on_watermark(&mut self, _wm: Timestamp, _out: &mut Emitter<Self::Out>) -> Result<()> {
        Ok(())
    }

    /// Called once a barrier has arrived on both inputs, before it is forwarded.
    async fn on_barrier(&mut self, _checkpoint_id: u64) -> Result<()> {
        Ok(())
    }

    async fn open(&mut self) -> Result<()> {
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// A terminal stage that consumes a stream.
#[async_trait]
pub trait Sink: Send + 'static {
    type In: Send + 'static;

    async fn on_message(&mut self, msg: StreamMessage<Self::In>) -> Result<()>;

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Create a bounded channel for stream messages.
pub fn stream_channel<T>(capacity: usize) -> (Sender<T>, Receiver<T>) {
    mpsc::channel(capacity)
}

/// Spawn an operator as an async task.
pub fn spawn_operator<O>(
    name: &'static str,
    mut op: O,
    mut rx: Receiver<O::In>,
    tx: Sender<O::Out>,
) -> JoinHandle<Result<()>>
where
    O: Operator,
{
    tokio::spawn(async move {
        let mut out = Emitter::new(tx);
        debug!(%name, "operator started");

        if let Err(e) = op.open().await {
            error!(%name, error = %e, "operator open failed");
            let _ = out.end().await;
            return Err(e);
        }

        let mut result = Ok(());
        while let Some(msg) = rx.recv().await {
            let is_end = matches!(msg, StreamMessage::End);

            if let Err(e) = op.on_message(msg, &mut out).await {
                error!(%name, error = %e, "operator error");
                let _ = out.end().await;
                result = Err(e);
                break;
            }

            if is_end {
                break;
            }
        }

        if let Err(e) = op.close().await {
            error!(%name, error = %e, "operator close failed");
        }

        debug!(%name, "operator stopped");
        result
    })
}

/// Spawn a two-input operator as an async task.
pub fn spawn_co_operator<O>(
    name: &'static str,
    mut op: O,
    mut left: Receiver<O::In1>,
    mut right: Receiver<O::In2>,
    tx: Sender<O::Out>,
) -> JoinHandle<Result<()>>
where
    O: CoOperator,
{
    tokio::spawn(async move {
        let mut out = Emitter::new(tx);
        debug!(%name, "co-operator started");

        if let Err(e) = op.open().await {
            error!(%name, error = %e, "co-operator open failed");
            let _ = out.end().await;
            return Err(e);
        }

        let mut barriers = BarrierTracker::new(2);
        let mut watermarks: [Option<Timestamp>; 2] = [None, None];
        let mut combined_wm: Option<Timestamp> = None;
        let mut left_done = false;
        let mut right_done = false;

        let result: Result<()> = async {
            loop {
                // (input index, control message) for the side that produced one
                let control = tokio::select! {
                    msg = left.recv(), if !left_done => match msg {
                        Some(StreamMessage::Data(v)) => {
                            op.on_left(v, &mut out).await?;
                            None
                        }
                        Some(other) => Some((0usize, other.map(|_| ()))),
                        None => Some((0usize, StreamMessage::End)),
                    },
                    msg = right.recv(), if !right_done => match msg {
                        Some(StreamMessage::Data(v)) => {
                            op.on_right(v, &mut out).await?;
                            None
                        }
                        Some(other) => Some((1usize, other.map(|_| ()))),
                        None => Some((1usize, StreamMessage::End)),
                    },
                    else => break,
                };

                let Some((input, msg)) = control else { continue };
                match msg {
                    StreamMessage::Watermark(ts) => {
                        watermarks[input] = Some(ts);
                        if let [Some(a), Some(b)] = watermarks {
                            let wm = a.min(b);
                            if combined_wm.map_or(true, |cur| wm > cur) {
                                combined_wm = Some(wm);
                                op.on_watermark(wm, &mut out).await?;
                                out.watermark(wm).await?;
                            }
                        }
                    }
                    StreamMessage::Barrier(id) => {
                        if let BarrierResult::Aligned(id) = barriers.process_barrier(id) {
                            op.on_barrier(id).await?;
                            out.barrier(id).await?;
                        }
                    }
                    StreamMessage::End => {
                        if input == 0 {
                            left_done = true;
                        } else {
                            right_done = true;
                        }
                        if left_done && right_done {
                            out.end().await?;
                            break;
                        }
                    }
                    StreamMessage::Data(()) => {}
                }
            }
            Ok(())
        }
        .await;

        if let Err(e) = &result {
            error!(%name, error = %e, "co-operator error");
            let _ = out.end().await;
        }

        if let Err(e) = op.close().await {
            error!(%name, error = %e, "co-operator close failed");
        }

        debug!(%name, "co-operator stopped");
        result
    })
}

/// Spawn a task that merges several streams of the same type into one.
///
/// Data is forwarded as it arrives. The output watermark is the minimum
/// over inputs that have not ended, a barrier is forwarded once every input
/// has delivered it, and a single End follows the last input's End.
pub fn spawn_union<T>(name: &'static str, inputs: Vec<Receiver<T>>, tx: Sender<T>) -> JoinHandle<Result<()>>
where
    T: Send + 'static,
{
    tokio::spawn(async move {
        let mut out = Emitter::new(tx);
        let n = inputs.len();
        debug!(%name, inputs = n, "union started");
        if n == 0 {
            return out.end().await;
        }

        let (merged_tx, mut merged_rx) = mpsc::channel::<(usize, StreamMessage<T>)>(n * 16);
        for (index, mut rx) in inputs.into_iter().enumerate() {
            let merged_tx = merged_tx.clone();
            tokio::spawn(async move {
                while let Some(msg) = rx.recv().await {
                    let end = msg.is_end();
                    if merged_tx.send((index, msg)).await.is_err() || end {
                        return;
                    }
                }
                // a dropped sender counts as End
                let _ = merged_tx.send((index, StreamMessage::End)).await;
            });
        }
        drop(merged_tx);

        let mut barriers = BarrierTracker::new(n);
        let mut watermarks: Vec<Option<Timestamp>> = vec![None; n];
        let mut ended = vec![false; n];
        let mut combined_wm: Option<Timestamp> = None;

        while let Some((index, msg)) = merged_rx.recv().await {
            match msg {
                StreamMessage::Data(v) => out.data(v).await?,
                StreamMessage::Watermark(ts) => {
                    watermarks[index] = Some(ts);
                    let live: Option<Vec<Timestamp>> = (0..n)
                        .filter(|i| !ended[*i])
                        .map(|i| watermarks[i])
                        .collect();
                    if let Some(wm) = live.and_then(|wms| wms.into_iter().min()) {
                        if combined_wm.map_or(true, |cur| wm > cur) {
                            combined_wm = Some(wm);
                            out.watermark(wm).await?;
                        }
                    }
                }
                StreamMessage::Barrier(id) => {
                    if let BarrierResult::Aligned(id) = barriers.process_barrier(id) {
                        out.barrier(id).await?;
                    }
                }
                StreamMessage::End => {
                    ended[index] = true;
                    if ended.iter().all(|e| *e) {
                        out.end().await?;
                        break;
                    }
                }
            }
        }

        debug!(%name, "union stopped");
        Ok(())
    })
}

/// Spawn a sink: consumes messages until End or until every sender is gone.
pub fn spawn_sink<S>(name: &'static str, mut sink: S, mut rx: Receiver<S::In>) -> JoinHandle<Result<()>>
where
    S: Sink,
{
    tokio::spawn(async move {
        debug!(%name, "sink started");
        let mut result = Ok(());
        while let Some(msg) = rx.recv().await {
            let is_end = matches!(msg, StreamMessage::End);
            if let Err(e) = sink.on_message(msg).await {
                error!(%name, error = %e, "sink handler error");
                result = Err(e);
                break;
            }
            if is_end {
                break;
            }
        }
        if let Err(e) = sink.close().await {
            error!(%name, error = %e, "sink close failed");
        }
        debug!(%name, "sink stopped");
        result
    })
}

/// Spawn a source that produces messages.
pub fn spawn_source<T, F, Fut>(name: &'static str, tx: Sender<T>, f: F) -> JoinHandle<Result<()>>
where
    T: Send + 'static,
    F: FnOnce(Emitter<T>) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = Result<()>> + Send,
{
    tokio::spawn(async move {
        debug!(%name, "source started");
        let emitter = Emitter::new(tx);
        let result = f(emitter).await;
        if let Err(e) = &result {
            error!(%name, error = %e, "source error");
        }
        debug!(%name, "source stopped");
        result
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Concat;

    #[async_trait]
    impl CoOperator for Concat {
        type In1 = i32;
        type In2 = String;
        type Out = String;

        async fn on_left(&mut self, item: i32, out: &mut Emitter<String>) -> Result<()> {
            out.data(format!("L{item}")).await
        }

        async fn on_right(&mut self, item: String, out: &mut Emitter<String>) -> Result<()> {
            out.data(format!("R{item}")).await
        }
    }

    async fn collect(mut rx: Receiver<String>) -> Vec<StreamMessage<String>> {
        let mut seen = Vec::new();
        while let Some(msg) = rx.recv().await {
            let is_end = matches!(msg, StreamMessage::End);
            seen.push(msg);
            if is_end {
                break;
            }
        }
        seen
    }

    #[tokio::test]
    async fn test_co_operator_aligns_barriers_and_end() {
        let (ltx, lrx) = stream_channel::<i32>(16);
        let (rtx, rrx) = stream_channel::<String>(16);
        let (otx, orx) = stream_channel::<String>(16);
        let handle = spawn_co_operator("concat", Concat, lrx, rrx, otx);

        ltx.send(StreamMessage::Data(1)).await.unwrap();
        ltx.send(StreamMessage::Barrier(1)).await.unwrap();
        ltx.send(StreamMessage::End).await.unwrap();
        rtx.send(StreamMessage::Data("a".into())).await.unwrap();
        rtx.send(StreamMessage::Barrier(1)).await.unwrap();
        rtx.send(StreamMessage::End).await.unwrap();

        let seen = collect(orx).await;
        handle.await.unwrap().unwrap();

        let barriers = seen
            .iter()
            .filter(|m| matches!(m, StreamMessage::Barrier(1)))
            .count();
        assert_eq!(barriers, 1);
        assert_eq!(seen.last(), Some(&StreamMessage::End));
        assert!(seen.contains(&StreamMessage::Data("L1".into())));
        assert!(seen.contains(&StreamMessage::Data("Ra".into())));
    }

    #[tokio::test]
    async fn test_co_operator_combines_watermarks_as_minimum() {
        let (ltx, lrx) = stream_channel::<i32>(16);
        let (rtx, rrx) = stream_channel::<String>(16);
        let (otx, orx) = stream_channel::<String>(16);
        let handle = spawn_co_operator("concat", Concat, lrx, rrx, otx);

        ltx.send(StreamMessage::Watermark(100)).await.unwrap();
        rtx.send(StreamMessage::Watermark(40)).await.unwrap();
        rtx.send(StreamMessage::Watermark(150)).await.unwrap();
        drop(ltx);
        drop(rtx);

        let seen = collect(orx).await;
        handle.await.unwrap().unwrap();

        let wms: Vec<_> = seen
            .iter()
            .filter_map(|m| match m {
                StreamMessage::Watermark(ts) => Some(*ts),
                _ => None,
            })
            .collect();
        assert_eq!(wms, vec![40, 100]);
    }

    #[tokio::test]
    async fn test_union_aligns_barriers_and_emits_one_end() {
        let (atx, arx) = stream_channel::<String>(16);
        let (btx, brx) = stream_channel::<String>(16);
        let (otx, orx) = stream_channel::<String>(16);
        let handle = spawn_union("union", vec![arx, brx], otx);

        atx.send(StreamMessage::Data("a".into())).await.unwrap();
        atx.send(StreamMessage::Watermark(10)).await.unwrap();
        atx.send(StreamMessage::Barrier(2)).await.unwrap();
        atx.send(StreamMessage::End).await.unwrap();
        btx.send(StreamMessage::Watermark(30)).await.unwrap();
        btx.send(StreamMessage::Barrier(2)).await.unwrap();
        btx.send(StreamMessage::Data("b".into())).await.unwrap();
        drop(btx);

        let seen = collect(orx).await;
        handle.await.unwrap().unwrap();

        assert_eq!(seen.iter().filter(|m| matches!(m, StreamMessage::Barrier(2))).count(), 1);
        assert_eq!(seen.iter().filter(|m| m.is_end()).count(), 1);
        assert_eq!(seen.last(), Some(&StreamMessage::End));
        assert!(seen.contains(&StreamMessage::Data("a".into())));
        assert!(seen.contains(&StreamMessage::Data("b".into())));
        // 10 while both inputs are live, 30 once the first has ended
        let first_wm = seen.iter().find_map(|m| match m {
            StreamMessage::Watermark(ts) => Some(*ts),
            _ => None,
        });
        assert!(matches!(first_wm, Some(10) | Some(30)));
    }
}
