//! Stateless operators: Map, FlatMap, Filter.
//!
//! Control messages (watermarks, barriers, End) pass through unchanged, so a
//! chain of these stages never delays a checkpoint.

use anyhow::Result;
use async_trait::async_trait;
use std::marker::PhantomData;
use tandem_core::StreamMessage;
use tandem_runtime::{Emitter, Operator};

/// Transforms each data element.
///
/// ```ignore
/// let decode = MapOperator::new(|raw: RawRecord| decoder.decode_risk_event(&raw.value));
/// ```
pub struct MapOperator<F, In, Out> {
    f: F,
    _phantom: PhantomData<fn(In) -> Out>,
}

impl<F, In, Out> MapOperator<F, In, Out>
where
    F: FnMut(In) -> Out + Send + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f, _phantom: PhantomData }
    }
}

#[async_trait]
impl<F, In, Out> Operator for MapOperator<F, In, Out>
where
    F: FnMut(In) -> Out + Send + 'static,
    In: Send + 'static,
    Out: Send + 'static,
{
    type In = In;
    type Out = Out;

    async fn on_message(&mut self, msg: StreamMessage<In>, out: &mut Emitter<Out>) -> Result<()> {
        match msg.into_control() {
            Err(v) => out.data((self.f)(v)).await,
            Ok(control) => out.emit(control).await,
        }
    }
}

/// Transforms each element into zero or more elements.
///
/// Returning an `Option` is the usual way to drop a record that failed a
/// stage.
pub struct FlatMapOperator<F, In, Out, I> {
    f: F,
    _phantom: PhantomData<fn(In) -> (Out, I)>,
}

impl<F, In, Out, I> FlatMapOperator<F, In, Out, I>
where
    F: FnMut(In) -> I + Send + 'static,
    I: IntoIterator<Item = Out>,
{
    pub fn new(f: F) -> Self {
        Self { f, _phantom: PhantomData }
    }
}

#[async_trait]
impl<F, In, Out, I> Operator for FlatMapOperator<F, In, Out, I>
where
    F: FnMut(In) -> I + Send + 'static,
    I: IntoIterator<Item = Out> + 'static,
    In: Send + 'static,
    Out: Send + 'static,
{
    type In = In;
    type Out = Out;

    async fn on_message(&mut self, msg: StreamMessage<In>, out: &mut Emitter<Out>) -> Result<()> {
        match msg.into_control() {
            Err(v) => {
                // don't keep the iterator alive across `.await`
                let items: Vec<Out> = (self.f)(v).into_iter().collect();
                for item in items {
                    out.data(item).await?;
                }
                Ok(())
            }
            Ok(control) => out.emit(control).await,
        }
    }
}

/// Keeps only elements that satisfy a predicate.
pub struct FilterOperator<F, T> {
    predicate: F,
    _phantom: PhantomData<fn(T)>,
}

impl<F, T> FilterOperator<F, T>
where
    F: FnMut(&T) -> bool + Send + 'static,
{
    pub fn new(predicate: F) -> Self {
        Self { predicate, _phantom: PhantomData }
    }
}

#[async_trait]
impl<F, T> Operator for FilterOperator<F, T>
where
    F: FnMut(&T) -> bool + Send + 'static,
    T: Send + 'static,
{
    type In = T;
    type Out = T;

    async fn on_message(&mut self, msg: StreamMessage<T>, out: &mut Emitter<T>) -> Result<()> {
        match msg.into_control() {
            Err(v) if (self.predicate)(&v) => out.data(v).await,
            Err(_) => Ok(()),
            Ok(control) => out.emit(control).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_runtime::{spawn_operator, stream_channel, Receiver};

    async fn drain<T>(mut rx: Receiver<T>) -> Vec<StreamMessage<T>> {
        let mut seen = Vec::new();
        while let Some(msg) = rx.recv().await {
            let end = msg.is_end();
            seen.push(msg);
            if end {
                break;
            }
        }
        seen
    }

    #[tokio::test]
    async fn test_flatmap_drops_none_and_keeps_barriers() {
        let (tx, rx) = stream_channel::<&'static str>(8);
        let (otx, orx) = stream_channel::<i64>(8);
        let op = FlatMapOperator::new(|s: &'static str| s.parse::<i64>().ok());
        let handle = spawn_operator("parse", op, rx, otx);

        tx.send(StreamMessage::Data("12")).await.unwrap();
        tx.send(StreamMessage::Data("not-a-number")).await.unwrap();
        tx.send(StreamMessage::Barrier(4)).await.unwrap();
        tx.send(StreamMessage::Data("-3")).await.unwrap();
        tx.send(StreamMessage::End).await.unwrap();

        let seen = drain(orx).await;
        handle.await.unwrap().unwrap();
        assert_eq!(
            seen,
            vec![
                StreamMessage::Data(12),
                StreamMessage::Barrier(4),
                StreamMessage::Data(-3),
                StreamMessage::End,
            ]
        );
    }

    #[tokio::test]
    async fn test_filter_and_map() {
        let (tx, rx) = stream_channel::<Option<String>>(8);
        let (mid_tx, mid_rx) = stream_channel::<Option<String>>(8);
        let (otx, orx) = stream_channel::<String>(8);
        spawn_operator("present", FilterOperator::new(|v: &Option<String>| v.is_some()), rx, mid_tx);
        spawn_operator(
            "unwrap",
            MapOperator::new(|v: Option<String>| v.unwrap_or_default()),
            mid_rx,
            otx,
        );

        tx.send(StreamMessage::Data(None)).await.unwrap();
        tx.send(StreamMessage::Data(Some("sam".into()))).await.unwrap();
        tx.send(StreamMessage::Watermark(9)).await.unwrap();
        tx.send(StreamMessage::End).await.unwrap();

        let seen = drain(orx).await;
        assert_eq!(
            seen,
            vec![
                StreamMessage::Data("sam".to_string()),
                StreamMessage::Watermark(9),
                StreamMessage::End,
            ]
        );
    }
}
