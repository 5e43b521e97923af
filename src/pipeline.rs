//! 管道：把累积器接到分发器上，处理暂停/恢复与结束传递，并汇总两级通知。
//!
//! # Pipeline
//!
//! Wires an [`Accumulator`] to a [`Dispatcher`]:
//!
//! | Notification | Reaction |
//! |--------------|----------|
//! | accumulator `Data(batch)` | `dispatcher.send(batch)`; `false` pauses the accumulator, `true` lifts that pause |
//! | dispatcher `Drain` | an accumulator the pipeline paused is stepped once; if that yields no batch it is resumed |
//! | accumulator `End` | `dispatcher.end()` |
//! | dispatcher `Close` | published, then the pipeline stops |
//!
//! Every notification of both stages is republished as a [`PipelineEvent`].
//! Only pauses the pipeline itself applied are lifted; a pause requested
//! through [`Pipeline::accumulator`] holds until the caller resumes.

use crate::accumulator::{Accumulator, AccumulatorEvent, AccumulatorNotice};
use crate::batch::{Completion, Weighted};
use crate::config::PipelineConfig;
use crate::dispatcher::{Dispatcher, DispatcherEvent, DispatcherStats};
use crate::transport::BulkTransport;
use crate::Result;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Notification republished by a [`Pipeline`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    Accumulator(AccumulatorNotice),
    Dispatcher(DispatcherEvent),
}

/// An accumulator feeding a dispatcher.
pub struct Pipeline<T> {
    accumulator: Accumulator<T>,
    dispatcher: Dispatcher<T>,
    task: JoinHandle<()>,
}

impl<T: Weighted + Send + Sync + 'static> Pipeline<T> {
    /// Connect the two stages and start routing their notifications.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn new(
        accumulator: Accumulator<T>,
        accumulator_events: mpsc::UnboundedReceiver<AccumulatorEvent<T>>,
        dispatcher: Dispatcher<T>,
        dispatcher_events: mpsc::UnboundedReceiver<DispatcherEvent>,
    ) -> (Self, mpsc::UnboundedReceiver<PipelineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(route(
            accumulator.clone(),
            accumulator_events,
            dispatcher.clone(),
            dispatcher_events,
            tx,
        ));
        (
            Self {
                accumulator,
                dispatcher,
                task,
            },
            rx,
        )
    }

    /// Build both stages from `config` around `transport`.
    pub fn from_config<B>(
        transport: B,
        config: &PipelineConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<PipelineEvent>)>
    where
        B: BulkTransport<T> + 'static,
    {
        config.validate()?;
        let (accumulator, acc_rx) = Accumulator::new(config.accumulator.clone());
        let (dispatcher, disp_rx) = Dispatcher::new(transport, config.dispatcher.clone());
        Ok(Self::new(accumulator, acc_rx, dispatcher, disp_rx))
    }

    pub fn write(&self, item: T) -> bool {
        self.accumulator.write(item)
    }

    pub fn write_with(&self, item: T, completion: Completion) -> bool {
        self.accumulator.write_with(item, completion)
    }

    /// End the input; the pipeline closes after the last batch resolves.
    pub fn end(&self) {
        self.accumulator.end();
    }

    /// Discard buffered items and stop accepting writes.
    ///
    /// Buffered items settle as cancelled. Calls already in flight still
    /// resolve, after which the pipeline closes.
    pub fn destroy(&self) {
        self.accumulator.destroy();
        self.dispatcher.end();
    }

    /// Resolves once the dispatcher has closed.
    pub async fn closed(&self) {
        self.dispatcher.closed().await;
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    pub fn stats(&self) -> DispatcherStats {
        self.dispatcher.stats()
    }

    pub fn accumulator(&self) -> &Accumulator<T> {
        &self.accumulator
    }

    pub fn dispatcher(&self) -> &Dispatcher<T> {
        &self.dispatcher
    }
}

async fn route<T: Weighted + Send + Sync + 'static>(
    accumulator: Accumulator<T>,
    mut acc_rx: mpsc::UnboundedReceiver<AccumulatorEvent<T>>,
    dispatcher: Dispatcher<T>,
    mut disp_rx: mpsc::UnboundedReceiver<DispatcherEvent>,
    out: mpsc::UnboundedSender<PipelineEvent>,
) {
    let publish = |event: PipelineEvent| {
        let _ = out.send(event);
    };
    // set while the accumulator is paused because the dispatcher saturated
    let mut held = false;

    loop {
        tokio::select! {
            Some(event) = acc_rx.recv() => {
                publish(PipelineEvent::Accumulator(event.notice()));
                match event {
                    AccumulatorEvent::Data(batch) => {
                        if !dispatcher.send(batch) {
                            if !accumulator.is_paused() {
                                accumulator.pause();
                                held = accumulator.is_paused();
                            }
                        } else if held {
                            held = false;
                            if accumulator.is_paused() {
                                accumulator.resume();
                            }
                        }
                    }
                    AccumulatorEvent::End => dispatcher.end(),
                    _ => {}
                }
            }
            Some(event) = disp_rx.recv() => {
                publish(PipelineEvent::Dispatcher(event.clone()));
                match event {
                    DispatcherEvent::Drain if held => {
                        if !accumulator.is_paused() {
                            held = false;
                        } else if !accumulator.step() {
                            held = false;
                            accumulator.resume();
                        }
                    }
                    DispatcherEvent::Drain => {}
                    DispatcherEvent::Close => break,
                    DispatcherEvent::Error(_) => {}
                }
            }
            else => break,
        }
    }
    debug!("pipeline stopped");
}
