//! Serial consumption loop.

use crate::config::AckMode;
use crate::error::BrokerError;
use crate::pipeline::{JobOutcome, JobPipeline};
use async_trait::async_trait;
use kiln_training::JobRequest;
use std::future::Future;
use tracing::{debug, info, warn};

/// A raw delivery from the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub delivery_tag: u64,
    pub payload: Vec<u8>,
}

/// Ordered stream of deliveries, at most one outstanding at a time.
#[async_trait]
pub trait MessageSource: Send {
    /// Next delivery, or `None` once the broker closes the stream.
    async fn next_message(&mut self) -> Option<Result<InboundMessage, BrokerError>>;

    /// Acknowledge a delivery. Only called in [`AckMode::AfterReply`].
    async fn ack(&mut self, message: &InboundMessage) -> Result<(), BrokerError>;
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerStats {
    pub received: u64,
    pub completed: u64,
    pub failed: u64,
    pub malformed: u64,
}

/// Pulls one message, runs it to a terminal reply, then pulls the next.
pub struct QueueConsumer<S> {
    source: S,
    pipeline: JobPipeline,
    ack_mode: AckMode,
}

impl<S: MessageSource> QueueConsumer<S> {
    pub fn new(source: S, pipeline: JobPipeline, ack_mode: AckMode) -> Self {
        Self { source, pipeline, ack_mode }
    }

    /// Consume until the source is exhausted.
    ///
    /// Job failures end in a reply and never stop the loop; only broker
    /// errors are returned.
    pub async fn run(&mut self) -> Result<ConsumerStats, BrokerError> {
        self.run_until(std::future::pending()).await
    }

    /// Like [`run`](Self::run), but also stops once `shutdown` resolves.
    ///
    /// `shutdown` is only observed while waiting for a delivery. A job that
    /// is already running goes through its reply, ack and cleanup first.
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<ConsumerStats, BrokerError>
    where
        F: Future<Output = ()>,
    {
        let mut stats = ConsumerStats::default();
        info!(ack_mode = ?self.ack_mode, "waiting for messages");
        tokio::pin!(shutdown);

        loop {
            let delivery = tokio::select! {
                biased;
                () = &mut shutdown => {
                    info!("shutdown requested, no further messages will be taken");
                    break;
                }
                delivery = self.source.next_message() => delivery,
            };
            let Some(delivery) = delivery else {
                info!("message stream closed");
                break;
            };
            let message = delivery?;
            stats.received += 1;
            debug!(delivery_tag = message.delivery_tag, bytes = message.payload.len(), "message received");

            self.handle(&message, &mut stats).await;

            if self.ack_mode == AckMode::AfterReply {
                self.source.ack(&message).await?;
                debug!(delivery_tag = message.delivery_tag, "message acknowledged");
            }
        }

        info!(
            received = stats.received,
            completed = stats.completed,
            failed = stats.failed,
            malformed = stats.malformed,
            "consumer stopped"
        );
        Ok(stats)
    }

    /// Give back the source, e.g. to close the broker connection.
    pub fn into_source(self) -> S {
        self.source
    }

    async fn handle(&self, message: &InboundMessage, stats: &mut ConsumerStats) {
        let job = match JobRequest::decode(&message.payload) {
            Ok(job) => job,
            Err(e) => {
                // No trustworthy train_id, so there is nowhere to reply.
                warn!(delivery_tag = message.delivery_tag, error = %e, "discarding malformed job message");
                stats.malformed += 1;
                return;
            }
        };

        match self.pipeline.run(&job).await {
            JobOutcome::Completed => stats.completed += 1,
            JobOutcome::Failed(_) => stats.failed += 1,
        }
    }
}
