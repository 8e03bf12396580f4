//! Typed wrapper over the message bus
//!
//! Each logical queue (`jobs`, `results`) is one JetStream stream with a
//! single work subject and a durable pull consumer shared by the fleet.
//! Payloads are JSON; the wrapper owns size enforcement so callers can react
//! to oversized messages before the bus rejects them.

use anyhow::{Context as _, Result, anyhow};
use async_nats::jetstream::{self, Context, consumer::PullConsumer};
use futures::StreamExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::marker::PhantomData;
use std::ops::ControlFlow;
use thiserror::Error;
use tokio::time::{Duration, timeout};
use tracing::{debug, error, info, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// How long a fetch waits for messages before handing the (possibly empty)
/// batch to the handler. Bounds shutdown latency.
const FETCH_WAIT: Duration = Duration::from_secs(5);

/// Outcome taxonomy for `send`. Only `Oversize` is recoverable by shrinking
/// the payload; `Transient` is worth retrying, `Fatal` is not.
#[derive(Error, Debug)]
pub enum SendError {
    #[error("message of {size} bytes exceeds the bus limit of {limit} bytes")]
    Oversize { size: usize, limit: usize },

    #[error("transient send failure: {0}")]
    Transient(#[source] anyhow::Error),

    #[error("fatal send failure: {0}")]
    Fatal(#[source] anyhow::Error),
}

/// One received message plus its ack handle. Dropping a delivery without
/// acking leaves it to the bus to redeliver.
pub struct Delivery<T> {
    pub payload: T,
    message: jetstream::Message,
}

impl<T> Delivery<T> {
    pub async fn ack(self) -> Result<()> {
        self.message
            .ack()
            .await
            .map_err(|e| anyhow!("failed to ack message: {e}"))
    }

    /// Hands the message back for immediate redelivery.
    pub async fn requeue(self) -> Result<()> {
        self.message
            .ack_with(jetstream::AckKind::Nak(None))
            .await
            .map_err(|e| anyhow!("failed to nak message: {e}"))
    }
}

pub struct Queue<T> {
    jetstream: Context,
    stream_name: String,
    subject: String,
    durable_name: String,
    max_message_size: usize,
    _payload: PhantomData<fn() -> T>,
}

impl<T> Queue<T>
where
    T: Serialize + DeserializeOwned,
{
    /// Connects to the bus and ensures the stream for `name` exists.
    pub async fn connect(url: &str, name: &str, max_message_size: usize) -> Result<Self> {
        info!("Connecting to message bus at {}", url);
        let client = timeout(CONNECT_TIMEOUT, async_nats::connect(url))
            .await
            .map_err(|_| anyhow!("timed out connecting to message bus at {url}"))?
            .with_context(|| format!("failed to connect to message bus at {url}"))?;
        let jetstream = jetstream::new(client);

        let stream_name = name.to_string();
        let subject = format!("{name}.work");
        let stream_config = jetstream::stream::Config {
            name: stream_name.clone(),
            subjects: vec![subject.clone()],
            ..Default::default()
        };

        match jetstream.get_stream(&stream_name).await {
            Ok(_) => {
                debug!("Stream {} already exists", stream_name);
            }
            Err(_) => {
                jetstream
                    .create_stream(stream_config)
                    .await
                    .with_context(|| format!("failed to create stream {stream_name}"))?;
                info!("Created stream {}", stream_name);
            }
        }

        Ok(Self {
            jetstream,
            durable_name: format!("{stream_name}-consumer"),
            stream_name,
            subject,
            max_message_size,
            _payload: PhantomData,
        })
    }

    /// Publishes one message and waits for the bus ack.
    pub async fn send(&self, message: &T) -> Result<(), SendError> {
        let payload = serde_json::to_vec(message).map_err(|e| SendError::Fatal(e.into()))?;
        if payload.len() > self.max_message_size {
            return Err(SendError::Oversize {
                size: payload.len(),
                limit: self.max_message_size,
            });
        }

        let ack = self
            .jetstream
            .publish(self.subject.clone(), payload.into())
            .await
            .map_err(|e| SendError::Transient(e.into()))?;
        ack.await.map_err(|e| SendError::Transient(e.into()))?;
        Ok(())
    }

    /// Current depth of the stream.
    pub async fn messages_count(&self) -> Result<u64> {
        let mut stream = self
            .jetstream
            .get_stream(&self.stream_name)
            .await
            .map_err(|e| anyhow!("failed to look up stream {}: {e}", self.stream_name))?;
        let info = stream
            .info()
            .await
            .map_err(|e| anyhow!("failed to read stream info for {}: {e}", self.stream_name))?;
        Ok(info.state.messages)
    }

    /// Receives batches of up to `batch` messages and hands them to
    /// `handler`, which acks (or requeues) each delivery itself. The handler
    /// is also invoked with an empty batch when the queue idles, so callers
    /// can stop listening by returning `ControlFlow::Break`.
    pub async fn listen<F, Fut>(&self, batch: usize, mut handler: F) -> Result<()>
    where
        F: FnMut(Vec<Delivery<T>>) -> Fut,
        Fut: Future<Output = ControlFlow<()>>,
    {
        let stream = self
            .jetstream
            .get_stream(&self.stream_name)
            .await
            .map_err(|e| anyhow!("failed to look up stream {}: {e}", self.stream_name))?;
        let consumer: PullConsumer = stream
            .get_or_create_consumer(
                &self.durable_name,
                jetstream::consumer::pull::Config {
                    durable_name: Some(self.durable_name.clone()),
                    ack_policy: jetstream::consumer::AckPolicy::Explicit,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| {
                anyhow!(
                    "failed to create consumer {} on stream {}: {e}",
                    self.durable_name,
                    self.stream_name
                )
            })?;

        info!(
            "Listening on {} (durable {}, batch {})",
            self.subject, self.durable_name, batch
        );

        loop {
            let mut fetched = consumer
                .fetch()
                .max_messages(batch)
                .expires(FETCH_WAIT)
                .messages()
                .await
                .map_err(|e| anyhow!("fetch on {} failed: {e}", self.subject))?;

            let mut deliveries = Vec::new();
            while let Some(message) = fetched.next().await {
                let message = match message {
                    Ok(message) => message,
                    Err(e) => {
                        error!("Error receiving message on {}: {e}", self.subject);
                        continue;
                    }
                };
                match serde_json::from_slice::<T>(&message.payload) {
                    Ok(payload) => deliveries.push(Delivery { payload, message }),
                    Err(e) => {
                        // A payload that never decodes would redeliver
                        // forever; drop it and keep the queue moving.
                        warn!("Dropping undecodable message on {}: {e}", self.subject);
                        if let Err(e) = message.ack().await {
                            error!("Failed to ack undecodable message: {e}");
                        }
                    }
                }
            }

            if let ControlFlow::Break(()) = handler(deliveries).await {
                info!("Stopped listening on {}", self.subject);
                return Ok(());
            }
        }
    }
}
