use std::sync::Arc;

use anyhow::{Error, Result, anyhow};
use futures_util::StreamExt;
use tracing::{error, info, warn};

use crate::{clients::rbmq::QueueConsumer, utils::shutdown_signal, worker::ChannelWorker};

/// Consumes the worker's channel queue until shutdown or until the broker
/// closes the consumer.
///
/// A delivery is acked only after [`ChannelWorker::handle`] has finished its
/// republish and ledger writes. An error from the worker means nothing was
/// republished, so the delivery is requeued and the next attempt reruns the
/// state machine.
pub async fn run(worker: Arc<ChannelWorker>, queue: QueueConsumer, consumer_tag: &str) -> Result<(), Error> {
    let mut consumer = queue.create_consumer(consumer_tag).await?;

    info!(channel = %worker.channel(), consumer_tag, "Channel worker started");

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        let delivery = tokio::select! {
            _ = &mut shutdown => {
                info!(channel = %worker.channel(), "Channel worker stopping");
                return Ok(());
            }
            next = consumer.next() => next,
        };

        let delivery = match delivery {
            Some(Ok(delivery)) => delivery,
            Some(Err(e)) => {
                error!(error = %e, "Failed to receive delivery");
                return Err(anyhow!("Consumer stream failed: {}", e));
            }
            None => {
                warn!(channel = %worker.channel(), "Consumer stream closed by broker");
                return Err(anyhow!("Consumer stream closed"));
            }
        };

        match worker.handle_payload(&delivery.data).await {
            Ok(outcome) => {
                info!(outcome = ?outcome, "Delivery handled");
                queue.acknowledge(delivery.delivery_tag).await?;
            }
            Err(e) => {
                error!(error = %e, "Delivery handling failed, requeueing");
                queue.reject(delivery.delivery_tag, true).await?;
            }
        }
    }
}
