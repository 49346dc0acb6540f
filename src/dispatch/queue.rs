//! AMQP queue consumer for gateway events.
//!
//! One durable queue per WeChat identity. Deliveries are single JSON sync
//! payloads; successful handling acks, anything else nacks without requeue
//! (the gateway re-emits on its own schedule). Connection loss reconnects
//! with exponential backoff.

use std::sync::Arc;
use std::time::Duration;

use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{Connection, ConnectionProperties};
use tokio_stream::StreamExt;
use tracing::{debug, error, info, warn};

use crate::wechat::SyncPayload;

use super::Dispatcher;

/// Per-channel prefetch.
const PREFETCH: u16 = 5;

/// Reconnect backoff bounds.
const RECONNECT_BASE_SECS: u64 = 1;
const RECONNECT_MAX_SECS: u64 = 30;

/// Consume `queue_name` until `shutdown` flips, dispatching every payload.
pub async fn consume(
    url: &str,
    queue_name: &str,
    dispatcher: Arc<Dispatcher>,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    let mut backoff = RECONNECT_BASE_SECS;
    loop {
        if *shutdown.borrow() {
            return;
        }

        match consume_once(url, queue_name, &dispatcher, &mut shutdown).await {
            Ok(()) => {
                info!("queue consumer stopped");
                return;
            }
            Err(e) => {
                warn!(error = %e, backoff_secs = backoff, "broker connection lost, reconnecting");
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(backoff)) => {}
                    _ = shutdown.changed() => return,
                }
                backoff = (backoff.saturating_mul(2)).min(RECONNECT_MAX_SECS);
            }
        }
    }
}

async fn consume_once(
    url: &str,
    queue_name: &str,
    dispatcher: &Arc<Dispatcher>,
    shutdown: &mut tokio::sync::watch::Receiver<bool>,
) -> Result<(), lapin::Error> {
    let connection = Connection::connect(url, ConnectionProperties::default()).await?;
    let channel = connection.create_channel().await?;
    channel
        .basic_qos(PREFETCH, BasicQosOptions::default())
        .await?;

    channel
        .queue_declare(
            queue_name,
            QueueDeclareOptions {
                durable: true,
                exclusive: false,
                auto_delete: false,
                ..QueueDeclareOptions::default()
            },
            FieldTable::default(),
        )
        .await?;

    let mut consumer = channel
        .basic_consume(
            queue_name,
            "wegram",
            BasicConsumeOptions::default(),
            FieldTable::default(),
        )
        .await?;

    info!(queue = queue_name, "consuming broker queue");

    loop {
        tokio::select! {
            delivery = consumer.next() => {
                let Some(delivery) = delivery else {
                    // Stream ended: surface as an error so the caller reconnects.
                    return Err(lapin::Error::InvalidChannelState(
                        lapin::ChannelState::Closed,
                    ));
                };
                let delivery = delivery?;
                match serde_json::from_slice::<SyncPayload>(&delivery.data) {
                    Ok(payload) => {
                        dispatcher.handle_payload(payload).await;
                        if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
                            error!(error = %e, "failed to ack delivery");
                        }
                    }
                    Err(e) => {
                        debug!(error = %e, "delivery is not a sync payload, discarding");
                        if let Err(e) = delivery
                            .nack(BasicNackOptions {
                                requeue: false,
                                ..BasicNackOptions::default()
                            })
                            .await
                        {
                            error!(error = %e, "failed to nack delivery");
                        }
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    let _ = connection.close(0, "shutdown").await;
                    return Ok(());
                }
            }
        }
    }
}
