//! Single consumer for refresh requests
//!
//! Every trigger goes through one queue, so at most one cycle runs at a
//! time. Requests that pile up while a cycle is in flight are answered with
//! that cycle's result instead of starting another fetch.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::{CycleOutcome, RefreshCoordinator, Trigger};

const QUEUE_CAPACITY: usize = 32;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("Refresh service is not running")]
    Closed,
    #[error("Refresh service dropped the request")]
    NoResponse,
}

/// Reply to an explicit refresh request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RefreshAck {
    /// False only when the result could not be stored
    pub success: bool,
    /// Served by a cycle another request had already started
    pub coalesced: bool,
}

struct RefreshRequest {
    trigger: Trigger,
    reply: Option<oneshot::Sender<RefreshAck>>,
}

#[derive(Clone)]
pub struct RefreshHandle {
    tx: mpsc::Sender<RefreshRequest>,
}

impl RefreshHandle {
    /// Queue a trigger without waiting for it
    pub async fn trigger(&self, trigger: Trigger) -> Result<(), DeliveryError> {
        self.tx
            .send(RefreshRequest {
                trigger,
                reply: None,
            })
            .await
            .map_err(|_| DeliveryError::Closed)
    }

    /// Ask for a refresh and wait until it has been stored
    pub async fn request_refresh(&self) -> Result<RefreshAck, DeliveryError> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(RefreshRequest {
                trigger: Trigger::Message,
                reply: Some(reply),
            })
            .await
            .map_err(|_| DeliveryError::Closed)?;
        response.await.map_err(|_| DeliveryError::NoResponse)
    }
}

/// Start the consumer task. It stops once every handle is dropped.
pub fn spawn_service(coordinator: Arc<RefreshCoordinator>) -> (RefreshHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
    let task = tokio::spawn(run_service(coordinator, rx));
    (RefreshHandle { tx }, task)
}

async fn run_service(coordinator: Arc<RefreshCoordinator>, mut rx: mpsc::Receiver<RefreshRequest>) {
    while let Some(request) = rx.recv().await {
        let result = coordinator.handle_trigger(request.trigger).await;
        let ran_cycle = matches!(result, Ok(Some(_)));
        let success = match &result {
            Ok(Some(report)) => {
                if report.outcome == CycleOutcome::Superseded {
                    tracing::debug!("Cycle {} was superseded", report.cycle);
                }
                true
            }
            Ok(None) => true,
            Err(err) => {
                tracing::error!("Refresh after {:?} failed: {}", request.trigger, err);
                false
            }
        };
        reply(request.reply, RefreshAck {
            success,
            coalesced: false,
        });

        if !ran_cycle {
            continue;
        }

        let mut coalesced = 0usize;
        while let Ok(queued) = rx.try_recv() {
            coalesced += 1;
            reply(queued.reply, RefreshAck {
                success,
                coalesced: true,
            });
        }
        if coalesced > 0 {
            tracing::debug!("Coalesced {} queued refresh requests", coalesced);
        }
    }
    tracing::debug!("Refresh service stopped");
}

fn reply(sender: Option<oneshot::Sender<RefreshAck>>, ack: RefreshAck) {
    if let Some(sender) = sender {
        // The requester may have given up waiting
        let _ = sender.send(ack);
    }
}

/// Send a timer trigger every `period`, first one after a full period
pub fn spawn_timer(handle: RefreshHandle, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if handle.trigger(Trigger::Timer).await.is_err() {
                tracing::debug!("Refresh timer stopping, service is gone");
                break;
            }
        }
    })
}
