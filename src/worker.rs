//! Worker pool: dequeue, decode, execute, respond.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::output::parse_output;
use crate::protocol::{BundleListResponse, ExecutionRequest, ExecutionResponse};
use crate::relay::RelayShared;

/// One message pulled off the bus, routed by topic class. Consumed once by
/// exactly one worker.
pub(crate) struct Incoming {
    pub relay: Arc<RelayShared>,
    pub topic: String,
    pub payload: Vec<u8>,
    pub is_execution: bool,
}

/// Fixed set of workers draining the shared work queue. Workers exit when the
/// queue closes; `stop` awaits them all.
#[derive(Default)]
pub(crate) struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn start(&mut self, count: usize, shared: &Arc<RelayShared>) {
        for _ in 0..count {
            let shared = Arc::clone(shared);
            self.handles.push(tokio::spawn(run_worker(shared)));
        }
        tracing::info!("Started {count} workers.");
    }

    pub async fn stop(&mut self) {
        for handle in self.handles.drain(..) {
            let _ = handle.await;
        }
    }
}

async fn run_worker(shared: Arc<RelayShared>) {
    shared.active_workers.fetch_add(1, Ordering::SeqCst);
    while let Some(incoming) = shared.queue.dequeue().await {
        if incoming.is_execution {
            handle_execution(incoming).await;
        } else {
            handle_directive(incoming);
        }
    }
    shared.active_workers.fetch_sub(1, Ordering::SeqCst);
}

async fn handle_execution(incoming: Incoming) {
    let request: ExecutionRequest = match serde_json::from_slice(&incoming.payload) {
        Ok(request) => request,
        Err(err) => {
            tracing::error!(topic = %incoming.topic, error = %err, "ignoring malformed execution request");
            return;
        }
    };
    if !request.validate() {
        tracing::error!(
            topic = %incoming.topic,
            "ignoring execution request without bundle_name or reply_to"
        );
        return;
    }

    let mut response = ExecutionResponse::ok();
    match incoming.relay.catalog.get(&request.bundle_name) {
        None => {
            response = ExecutionResponse::error(format!(
                "Unknown command bundle {}",
                request.bundle_name
            ));
        }
        Some(bundle) => match incoming.relay.engines.create(bundle.kind) {
            Err(err) => response = ExecutionResponse::error(err.to_string()),
            Ok(engine) => {
                let result = engine.execute(&request, &bundle).await;
                parse_output(result, &mut response, &request);
            }
        },
    }

    match serde_json::to_vec(&response) {
        Ok(payload) => incoming.relay.publish(&request.reply_to, payload),
        Err(err) => {
            tracing::error!(pipeline = %request.pipeline_id, error = %err, "failed to serialize execution response");
        }
    }
}

fn handle_directive(incoming: Incoming) {
    match serde_json::from_slice::<BundleListResponse>(&incoming.payload) {
        Ok(list) => {
            let count = list.bundles.len();
            incoming.relay.catalog.replace(list.into_map());
            tracing::debug!(bundles = count, "applied bundle assignment");
            incoming.relay.finish_refresh();
        }
        Err(err) => {
            tracing::error!(topic = %incoming.topic, error = %err, "ignoring malformed directive");
        }
    }
}
