//! Dispatch session: the state behind a group's callback surface
//!
//! One session lives for one run of a group coordinator. It owns the group's
//! rendezvous registry and result aggregator and answers the requests the
//! callback server receives from dispatched workloads.

use crate::distributed::protocol::*;
use crate::rendezvous::{BarrierOutcome, RendezvousRegistry};
use crate::stats::aggregator::NotifyOutcome;
use crate::stats::{ResultAggregator, TestResult};
use std::sync::Arc;
use tracing::debug;

/// Callback surface state of one running group
#[derive(Debug)]
pub struct DispatchSession {
    group: String,
    registry: Arc<RendezvousRegistry>,
    aggregator: ResultAggregator,
}

impl DispatchSession {
    pub fn new(group: impl Into<String>, group_size: usize) -> Self {
        let group = group.into();
        let registry = Arc::new(RendezvousRegistry::new(group_size));
        let aggregator = ResultAggregator::new(group.clone(), registry.clone());
        Self {
            group,
            registry,
            aggregator,
        }
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn registry(&self) -> &Arc<RendezvousRegistry> {
        &self.registry
    }

    pub fn aggregator(&self) -> &ResultAggregator {
        &self.aggregator
    }

    /// NotifyResult
    pub fn notify_result(&self, test_name: &str, result: TestResult) -> NotifyOutcome {
        self.aggregator.notify_result(test_name, result)
    }

    /// InitBarrier; `None` sizes the barrier for the whole group
    pub fn init_barrier(&self, test_name: &str, barrier: &str, required: Option<usize>) {
        match required {
            Some(required) => self.registry.init_barrier(test_name, barrier, required),
            None => self.registry.init_barrier_default(test_name, barrier),
        }
    }

    /// EnterBarrier
    pub async fn enter_barrier(&self, barrier: &str) -> BarrierOutcome {
        self.registry.enter_barrier(barrier).await
    }

    /// Answer one callback request
    pub async fn handle(&self, msg: Message) -> Message {
        debug!(group = %self.group, kind = msg.kind(), "Callback request");

        match msg {
            Message::NotifyResult(req) => {
                if let Some(err) = self.check_request(req.protocol_version, &req.group) {
                    return err;
                }
                self.notify_result(&req.test_name, req.result);
                Message::Ack
            }
            Message::InitBarrier(req) => {
                if let Some(err) = self.check_request(req.protocol_version, &req.group) {
                    return err;
                }
                self.init_barrier(&req.test_name, &req.barrier, req.required);
                Message::Ack
            }
            Message::EnterBarrier(req) => {
                if let Some(err) = self.check_request(req.protocol_version, &req.group) {
                    return err;
                }
                let outcome = self.enter_barrier(&req.barrier).await;
                Message::BarrierReply(BarrierReplyMessage {
                    barrier: req.barrier,
                    outcome,
                })
            }
            other => Message::error(format!(
                "Unexpected {} on callback surface of group {}",
                other.kind(),
                self.group
            )),
        }
    }

    fn check_request(&self, protocol_version: u32, group: &str) -> Option<Message> {
        if protocol_version != PROTOCOL_VERSION {
            return Some(Message::error(format!(
                "Protocol version mismatch: launcher={}, caller={}",
                PROTOCOL_VERSION, protocol_version
            )));
        }
        if group != self.group {
            return Some(Message::error(format!(
                "Request for group {} reached the surface of group {}",
                group, self.group
            )));
        }
        None
    }
}
