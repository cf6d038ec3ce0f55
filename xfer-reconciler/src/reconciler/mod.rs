//! Reconciliation driver for transfer servers.
//!
//! Every public entry point performs one unit of work (one mutating call or
//! one stabilization check) and returns a [`StepResult`]. The caller persists
//! the returned context and re-invokes after the requested delay.

mod create;
mod delete;
mod update;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::classify::{handle_remote_error, RetryPolicy};
use crate::clients::{Operation, ServerApi};
use crate::config::ReconcilerConfig;
use crate::context::{Phase, ReconciliationContext};
use crate::error::ErrorKind;
use crate::model::ServerSpec;
use crate::stabilize::{stabilize, Decision, ServerAction, StabilizeError, WaitReason};
use crate::step::StepResult;
use crate::tags::TagSources;

/// Input handed to the driver by the invoking framework.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceRequest {
    pub desired: ServerSpec,
    /// Only present for updates.
    pub previous: Option<ServerSpec>,
    pub tags: TagSources,
    pub previous_tags: TagSources,
}

/// Drives a transfer server through create, update and delete.
pub struct ServerReconciler {
    api: Arc<dyn ServerApi>,
    config: ReconcilerConfig,
}

impl ServerReconciler {
    pub fn new(api: Arc<dyn ServerApi>, config: ReconcilerConfig) -> Self {
        Self { api, config }
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Context for a first invocation.
    pub fn fresh_context(&self) -> ReconciliationContext {
        ReconciliationContext::new(self.config.retry_budget)
    }

    fn resume(&self, context: Option<ReconciliationContext>) -> ReconciliationContext {
        context.unwrap_or_else(|| self.fresh_context())
    }

    fn policy(&self) -> RetryPolicy {
        self.config.retry_policy()
    }

    /// Describe a server and map it into the spec shape.
    pub async fn read(&self, server_id: &str) -> StepResult<ServerSpec> {
        self.read_back(server_id, self.fresh_context()).await
    }

    async fn read_back(
        &self,
        server_id: &str,
        context: ReconciliationContext,
    ) -> StepResult<ServerSpec> {
        match self.api.describe(server_id).await {
            Ok(descriptor) => {
                info!("Read back server {} ({})", server_id, descriptor.state);
                StepResult::Complete(descriptor.to_spec())
            }
            Err(e) => {
                handle_remote_error(Operation::DescribeServer, server_id, e, context, &self.policy())
            }
        }
    }

    /// Terminal read-back of a create or update.
    async fn finish(
        &self,
        flow: &str,
        server_id: &str,
        context: ReconciliationContext,
    ) -> StepResult<ServerSpec> {
        let elapsed = context.elapsed();
        self.read_back(server_id, context).await.map(|spec| {
            info!(
                "{} of server {} finished in {}s",
                flow,
                server_id,
                elapsed.num_seconds()
            );
            spec
        })
    }

    /// One stabilization check. Completes with the context once the server is
    /// ONLINE and matches `desired`.
    async fn stabilize_step(
        &self,
        server_id: &str,
        desired: &ServerSpec,
        mut context: ReconciliationContext,
    ) -> StepResult<ReconciliationContext> {
        let observed = match self.api.describe(server_id).await {
            Ok(d) => d,
            Err(e) => {
                return handle_remote_error(
                    Operation::DescribeServer,
                    server_id,
                    e,
                    context,
                    &self.policy(),
                )
            }
        };

        let decision = match stabilize(self.api.as_ref(), desired, &observed).await {
            Ok(decision) => decision,
            Err(StabilizeError::Failed(state)) => {
                error!("Server {} entered {}, giving up", server_id, state);
                return StepResult::failed(
                    ErrorKind::StabilizationFailed(state),
                    format!("{} failed for {}: server reported {}", Operation::DescribeServer, server_id, state),
                );
            }
            Err(StabilizeError::Remote { operation, source }) => {
                return handle_remote_error(operation, server_id, source, context, &self.policy())
            }
        };

        match decision {
            Decision::Done => {
                info!("Server {} is {} and matches the desired spec", server_id, observed.state);
                context.arn = Some(observed.arn.clone());
                context.vpc_endpoint_id = observed.attachment.vpc_endpoint_id.clone();
                StepResult::Complete(context)
            }
            Decision::Wait(WaitReason::Transitioning(state)) => {
                info!("Server {} is {}, waiting", server_id, state);
                let pause = self.config.transition_sleep();
                if !pause.is_zero() {
                    tokio::time::sleep(pause).await;
                }
                StepResult::in_progress(Duration::ZERO, context)
            }
            Decision::Wait(reason) => {
                info!("Server {} not ready: {:?}", server_id, reason);
                StepResult::in_progress(self.config.poll_delay(), context)
            }
            Decision::Act(action) => self.apply_server_action(server_id, action, context).await,
        }
    }

    async fn apply_server_action(
        &self,
        server_id: &str,
        action: ServerAction,
        mut context: ReconciliationContext,
    ) -> StepResult<ReconciliationContext> {
        let (operation, result) = match &action {
            ServerAction::Start => {
                info!("Starting server {}", server_id);
                (Operation::StartServer, self.api.start(server_id).await)
            }
            ServerAction::Stop => {
                let max = self.config.max_stop_start_cycles;
                if context.stop_start_cycles >= max {
                    error!(
                        "Server {} still drifting after {} stop/start cycles",
                        server_id, max
                    );
                    return StepResult::failed(
                        ErrorKind::GeneralServiceFailure,
                        format!(
                            "{} failed for {}: attachment still differs after {} stop/start cycles",
                            Operation::StopServer,
                            server_id,
                            max
                        ),
                    );
                }
                info!("Stopping server {} to reconfigure its attachment", server_id);
                (Operation::StopServer, self.api.stop(server_id).await)
            }
            ServerAction::UpdateAttachment(network) => {
                let Some(patch) = network.attachment_patch() else {
                    return StepResult::failed(
                        ErrorKind::GeneralServiceFailure,
                        format!("{:?} is not a server attachment change", network),
                    );
                };
                info!("Updating attachment of server {}: {:?}", server_id, network);
                (
                    Operation::UpdateAttachment,
                    self.api.update_attachment(server_id, &patch).await,
                )
            }
        };

        match result {
            Ok(()) => {
                if action == ServerAction::Stop {
                    context.stop_start_cycles += 1;
                }
                StepResult::in_progress(self.config.poll_delay(), context)
            }
            Err(e) => handle_remote_error(operation, server_id, e, context, &self.policy()),
        }
    }
}

fn identity(context: &ReconciliationContext) -> &str {
    context.server_id.as_deref().unwrap_or("(unassigned server)")
}

fn unexpected_phase<T>(flow: &str, context: &ReconciliationContext) -> StepResult<T> {
    error!("{} invoked in phase {:?}", flow, context.phase);
    StepResult::failed(
        ErrorKind::GeneralServiceFailure,
        format!(
            "{} cannot resume {} from phase {:?}",
            flow,
            identity(context),
            context.phase
        ),
    )
}

fn advanced(mut context: ReconciliationContext, phase: Phase) -> ReconciliationContext {
    context.advance(phase);
    context
}
