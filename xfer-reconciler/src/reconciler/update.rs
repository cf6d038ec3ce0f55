//! Update flow: submit-config, stabilize, security groups, tags, read back.

use std::time::Duration;

use tracing::{error, info, info_span, warn, Instrument};

use super::{advanced, identity, unexpected_phase, ResourceRequest, ServerReconciler};
use crate::classify::handle_remote_error;
use crate::clients::{ConfigUpdate, Operation};
use crate::context::{Phase, ReconciliationContext};
use crate::error::ErrorKind;
use crate::model::ServerSpec;
use crate::network::{plan_security_groups, NetworkAction};
use crate::step::StepResult;
use crate::tags::{diff_if_changed, TagDelta};
use crate::validation::validate_update;

impl ServerReconciler {
    /// Move an existing server from `request.previous` to `request.desired`.
    pub async fn update(
        &self,
        request: &ResourceRequest,
        context: Option<ReconciliationContext>,
    ) -> StepResult<ServerSpec> {
        let context = self.resume(context);
        let span = info_span!("update", server_id = identity(&context), phase = ?context.phase);
        self.update_step(request, context).instrument(span).await
    }

    async fn update_step(
        &self,
        request: &ResourceRequest,
        mut context: ReconciliationContext,
    ) -> StepResult<ServerSpec> {
        let Some(previous) = request.previous.as_ref() else {
            let message = format!(
                "{} failed for {}: the previous server spec is required",
                Operation::UpdateServer,
                identity(&context)
            );
            error!("{}", message);
            return StepResult::failed(ErrorKind::InvalidRequest, message);
        };

        let server_id = match context
            .server_id
            .clone()
            .or_else(|| request.desired.server_id.clone())
            .or_else(|| previous.server_id.clone())
        {
            Some(id) => id,
            None => {
                let message = format!(
                    "{} failed for {}: the id of an existing server is required",
                    Operation::UpdateServer,
                    identity(&context)
                );
                error!("{}", message);
                return StepResult::failed(ErrorKind::NotFound, message);
            }
        };
        context.server_id = Some(server_id.clone());

        // Phases with nothing to do fall through to the next one; any phase
        // that calls the control plane returns.
        loop {
            match context.phase {
                Phase::Submit => {
                    return self
                        .submit_update(&server_id, previous, request, context)
                        .await
                }
                Phase::Stabilize => {
                    let context = crate::proceed!(
                        self.stabilize_step(&server_id, &request.desired, context)
                            .await
                    );
                    return StepResult::in_progress(
                        Duration::ZERO,
                        advanced(context, Phase::SecurityGroups),
                    );
                }
                Phase::SecurityGroups => {
                    let plan = plan_security_groups(
                        previous.config.endpoint_type,
                        &previous.attachment,
                        request.desired.config.endpoint_type,
                        &request.desired.attachment,
                    );
                    match (plan, context.vpc_endpoint_id.clone()) {
                        (Some(NetworkAction::ModifySecurityGroups { add, remove }), Some(endpoint)) => {
                            info!(
                                "Updating security groups of endpoint {}: +{:?} -{:?}",
                                endpoint, add, remove
                            );
                            return match self
                                .api
                                .modify_endpoint_security_groups(&endpoint, &add, &remove)
                                .await
                            {
                                Ok(()) => StepResult::in_progress(
                                    Duration::ZERO,
                                    advanced(context, Phase::AddTags),
                                ),
                                Err(e) => handle_remote_error(
                                    Operation::ModifyEndpointSecurityGroups,
                                    &server_id,
                                    e,
                                    context,
                                    &self.policy(),
                                ),
                            };
                        }
                        (Some(_), None) => {
                            warn!(
                                "Server {} has no VPC endpoint, skipping security groups",
                                server_id
                            );
                            context.advance(Phase::AddTags);
                        }
                        _ => context.advance(Phase::AddTags),
                    }
                }
                Phase::AddTags => {
                    let delta = tag_delta(request, previous);
                    if delta.to_add.is_empty() {
                        context.advance(Phase::RemoveTags);
                        continue;
                    }
                    let arn = crate::proceed!(self.resolve_arn(&server_id, context.clone()).await);
                    info!("Tagging server {} with {:?}", server_id, delta.to_add);
                    return match self.api.tag(&arn, &delta.to_add).await {
                        Ok(()) => StepResult::in_progress(
                            Duration::ZERO,
                            advanced(context, Phase::RemoveTags),
                        ),
                        Err(e) => handle_remote_error(
                            Operation::TagResource,
                            &server_id,
                            e,
                            context,
                            &self.policy(),
                        ),
                    };
                }
                Phase::RemoveTags => {
                    let delta = tag_delta(request, previous);
                    if delta.to_remove.is_empty() {
                        context.advance(Phase::ReadBack);
                        continue;
                    }
                    let arn = crate::proceed!(self.resolve_arn(&server_id, context.clone()).await);
                    info!("Untagging server {}: {:?}", server_id, delta.to_remove);
                    return match self.api.untag(&arn, &delta.to_remove).await {
                        Ok(()) => StepResult::in_progress(
                            Duration::ZERO,
                            advanced(context, Phase::ReadBack),
                        ),
                        Err(e) => handle_remote_error(
                            Operation::UntagResource,
                            &server_id,
                            e,
                            context,
                            &self.policy(),
                        ),
                    };
                }
                Phase::ReadBack => return self.finish("update", &server_id, context).await,
                Phase::AwaitDeletion => return unexpected_phase("update", &context),
            }
        }
    }

    async fn submit_update(
        &self,
        server_id: &str,
        previous: &ServerSpec,
        request: &ResourceRequest,
        context: ReconciliationContext,
    ) -> StepResult<ServerSpec> {
        let desired = &request.desired;
        if let Err(e) = validate_update(previous, desired) {
            let message = format!("{} failed for {}: {}", Operation::UpdateServer, server_id, e);
            error!("{}", message);
            return StepResult::failed(ErrorKind::InvalidRequest, message);
        }

        let update = ConfigUpdate {
            config: desired.config.clone(),
            vpc_id: desired.attachment.vpc_id.clone(),
        };
        info!("Updating configuration of server {}", server_id);
        match self.api.update_config(server_id, &update).await {
            Ok(()) => StepResult::in_progress(
                self.config.poll_delay(),
                advanced(context, Phase::Stabilize),
            ),
            Err(e) => {
                handle_remote_error(Operation::UpdateServer, server_id, e, context, &self.policy())
            }
        }
    }

    /// The ARN recorded at stabilization, or a fresh describe when the
    /// context predates it.
    async fn resolve_arn(
        &self,
        server_id: &str,
        context: ReconciliationContext,
    ) -> StepResult<String> {
        if let Some(arn) = context.arn {
            return StepResult::Complete(arn);
        }
        self.read_back(server_id, context)
            .await
            .then(|spec| match spec.arn {
                Some(arn) => StepResult::Complete(arn),
                None => StepResult::failed(
                    ErrorKind::GeneralServiceFailure,
                    format!("server {server_id} has no ARN"),
                ),
            })
    }
}

/// Tag changes between the merged previous and desired tag sets.
fn tag_delta(request: &ResourceRequest, previous: &ServerSpec) -> TagDelta {
    let before = request.previous_tags.merge_with(previous);
    let after = request.tags.merge_with(&request.desired);
    diff_if_changed(&before, &after).unwrap_or_default()
}
