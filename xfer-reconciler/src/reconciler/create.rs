//! Create flow: submit-create, stabilize, read back.

use std::time::Duration;

use tracing::{error, info, info_span, Instrument};

use super::{advanced, identity, unexpected_phase, ResourceRequest, ServerReconciler};
use crate::classify::handle_remote_error;
use crate::clients::{CreateServerRequest, Operation};
use crate::context::{Phase, ReconciliationContext};
use crate::error::ErrorKind;
use crate::model::ServerSpec;
use crate::step::StepResult;
use crate::validation::validate;

impl ServerReconciler {
    /// Create the server described by `request.desired`.
    ///
    /// Pass `None` on the first invocation and the returned context on every
    /// following one.
    pub async fn create(
        &self,
        request: &ResourceRequest,
        context: Option<ReconciliationContext>,
    ) -> StepResult<ServerSpec> {
        let context = self.resume(context);
        let span = info_span!("create", server_id = identity(&context), phase = ?context.phase);
        self.create_step(request, context).instrument(span).await
    }

    async fn create_step(
        &self,
        request: &ResourceRequest,
        context: ReconciliationContext,
    ) -> StepResult<ServerSpec> {
        let server_id = match (context.phase, context.server_id.clone()) {
            (Phase::Submit, _) => return self.submit_create(request, context).await,
            (_, Some(id)) => id,
            (_, None) => return unexpected_phase("create", &context),
        };

        match context.phase {
            Phase::Stabilize => {
                let context = crate::proceed!(
                    self.stabilize_step(&server_id, &request.desired, context)
                        .await
                );
                StepResult::in_progress(Duration::ZERO, advanced(context, Phase::ReadBack))
            }
            Phase::ReadBack => self.finish("create", &server_id, context).await,
            _ => unexpected_phase("create", &context),
        }
    }

    async fn submit_create(
        &self,
        request: &ResourceRequest,
        mut context: ReconciliationContext,
    ) -> StepResult<ServerSpec> {
        let desired = &request.desired;
        if let Err(e) = validate(desired) {
            let message = format!(
                "{} failed for {}: {}",
                Operation::CreateServer,
                identity(&context),
                e
            );
            error!("{}", message);
            return StepResult::failed(ErrorKind::InvalidRequest, message);
        }

        // Address allocations can only be attached while the server is
        // OFFLINE; stabilization applies them after creation.
        let mut attachment = desired.attachment.clone();
        attachment.address_allocation_ids.clear();
        attachment.vpc_endpoint_id = None;

        let create = CreateServerRequest {
            domain: desired.domain,
            config: desired.config.clone(),
            attachment,
            tags: request.tags.merge_with(desired),
        };

        match self.api.create(&create).await {
            Ok(server_id) => {
                info!("Created server {}", server_id);
                context.server_id = Some(server_id);
                context.advance(Phase::Stabilize);
                StepResult::in_progress(self.config.poll_delay(), context)
            }
            Err(e) => {
                let who = identity(&context).to_string();
                handle_remote_error(Operation::CreateServer, &who, e, context, &self.policy())
            }
        }
    }
}
