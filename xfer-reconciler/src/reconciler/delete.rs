//! Delete flow: submit-delete, then poll until the server is gone.

use tracing::{info, info_span, Instrument};

use super::{advanced, identity, unexpected_phase, ResourceRequest, ServerReconciler};
use crate::classify::handle_remote_error;
use crate::clients::Operation;
use crate::context::{Phase, ReconciliationContext};
use crate::error::ErrorKind;
use crate::step::StepResult;

impl ServerReconciler {
    /// Delete the server named by `request.desired.server_id`.
    ///
    /// A server that is already gone when the delete is submitted fails with
    /// `NotFound`; one that disappears while polling completes the flow.
    pub async fn delete(
        &self,
        request: &ResourceRequest,
        context: Option<ReconciliationContext>,
    ) -> StepResult<()> {
        let mut context = self.resume(context);
        if context.server_id.is_none() {
            context.server_id = request.desired.server_id.clone();
        }
        let span = info_span!("delete", server_id = identity(&context), phase = ?context.phase);
        self.delete_step(context).instrument(span).await
    }

    async fn delete_step(&self, context: ReconciliationContext) -> StepResult<()> {
        let Some(server_id) = context.server_id.clone() else {
            return StepResult::failed(
                ErrorKind::NotFound,
                format!("{} requires a server id", Operation::DeleteServer),
            );
        };

        match context.phase {
            Phase::Submit => match self.api.delete(&server_id).await {
                Ok(()) => {
                    info!("Deleting server {}", server_id);
                    StepResult::in_progress(
                        self.config.poll_delay(),
                        advanced(context, Phase::AwaitDeletion),
                    )
                }
                Err(e) => {
                    handle_remote_error(Operation::DeleteServer, &server_id, e, context, &self.policy())
                }
            },
            Phase::AwaitDeletion => match self.api.describe(&server_id).await {
                Ok(descriptor) => {
                    info!("Server {} still present ({})", server_id, descriptor.state);
                    StepResult::in_progress(self.config.poll_delay(), context)
                }
                Err(e) if e.is_not_found() => {
                    info!("Server {} deleted", server_id);
                    StepResult::Complete(())
                }
                Err(e) => handle_remote_error(
                    Operation::DescribeServer,
                    &server_id,
                    e,
                    context,
                    &self.policy(),
                ),
            },
            _ => unexpected_phase("delete", &context),
        }
    }
}
