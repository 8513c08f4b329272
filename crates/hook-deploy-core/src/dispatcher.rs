//! # Delivery Dispatcher
//!
//! Handles one inbound delivery end to end:
//!
//! 1. select the provider from request headers
//! 2. authenticate against the shared secret
//! 3. read the event name; `ping` is answered immediately, anything other
//!    than a push is rejected
//! 4. read the delivery ID and the `projectid` query parameter
//! 5. resolve the project configuration
//! 6. decode the payload and hand it to the executor
//!
//! Nothing is spawned before authentication, event classification and
//! configuration resolution have all succeeded.

use crate::{
    executor::{DeploymentExecutor, DeploymentRun, RunStatus},
    project_config::ConfigResolver,
    provider::{EventKind, ProviderIdentity, WebhookEvent, PAYLOAD_FORM_FIELD},
    request::InboundRequest,
    secret::WebhookSecret,
    DeployError, ProjectId,
};
use std::sync::Arc;
use tracing::{info, instrument, Span};

/// Query parameter naming the project a delivery is for.
pub const PROJECT_ID_PARAM: &str = "projectid";

/// Immutable state shared by every delivery handled by a process.
#[derive(Debug, Clone)]
pub struct RuntimeSnapshot {
    pub secret: WebhookSecret,
    pub resolver: ConfigResolver,
    pub executor: DeploymentExecutor,
}

/// Successful result of handling a delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// A connectivity check; no deployment was attempted.
    Pong { provider: ProviderIdentity },
    /// The deployment ran or was served from its stored log.
    Deployed(DeploymentRun),
}

impl Outcome {
    /// Plain-text response body for the caller.
    pub fn response_body(&self) -> String {
        match self {
            Self::Pong { provider } => format!("pong ({provider})\n"),
            Self::Deployed(run) => match run.status {
                RunStatus::Cached => format!("Cached...\n{}", run.output),
                RunStatus::Completed | RunStatus::Failed => format!(
                    "Exit status: {}\n{}",
                    run.exit_code.map_or_else(|| "unknown".to_string(), |c| c.to_string()),
                    run.output
                ),
            },
        }
    }
}

/// Routes deliveries through provider, resolver and executor.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    snapshot: Arc<RuntimeSnapshot>,
}

impl Dispatcher {
    pub fn new(snapshot: Arc<RuntimeSnapshot>) -> Self {
        Self { snapshot }
    }

    pub fn snapshot(&self) -> &RuntimeSnapshot {
        &self.snapshot
    }

    /// Handle a single delivery.
    ///
    /// # Errors
    ///
    /// Any [`DeployError`]; see its `http_status` for the response mapping.
    #[instrument(
        skip(self, request),
        fields(provider, event, project_id, delivery_id)
    )]
    pub async fn handle(&self, request: &InboundRequest) -> Result<Outcome, DeployError> {
        let span = Span::current();

        let provider = ProviderIdentity::select(&request.headers)?;
        span.record("provider", provider.name());

        provider.authenticate(&self.snapshot.secret, request)?;

        let event_name = provider.extract_event(&request.headers)?;
        span.record("event", event_name.as_str());

        match provider.classify(&event_name) {
            EventKind::Push => {}
            EventKind::Ping => {
                info!("Ping received");
                return Ok(Outcome::Pong { provider });
            }
            EventKind::Other => {
                return Err(DeployError::UnsupportedEvent { event: event_name });
            }
        }

        let delivery_id = provider.extract_delivery_id(&request.headers)?;
        span.record("delivery_id", delivery_id.as_str());

        let project_id = ProjectId::new(request.query.require(PROJECT_ID_PARAM)?)?;
        span.record("project_id", project_id.as_str());

        let config = self.snapshot.resolver.resolve(&project_id, &delivery_id)?;

        let payload =
            provider.decode_payload(request.content_type(), &request.body, PAYLOAD_FORM_FIELD)?;

        let event = WebhookEvent {
            provider,
            event_name,
            delivery_id,
            payload,
        };

        info!(payload_size = event.payload.len(), "Dispatching deployment");

        let run = self.snapshot.executor.execute(&config, &event).await?;
        Ok(Outcome::Deployed(run))
    }
}

#[cfg(test)]
#[path = "dispatcher_tests.rs"]
mod tests;
