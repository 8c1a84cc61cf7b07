//! Repository sync router.
//!
//! Create, update and delete events are mirrored into the repository through
//! the write proxy, and every write is recorded in the path-mapping
//! directory. Binary updates are diffed against the directory first so that
//! a metadata-only edit never touches the repository.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, instrument};

use super::Wiring;
use crate::adapters::{HttpClient, HttpMappingDirectory, HttpWriteProxy, Mapping, MappingDirectory, Outcome, WriteProxy};
use crate::config::ConvergenceConfig;
use crate::core::error::{Result, SyncError};
use crate::core::resolver::{normalize_base, resolve, PathResolver};
use crate::core::retry::RedeliveryPolicy;
use crate::core::stage::{Exchange, Pipeline, Stage, Transition};
use crate::domain::event::REL_DESCRIBES;
use crate::domain::{EventType, SyncAction, SyncContext};
use crate::transport::MessageBus;

/// Outcome header on notifications
pub const SYNC_ACTION_HEADER: &str = "X-Sync-Action";
pub const CONTENT_PATH_HEADER: &str = "X-Content-Path";
pub const REPOSITORY_PATH_HEADER: &str = "X-Repository-Path";

pub const ACCEPTED: [EventType; 3] = [EventType::Create, EventType::Update, EventType::Delete];

#[derive(Debug, Clone)]
pub struct RepositorySettings {
    pub cms_base_url: String,
    pub proxy_base_url: String,
    pub mapping_base_url: String,
    pub repository_base_header: String,
    pub repository_base_url: Option<String>,
    pub convergence: ConvergenceConfig,
}

/// External services the router writes through
#[derive(Clone)]
pub struct RepositoryServices {
    pub proxy: Arc<dyn WriteProxy>,
    pub directory: Arc<dyn MappingDirectory>,
}

impl RepositoryServices {
    pub fn http(http: &HttpClient, settings: &RepositorySettings) -> Self {
        Self {
            proxy: Arc::new(HttpWriteProxy::new(
                http.clone(),
                settings.proxy_base_url.clone(),
                &settings.convergence,
            )),
            directory: Arc::new(HttpMappingDirectory::new(
                http.clone(),
                settings.mapping_base_url.clone(),
                &settings.convergence,
            )),
        }
    }
}

/// Assemble the router
pub fn pipeline(
    wiring: &Wiring,
    settings: &RepositorySettings,
    services: RepositoryServices,
) -> Pipeline<SyncContext> {
    let workflow = Arc::new(Workflow {
        proxy: services.proxy,
        resolver: PathResolver::new(services.directory, wiring.redelivery.clone()),
        redelivery: wiring.redelivery.clone(),
    });

    let pipeline = wiring
        .pipeline(&ACCEPTED)
        .stage(ResolvePaths {
            cms_base_url: settings.cms_base_url.clone(),
            base_header: settings.repository_base_header.clone(),
            base_fallback: settings.repository_base_url.clone(),
        })
        .stage(CreateResource(workflow.clone()))
        .stage(UpdateResource(workflow.clone()))
        .stage(UpdateBinary(workflow.clone()))
        .stage(DeleteResource(workflow));

    match &wiring.output {
        Some(output) => pipeline.stage(EmitNotification {
            output: output.clone(),
            bus: wiring.bus.clone(),
            redelivery: wiring.redelivery.clone(),
        }),
        None => pipeline,
    }
}

/// Calls shared by the create, update and delete branches
struct Workflow {
    proxy: Arc<dyn WriteProxy>,
    resolver: PathResolver,
    redelivery: RedeliveryPolicy,
}

impl Workflow {
    /// Create the subject resource and register where it landed.
    ///
    /// Returns the repository path of the subject. A resource that already
    /// exists must either be named by the proxy or already be mapped.
    #[instrument(skip_all, fields(subject))]
    async fn create(&self, ctx: &SyncContext, authorization: &str) -> Result<String> {
        let content_path = ctx.require_content_path()?;
        let base = ctx.require_repository_base()?;
        let subject = ctx.subject_path()?;
        tracing::Span::current().record("subject", subject);

        let proxy = &self.proxy;
        let outcome = self
            .redelivery
            .attempt("proxy.create", || proxy.create(subject, authorization))
            .await?;

        let stored = match outcome {
            Outcome::Done(stored) => stored,
            Outcome::Converged => {
                debug!("Resource already exists");
                return self
                    .resolver
                    .repo_path_for(subject, authorization)
                    .await?
                    .ok_or_else(|| SyncError::Rejected {
                        call: "proxy.create".to_string(),
                        status: 0,
                        message: format!("{subject} already exists but no mapping records where"),
                    });
            }
        };

        let location = stored.location.ok_or_else(|| SyncError::Rejected {
            call: "proxy.create".to_string(),
            status: 0,
            message: "response carried no Location".to_string(),
        })?;
        let repo_path = resolve(&location, base)?;
        self.resolver
            .register(&Mapping::new(subject, repo_path.as_str()), authorization)
            .await?;

        // The media resource maps to the binary's description
        if let (true, Some(described_by)) = (ctx.is_binary(), stored.described_by) {
            let description = resolve(&described_by, base)?;
            self.resolver
                .register(&Mapping::new(content_path, description), authorization)
                .await?;
        }

        info!(repo_path = %repo_path, "Resource created");
        Ok(repo_path)
    }
}

/// Resolves the content, file and repository base paths of the event
struct ResolvePaths {
    cms_base_url: String,
    base_header: String,
    base_fallback: Option<String>,
}

#[async_trait]
impl Stage<SyncContext> for ResolvePaths {
    fn name(&self) -> &str {
        "resolve_paths"
    }

    async fn process(&self, exchange: Exchange<SyncContext>) -> Result<Transition<SyncContext>> {
        let event = exchange.event();
        let object = event.object()?;

        let content_path = resolve(&object.canonical()?.href, &self.cms_base_url)?;
        let file_path = if object.has_rel(REL_DESCRIBES) {
            Some(resolve(&object.describes()?.href, &self.cms_base_url)?)
        } else {
            None
        };

        let base = exchange
            .message()
            .header(&self.base_header)
            .map(str::to_string)
            .or_else(|| event.target.clone())
            .or_else(|| self.base_fallback.clone())
            .filter(|base| !base.trim().is_empty())
            .map(|base| normalize_base(&base))
            .ok_or_else(|| {
                SyncError::malformed(format!(
                    "no repository base: no {} header, event target or configured fallback",
                    self.base_header
                ))
            })?;

        debug!(%content_path, ?file_path, repository_base = %base, "Resolved paths");
        Ok(Transition::Continue(
            exchange.extend(|ctx| ctx.with_paths(content_path, file_path, base)),
        ))
    }
}

struct CreateResource(Arc<Workflow>);

#[async_trait]
impl Stage<SyncContext> for CreateResource {
    fn name(&self) -> &str {
        "create_resource"
    }

    fn should_handle(&self, exchange: &Exchange<SyncContext>) -> bool {
        exchange.event_type() == EventType::Create
    }

    async fn process(&self, exchange: Exchange<SyncContext>) -> Result<Transition<SyncContext>> {
        let repo_path = self
            .0
            .create(exchange.context(), exchange.authorization())
            .await?;
        Ok(Transition::Continue(
            exchange.extend(|ctx| ctx.with_outcome(SyncAction::Created, Some(repo_path))),
        ))
    }
}

/// Update of a resource without a binary: write in place when mapped,
/// otherwise create it
struct UpdateResource(Arc<Workflow>);

#[async_trait]
impl Stage<SyncContext> for UpdateResource {
    fn name(&self) -> &str {
        "update_resource"
    }

    fn should_handle(&self, exchange: &Exchange<SyncContext>) -> bool {
        exchange.event_type() == EventType::Update && !exchange.context().is_binary()
    }

    async fn process(&self, exchange: Exchange<SyncContext>) -> Result<Transition<SyncContext>> {
        let workflow = &self.0;
        let ctx = exchange.context();
        let authorization = exchange.authorization();
        let content_path = ctx.require_content_path()?;

        let Some(repo_path) = workflow.resolver.repo_path_for(content_path, authorization).await? else {
            debug!(content_path, "Update for unmapped resource, creating it");
            let repo_path = workflow.create(ctx, authorization).await?;
            return Ok(Transition::Continue(
                exchange.extend(|ctx| ctx.with_outcome(SyncAction::Created, Some(repo_path))),
            ));
        };

        let proxy = &workflow.proxy;
        workflow
            .redelivery
            .attempt("proxy.update", || proxy.update(&repo_path, authorization))
            .await?;

        info!(content_path, %repo_path, "Resource updated");
        Ok(Transition::Continue(
            exchange.extend(|ctx| ctx.with_outcome(SyncAction::Updated, Some(repo_path))),
        ))
    }
}

/// Update of a media resource: only rewrites the binary when the file it
/// describes has moved
struct UpdateBinary(Arc<Workflow>);

#[async_trait]
impl Stage<SyncContext> for UpdateBinary {
    fn name(&self) -> &str {
        "update_binary"
    }

    fn should_handle(&self, exchange: &Exchange<SyncContext>) -> bool {
        exchange.event_type() == EventType::Update && exchange.context().is_binary()
    }

    async fn process(&self, exchange: Exchange<SyncContext>) -> Result<Transition<SyncContext>> {
        let workflow = &self.0;
        let ctx = exchange.context();
        let authorization = exchange.authorization();
        let content_path = ctx.require_content_path()?;
        let file_path = ctx.subject_path()?;
        let base = ctx.require_repository_base()?;

        let Some(description) = workflow.resolver.repo_path_for(content_path, authorization).await? else {
            debug!(content_path, "Media not mapped yet, creating its binary");
            let repo_path = workflow.create(ctx, authorization).await?;
            return Ok(Transition::Continue(
                exchange.extend(|ctx| ctx.with_outcome(SyncAction::Created, Some(repo_path))),
            ));
        };

        let proxy = &workflow.proxy;
        let described = workflow
            .redelivery
            .attempt("proxy.describes", || proxy.describes(&description, authorization))
            .await?;

        let previous = match described {
            Some(uri) => {
                let binary = resolve(&uri, base)?;
                workflow.resolver.content_path_for(&binary, authorization).await?
            }
            None => None,
        };

        if previous.as_deref() == Some(file_path) {
            info!(content_path, file_path, "Binary unchanged");
            return Ok(Transition::Complete(exchange));
        }

        // The directory holds one association per content path, so both the
        // old file and the media must be released before the create
        // registers them again
        if let Some(previous) = previous.as_deref() {
            debug!(content_path, previous, file_path, "Binary moved, remapping");
            workflow.resolver.unregister(previous, authorization).await?;
        }
        workflow.resolver.unregister(content_path, authorization).await?;
        let repo_path = workflow.create(ctx, authorization).await?;

        Ok(Transition::Continue(
            exchange.extend(|ctx| ctx.with_outcome(SyncAction::Updated, Some(repo_path))),
        ))
    }
}

struct DeleteResource(Arc<Workflow>);

#[async_trait]
impl Stage<SyncContext> for DeleteResource {
    fn name(&self) -> &str {
        "delete_resource"
    }

    fn should_handle(&self, exchange: &Exchange<SyncContext>) -> bool {
        exchange.event_type() == EventType::Delete
    }

    async fn process(&self, exchange: Exchange<SyncContext>) -> Result<Transition<SyncContext>> {
        let workflow = &self.0;
        let ctx = exchange.context();
        let authorization = exchange.authorization();
        let subject = ctx.subject_path()?;

        let Some(repo_path) = workflow.resolver.repo_path_for(subject, authorization).await? else {
            info!(subject, "Nothing mapped, already deleted");
            return Ok(Transition::Complete(exchange));
        };

        let proxy = &workflow.proxy;
        let outcome = workflow
            .redelivery
            .attempt("proxy.delete", || proxy.delete(&repo_path, authorization))
            .await?;
        if let Outcome::Converged = outcome {
            debug!(%repo_path, "Resource already absent");
        }

        workflow.resolver.unregister(subject, authorization).await?;
        if ctx.is_binary() {
            let content_path = ctx.require_content_path()?;
            workflow.resolver.unregister(content_path, authorization).await?;
        }

        info!(subject, %repo_path, "Resource deleted");
        Ok(Transition::Continue(
            exchange.extend(|ctx| ctx.with_outcome(SyncAction::Deleted, Some(repo_path))),
        ))
    }
}

/// Publishes the original message, annotated with the outcome
struct EmitNotification {
    output: String,
    bus: Arc<dyn MessageBus>,
    redelivery: RedeliveryPolicy,
}

#[async_trait]
impl Stage<SyncContext> for EmitNotification {
    fn name(&self) -> &str {
        "emit_notification"
    }

    fn should_handle(&self, exchange: &Exchange<SyncContext>) -> bool {
        exchange.context().action.is_some()
    }

    async fn process(&self, exchange: Exchange<SyncContext>) -> Result<Transition<SyncContext>> {
        let ctx = exchange.context();
        let Some(action) = ctx.action else {
            return Ok(Transition::Complete(exchange));
        };

        let mut extra = vec![(SYNC_ACTION_HEADER, action.as_str())];
        if let Some(content_path) = ctx.content_path.as_deref() {
            extra.push((CONTENT_PATH_HEADER, content_path));
        }
        if let Some(repo_path) = ctx.repo_path.as_deref() {
            extra.push((REPOSITORY_PATH_HEADER, repo_path));
        }
        let notification = exchange.forward(&extra);

        let bus = &self.bus;
        let output = self.output.as_str();
        self.redelivery
            .attempt("bus.publish", || bus.publish(output, notification.clone()))
            .await?;

        debug!(output, action = action.as_str(), "Notification published");
        Ok(Transition::Complete(exchange))
    }
}
