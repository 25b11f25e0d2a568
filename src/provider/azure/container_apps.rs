//! # Azure Container Apps
//!
//! [`DeploymentPlatform`] over the Container Apps, Authorization and Resources
//! ARM APIs.
//!
//! Image updates are read-modify-write PATCHes of the app template. A revision copy
//! PATCHes the app with the chosen revision's template instead of the app's
//! current one, so stale images in the current template are never sent back.

use super::client::{ArmClient, ArmError};
use super::models::{
    ContainerApp, IdentityResource, ManagedServiceIdentity, RegistryCredentials, RevisionList,
    RoleAssignmentCreate, RoleAssignmentCreateProperties, RoleAssignmentList, TagsPatch,
    TagsPatchProperties,
};
use crate::config::EnvironmentConfig;
use crate::constants::{
    ACR_PULL_ROLE_DEFINITION_ID, AUTHORIZATION_API_VERSION, CONTAINER_APPS_API_VERSION,
    MANAGED_IDENTITY_API_VERSION, MAX_LIST_PAGES, TAGS_API_VERSION,
};
use crate::model::{
    DeploymentIdentity, DeploymentState, IdentityKind, ImageReference, RegistryBinding, Revision,
    ServiceTarget,
};
use crate::provider::common::track;
use crate::provider::{DeploymentPlatform, GrantOutcome};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, info_span, warn};

const PROVIDER: &str = "azure_container_apps";

pub struct ContainerApps {
    arm: Arc<ArmClient>,
    subscription_id: String,
    resource_group: String,
    user_identity_id: Option<String>,
}

impl std::fmt::Debug for ContainerApps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerApps")
            .field("subscription_id", &self.subscription_id)
            .field("resource_group", &self.resource_group)
            .finish_non_exhaustive()
    }
}

impl ContainerApps {
    #[must_use]
    pub fn new(arm: Arc<ArmClient>, config: &EnvironmentConfig) -> Self {
        Self {
            arm,
            subscription_id: config.subscription_id.clone(),
            resource_group: config.resource_group.clone(),
            user_identity_id: config.user_identity_id.clone(),
        }
    }

    fn app_id(&self, target: &ServiceTarget) -> String {
        format!(
            "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.App/containerApps/{}",
            self.subscription_id, self.resource_group, target.app_name
        )
    }

    async fn get_app(&self, target: &ServiceTarget) -> Result<Option<ContainerApp>> {
        let response = self
            .arm
            .send(
                Method::GET,
                &self.app_id(target),
                CONTAINER_APPS_API_VERSION,
                None,
            )
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let app = self
            .arm
            .check(response)
            .await?
            .json()
            .await
            .context("Failed to parse container app")?;
        Ok(Some(app))
    }

    async fn require_app(&self, target: &ServiceTarget) -> Result<ContainerApp> {
        self.get_app(target)
            .await?
            .with_context(|| format!("container app {} not found", target.app_name))
    }

    async fn patch_app(&self, target: &ServiceTarget, body: Value, operation: &str) -> Result<()> {
        let response = self
            .arm
            .send(
                Method::PATCH,
                &self.app_id(target),
                CONTAINER_APPS_API_VERSION,
                Some(body),
            )
            .await?;
        self.arm.wait_for_completion(response, operation).await
    }

    async fn deployment_identity(
        &self,
        identity: Option<&ManagedServiceIdentity>,
    ) -> Result<DeploymentIdentity> {
        let Some(resource_id) = &self.user_identity_id else {
            return Ok(DeploymentIdentity {
                kind: IdentityKind::PlatformManaged,
                principal_id: identity.and_then(|i| i.principal_id.clone()),
                resource_id: None,
            });
        };

        let attached = identity
            .and_then(|i| {
                i.user_assigned_identities
                    .iter()
                    .find(|(id, _)| id.eq_ignore_ascii_case(resource_id))
            })
            .and_then(|(_, assigned)| assigned.principal_id.clone());

        let principal_id = match attached {
            Some(principal) => principal,
            None => {
                debug!("{} not attached; looking up its principal", resource_id);
                self.user_identity_principal(resource_id).await?
            }
        };

        Ok(DeploymentIdentity {
            kind: IdentityKind::UserSupplied,
            principal_id: Some(principal_id),
            resource_id: Some(resource_id.clone()),
        })
    }

    async fn user_identity_principal(&self, resource_id: &str) -> Result<String> {
        let response = self
            .arm
            .send(Method::GET, resource_id, MANAGED_IDENTITY_API_VERSION, None)
            .await?;
        let identity: IdentityResource = self
            .arm
            .check(response)
            .await?
            .json()
            .await
            .context("Failed to parse user-assigned identity")?;
        Ok(identity.properties.principal_id)
    }

    async fn get_deployment_inner(&self, target: &ServiceTarget) -> Result<Option<DeploymentState>> {
        let Some(app) = self.get_app(target).await? else {
            return Ok(None);
        };

        let container_name = first_container_name(&app.properties.template)
            .with_context(|| format!("container app {} has no containers", target.app_name))?;

        let image = container_image(&app.properties.template, &container_name).and_then(|raw| {
            ImageReference::parse(raw)
                .inspect_err(|e| warn!("Deployed image of {} is unrecognized: {}", target.app_name, e))
                .ok()
        });

        let registries = app
            .properties
            .configuration
            .unwrap_or_default()
            .registries
            .into_iter()
            .map(|registry| RegistryBinding {
                server: registry.server,
                identity: registry.identity,
            })
            .collect();

        let identity = self.deployment_identity(app.identity.as_ref()).await?;

        Ok(Some(DeploymentState {
            image,
            container_name,
            registries,
            identity,
            tags: app.tags,
            latest_revision: app.properties.latest_revision_name,
        }))
    }
}

#[async_trait]
impl DeploymentPlatform for ContainerApps {
    async fn get_deployment(&self, target: &ServiceTarget) -> Result<Option<DeploymentState>> {
        let span = info_span!(
            "azure.container_apps.get",
            app.name = %target.app_name,
            operation.success = tracing::field::Empty,
            operation.duration_ms = tracing::field::Empty,
            error.message = tracing::field::Empty
        );
        track(
            PROVIDER,
            "get_deployment",
            span,
            self.get_deployment_inner(target),
        )
        .await
    }

    async fn grant_pull_permission(
        &self,
        principal_id: &str,
        registry_scope: &str,
    ) -> Result<GrantOutcome> {
        let span = info_span!(
            "azure.role_assignments.create",
            principal.id = %principal_id,
            scope = %registry_scope,
            operation.success = tracing::field::Empty,
            operation.duration_ms = tracing::field::Empty,
            error.message = tracing::field::Empty
        );
        track(PROVIDER, "grant_pull_permission", span, async {
            let assignment = RoleAssignmentCreate {
                properties: RoleAssignmentCreateProperties {
                    role_definition_id: format!(
                        "/subscriptions/{}/providers/Microsoft.Authorization/roleDefinitions/{ACR_PULL_ROLE_DEFINITION_ID}",
                        self.subscription_id
                    ),
                    principal_id: principal_id.to_string(),
                    principal_type: "ServicePrincipal".to_string(),
                },
            };
            let path = format!(
                "{registry_scope}/providers/Microsoft.Authorization/roleAssignments/{}",
                uuid::Uuid::new_v4()
            );
            let response = self
                .arm
                .send(
                    Method::PUT,
                    &path,
                    AUTHORIZATION_API_VERSION,
                    Some(serde_json::to_value(&assignment)?),
                )
                .await?;

            match self.arm.check(response).await {
                Ok(_) => {
                    info!("Granted AcrPull to {} on {}", principal_id, registry_scope);
                    Ok(GrantOutcome::Granted)
                }
                Err(e) if is_role_assignment_exists(&e) => {
                    debug!("{} already holds AcrPull on {}", principal_id, registry_scope);
                    Ok(GrantOutcome::AlreadySatisfied)
                }
                Err(e) => Err(e.context("Failed to create AcrPull role assignment")),
            }
        })
        .await
    }

    async fn pull_permission_effective(
        &self,
        principal_id: &str,
        registry_scope: &str,
    ) -> Result<bool> {
        let span = info_span!(
            "azure.role_assignments.list",
            principal.id = %principal_id,
            operation.success = tracing::field::Empty,
            operation.duration_ms = tracing::field::Empty,
            error.message = tracing::field::Empty
        );
        track(PROVIDER, "pull_permission_effective", span, async {
            let path = format!(
                "{registry_scope}/providers/Microsoft.Authorization/roleAssignments?$filter=assignedTo('{principal_id}')"
            );
            let response = self
                .arm
                .send(Method::GET, &path, AUTHORIZATION_API_VERSION, None)
                .await?;
            let assignments: RoleAssignmentList = self
                .arm
                .check(response)
                .await?
                .json()
                .await
                .context("Failed to parse role assignments")?;
            Ok(assignments.value.iter().any(|assignment| {
                assignment.properties.principal_id == principal_id
                    && assignment
                        .properties
                        .role_definition_id
                        .to_lowercase()
                        .ends_with(ACR_PULL_ROLE_DEFINITION_ID)
            }))
        })
        .await
    }

    async fn set_registry_binding(
        &self,
        target: &ServiceTarget,
        server: &str,
        identity: &str,
    ) -> Result<()> {
        let span = info_span!(
            "azure.container_apps.set_registry",
            app.name = %target.app_name,
            registry = %server,
            operation.success = tracing::field::Empty,
            operation.duration_ms = tracing::field::Empty,
            error.message = tracing::field::Empty
        );
        track(PROVIDER, "set_registry_binding", span, async {
            let app = self.require_app(target).await?;
            let mut registries = app.properties.configuration.unwrap_or_default().registries;
            registries.retain(|registry| !registry.server.eq_ignore_ascii_case(server));
            registries.push(RegistryCredentials {
                server: server.to_string(),
                identity: Some(identity.to_string()),
                username: None,
                password_secret_ref: None,
            });

            self.patch_app(
                target,
                json!({ "properties": { "configuration": { "registries": registries } } }),
                "registry binding",
            )
            .await
        })
        .await
    }

    async fn update_image(
        &self,
        target: &ServiceTarget,
        container_name: &str,
        image: &ImageReference,
    ) -> Result<()> {
        let span = info_span!(
            "azure.container_apps.update_image",
            app.name = %target.app_name,
            image = %image,
            operation.success = tracing::field::Empty,
            operation.duration_ms = tracing::field::Empty,
            error.message = tracing::field::Empty
        );
        track(PROVIDER, "update_image", span, async {
            let app = self.require_app(target).await?;
            let template =
                with_container_image(&app.properties.template, container_name, &image.to_string())?;
            self.patch_app(
                target,
                json!({ "properties": { "template": template } }),
                "image update",
            )
            .await
        })
        .await
    }

    async fn list_revisions(&self, target: &ServiceTarget) -> Result<Vec<Revision>> {
        let span = info_span!(
            "azure.container_apps.list_revisions",
            app.name = %target.app_name,
            operation.success = tracing::field::Empty,
            operation.duration_ms = tracing::field::Empty,
            error.message = tracing::field::Empty
        );
        track(PROVIDER, "list_revisions", span, async {
            let response = self
                .arm
                .send(
                    Method::GET,
                    &format!("{}/revisions", self.app_id(target)),
                    CONTAINER_APPS_API_VERSION,
                    None,
                )
                .await?;
            let mut list: RevisionList = self
                .arm
                .check(response)
                .await?
                .json()
                .await
                .context("Failed to parse revision list")?;
            let mut revisions = std::mem::take(&mut list.value);

            let mut pages = 1;
            while let Some(next_link) = list.next_link.take() {
                if pages >= MAX_LIST_PAGES {
                    warn!(
                        "{} lists more than {} pages of revisions; stopping",
                        target.app_name, MAX_LIST_PAGES
                    );
                    break;
                }
                let response = self.arm.send_next_link(&next_link).await?;
                list = self
                    .arm
                    .check(response)
                    .await?
                    .json()
                    .await
                    .context("Failed to parse revision list page")?;
                revisions.append(&mut list.value);
                pages += 1;
            }
            debug!("{} has {} revision(s)", target.app_name, revisions.len());

            Ok(revisions
                .into_iter()
                .map(|revision| Revision {
                    created: revision
                        .properties
                        .created_time
                        .as_deref()
                        .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
                        .map(|t| t.with_timezone(&Utc)),
                    active: revision.properties.active,
                    name: revision.name,
                })
                .collect())
        })
        .await
    }

    async fn copy_revision(
        &self,
        target: &ServiceTarget,
        from_revision: &str,
        container_name: &str,
        image: &ImageReference,
    ) -> Result<()> {
        let span = info_span!(
            "azure.container_apps.copy_revision",
            app.name = %target.app_name,
            revision = %from_revision,
            image = %image,
            operation.success = tracing::field::Empty,
            operation.duration_ms = tracing::field::Empty,
            error.message = tracing::field::Empty
        );
        track(PROVIDER, "copy_revision", span, async {
            let response = self
                .arm
                .send(
                    Method::GET,
                    &format!("{}/revisions/{from_revision}", self.app_id(target)),
                    CONTAINER_APPS_API_VERSION,
                    None,
                )
                .await?;
            let revision: super::models::RevisionResource = self
                .arm
                .check(response)
                .await?
                .json()
                .await
                .context("Failed to parse revision")?;

            let template = with_container_image(
                &revision.properties.template,
                container_name,
                &image.to_string(),
            )?;
            self.patch_app(
                target,
                json!({ "properties": { "template": template } }),
                "revision copy",
            )
            .await
        })
        .await
    }

    async fn merge_tags(
        &self,
        target: &ServiceTarget,
        tags: &BTreeMap<String, String>,
    ) -> Result<()> {
        let span = info_span!(
            "azure.tags.merge",
            app.name = %target.app_name,
            operation.success = tracing::field::Empty,
            operation.duration_ms = tracing::field::Empty,
            error.message = tracing::field::Empty
        );
        track(PROVIDER, "merge_tags", span, async {
            let body = TagsPatch {
                operation: "Merge",
                properties: TagsPatchProperties { tags },
            };
            let response = self
                .arm
                .send(
                    Method::PATCH,
                    &format!(
                        "{}/providers/Microsoft.Resources/tags/default",
                        self.app_id(target)
                    ),
                    TAGS_API_VERSION,
                    Some(serde_json::to_value(&body)?),
                )
                .await?;
            self.arm.check(response).await?;
            Ok(())
        })
        .await
    }
}

fn is_role_assignment_exists(error: &anyhow::Error) -> bool {
    error
        .downcast_ref::<ArmError>()
        .is_some_and(|e| e.code.as_deref() == Some("RoleAssignmentExists"))
}

fn containers(template: &Value) -> &[Value] {
    template
        .get("containers")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

fn first_container_name(template: &Value) -> Option<String> {
    containers(template)
        .first()
        .and_then(|container| container.get("name"))
        .and_then(Value::as_str)
        .map(ToString::to_string)
}

fn container_image<'t>(template: &'t Value, container_name: &str) -> Option<&'t str> {
    containers(template)
        .iter()
        .find(|container| container.get("name").and_then(Value::as_str) == Some(container_name))
        .and_then(|container| container.get("image"))
        .and_then(Value::as_str)
}

/// Copy of `template` with `container_name` running `image`.
///
/// The revision suffix is dropped so the platform names the new revision.
fn with_container_image(template: &Value, container_name: &str, image: &str) -> Result<Value> {
    let mut template = template.clone();
    let container = template
        .get_mut("containers")
        .and_then(Value::as_array_mut)
        .and_then(|containers| {
            containers
                .iter_mut()
                .find(|c| c.get("name").and_then(Value::as_str) == Some(container_name))
        })
        .with_context(|| format!("container '{container_name}' not found in template"))?;
    container["image"] = Value::String(image.to_string());

    if let Some(object) = template.as_object_mut() {
        object.remove("revisionSuffix");
    }
    Ok(template)
}
