//! Request and response bodies for the Azure REST APIs used by the adapters.
//!
//! Container App templates are kept as raw JSON so fields this crate does not
//! model (probes, volumes, scale rules) survive a read-modify-write unchanged.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// ARM error envelope
#[derive(Debug, Deserialize)]
pub struct ArmErrorResponse {
    pub error: ArmErrorDetail,
}

#[derive(Debug, Deserialize)]
pub struct ArmErrorDetail {
    pub code: String,
    #[serde(default)]
    pub message: String,
}

/// Body returned by an `Azure-AsyncOperation` monitor URL
#[derive(Debug, Deserialize)]
pub struct AsyncOperationStatus {
    pub status: String,
    #[serde(default)]
    pub error: Option<ArmErrorDetail>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerApp {
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub identity: Option<ManagedServiceIdentity>,
    pub properties: ContainerAppProperties,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedServiceIdentity {
    #[serde(default)]
    pub principal_id: Option<String>,
    #[serde(default)]
    pub user_assigned_identities: BTreeMap<String, UserAssignedIdentity>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserAssignedIdentity {
    #[serde(default)]
    pub principal_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerAppProperties {
    #[serde(default)]
    pub latest_revision_name: Option<String>,
    #[serde(default)]
    pub configuration: Option<ContainerAppConfiguration>,
    #[serde(default)]
    pub template: serde_json::Value,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerAppConfiguration {
    #[serde(default)]
    pub registries: Vec<RegistryCredentials>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryCredentials {
    pub server: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_secret_ref: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RevisionList {
    #[serde(default)]
    pub value: Vec<RevisionResource>,
    #[serde(rename = "nextLink", default)]
    pub next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RevisionResource {
    pub name: String,
    #[serde(default)]
    pub properties: RevisionProperties,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevisionProperties {
    #[serde(default)]
    pub created_time: Option<String>,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub template: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct RoleAssignmentCreate {
    pub properties: RoleAssignmentCreateProperties,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleAssignmentCreateProperties {
    pub role_definition_id: String,
    pub principal_id: String,
    pub principal_type: String,
}

#[derive(Debug, Deserialize)]
pub struct RoleAssignmentList {
    #[serde(default)]
    pub value: Vec<RoleAssignment>,
}

#[derive(Debug, Deserialize)]
pub struct RoleAssignment {
    pub properties: RoleAssignmentProperties,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleAssignmentProperties {
    pub role_definition_id: String,
    pub principal_id: String,
}

/// Body of a `tags/default` PATCH
#[derive(Debug, Serialize)]
pub struct TagsPatch<'a> {
    pub operation: &'static str,
    pub properties: TagsPatchProperties<'a>,
}

#[derive(Debug, Serialize)]
pub struct TagsPatchProperties<'a> {
    pub tags: &'a BTreeMap<String, String>,
}

/// Body of a user-assigned identity GET
#[derive(Debug, Deserialize)]
pub struct IdentityResource {
    pub properties: IdentityResourceProperties,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityResourceProperties {
    pub principal_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportImageParameters {
    pub source: ImportSourceParameters,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub target_tags: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub untagged_target_repositories: Vec<String>,
    pub mode: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSourceParameters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registry_uri: Option<String>,
    pub source_image: String,
}

/// ACR `/oauth2/exchange` response
#[derive(Debug, Deserialize)]
pub struct AcrRefreshToken {
    pub refresh_token: String,
}

/// ACR `/oauth2/token` response
#[derive(Debug, Deserialize)]
pub struct AcrAccessToken {
    pub access_token: String,
}

/// `/acr/v1/{repository}/_manifests` response
#[derive(Debug, Deserialize)]
pub struct ManifestAttributesList {
    #[serde(default)]
    pub manifests: Vec<ManifestAttributes>,
}

#[derive(Debug, Deserialize)]
pub struct ManifestAttributes {
    pub digest: String,
}

/// Image manifest or index, whichever the registry returns
#[derive(Debug, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub config: Option<Descriptor>,
    #[serde(default)]
    pub manifests: Vec<Descriptor>,
}

#[derive(Debug, Deserialize)]
pub struct Descriptor {
    pub digest: String,
    #[serde(default)]
    pub platform: Option<Platform>,
}

#[derive(Debug, Deserialize)]
pub struct Platform {
    pub architecture: String,
    pub os: String,
}

/// Image config blob; only labels are read
#[derive(Debug, Deserialize)]
pub struct ImageConfig {
    #[serde(default)]
    pub config: Option<ImageConfigDetails>,
}

#[derive(Debug, Deserialize)]
pub struct ImageConfigDetails {
    #[serde(rename = "Labels", default)]
    pub labels: Option<BTreeMap<String, String>>,
}
