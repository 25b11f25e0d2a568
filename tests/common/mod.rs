//! Common test utilities
//!
//! In-memory registry, platform and config store used by the integration tests, plus
//! the rustls crypto provider setup the Pact tests need.
//!
//! The fakes enforce the platform rules the reconciler has to respect: a direct image
//! update re-validates every image in the template, a revision copy validates only the
//! new image, and an image from the environment's registry can only be pulled once the
//! registry is bound on the target.

#![allow(dead_code, reason = "each test binary uses a subset of the helpers")]

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use deploy_reconciler::config::EnvironmentConfig;
use deploy_reconciler::constants::DEFAULT_PLACEHOLDER_IMAGE;
use deploy_reconciler::controller::deployer::{Deployer, EnvironmentContext};
use deploy_reconciler::controller::propagation::FixedDelay;
use deploy_reconciler::model::{
    DeploymentIdentity, DeploymentState, IdentityKind, ImageReference, RegistryBinding, Revision,
    ServiceTarget,
};
use deploy_reconciler::provider::{
    ConfigStore, ContainerRegistry, DeploymentPlatform, GrantOutcome, ImportSource,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

static RUSTLS_INIT: Once = Once::new();

/// Initialize rustls crypto provider for tests
///
/// This must be called before any async operations that use rustls.
/// Uses a `Once` to ensure it's only called once across all tests.
pub fn init_rustls() {
    RUSTLS_INIT.call_once(|| {
        rustls::crypto::ring::default_provider()
            .install_default()
            .expect("Failed to install rustls crypto provider");
    });
}

/// Fixed propagation delay used by the scenario tests
pub const PROPAGATION_DELAY: Duration = Duration::from_secs(15);

pub const SERVICE_KEY: &str = "acme-billing";

/// `sha256:` followed by 64 copies of `c`
pub fn digest(c: char) -> String {
    format!("sha256:{}", c.to_string().repeat(64))
}

/// Calls made against the fakes, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    RepositoryExists {
        repository: String,
    },
    ManifestExists {
        repository: String,
        reference: String,
    },
    LatestDigest {
        repository: String,
    },
    Import {
        source: String,
        repository: String,
        tags: Vec<String>,
    },
    RevisionLabel {
        digest: String,
    },
    GetDeployment,
    Grant {
        principal_id: String,
        scope: String,
    },
    Probe,
    SetRegistryBinding {
        server: String,
        identity: String,
    },
    UpdateImage {
        image: String,
    },
    ListRevisions,
    CopyRevision {
        from_revision: String,
        image: String,
    },
    MergeTags {
        tags: BTreeMap<String, String>,
    },
}

impl Call {
    /// Whether the call changes platform state
    pub fn is_platform_mutation(&self) -> bool {
        matches!(
            self,
            Call::Grant { .. }
                | Call::SetRegistryBinding { .. }
                | Call::UpdateImage { .. }
                | Call::CopyRevision { .. }
                | Call::MergeTags { .. }
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<Call>>>);

impl CallLog {
    fn push(&self, call: Call) {
        self.0.lock().unwrap().push(call);
    }

    pub fn all(&self) -> Vec<Call> {
        self.0.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.0.lock().unwrap().clear();
    }

    pub fn platform_mutations(&self) -> Vec<Call> {
        self.all()
            .into_iter()
            .filter(Call::is_platform_mutation)
            .collect()
    }

    pub fn count(&self, matches: impl Fn(&Call) -> bool) -> usize {
        self.all().iter().filter(|call| matches(call)).count()
    }
}

#[derive(Debug, Clone)]
struct Artifact {
    digest: String,
    tags: Vec<String>,
}

/// Registry holding repositories of artifacts in push order
#[derive(Debug)]
pub struct FakeRegistry {
    domain: String,
    repositories: Mutex<BTreeMap<String, Vec<Artifact>>>,
    labels: Mutex<HashMap<String, String>>,
    calls: CallLog,
    pub fail_queries: AtomicBool,
    pub fail_imports: AtomicBool,
}

impl FakeRegistry {
    pub fn new(domain: &str, calls: CallLog) -> Self {
        Self {
            domain: domain.to_string(),
            repositories: Mutex::new(BTreeMap::new()),
            labels: Mutex::new(HashMap::new()),
            calls,
            fail_queries: AtomicBool::new(false),
            fail_imports: AtomicBool::new(false),
        }
    }

    /// Push `digest` to `repository`, creating the repository if needed
    pub fn push(&self, repository: &str, digest: &str, tags: &[&str]) {
        self.repositories
            .lock()
            .unwrap()
            .entry(repository.to_string())
            .or_default()
            .push(Artifact {
                digest: digest.to_string(),
                tags: tags.iter().map(ToString::to_string).collect(),
            });
    }

    pub fn delete_repository(&self, repository: &str) {
        self.repositories.lock().unwrap().remove(repository);
    }

    pub fn delete_artifact(&self, repository: &str, digest: &str) {
        if let Some(artifacts) = self.repositories.lock().unwrap().get_mut(repository) {
            artifacts.retain(|artifact| artifact.digest != digest);
        }
    }

    pub fn set_label(&self, digest: &str, commit: &str) {
        self.labels
            .lock()
            .unwrap()
            .insert(digest.to_string(), commit.to_string());
    }

    pub fn tags_of(&self, repository: &str, digest: &str) -> Vec<String> {
        self.repositories
            .lock()
            .unwrap()
            .get(repository)
            .and_then(|artifacts| artifacts.iter().find(|a| a.digest == digest))
            .map(|artifact| artifact.tags.clone())
            .unwrap_or_default()
    }

    /// Whether the registry can serve `reference`; what the platform checks on pull
    pub fn can_serve(&self, reference: &ImageReference) -> bool {
        self.repositories
            .lock()
            .unwrap()
            .get(&reference.repository)
            .is_some_and(|artifacts| {
                artifacts
                    .iter()
                    .any(|artifact| Self::matches(artifact, reference.manifest_reference()))
            })
    }

    fn matches(artifact: &Artifact, reference: &str) -> bool {
        artifact.digest == reference || artifact.tags.iter().any(|tag| tag == reference)
    }

    fn check_queries(&self) -> Result<()> {
        if self.fail_queries.load(Ordering::SeqCst) {
            bail!("registry {} unavailable", self.domain);
        }
        Ok(())
    }
}

#[async_trait]
impl ContainerRegistry for FakeRegistry {
    fn domain(&self) -> &str {
        &self.domain
    }

    async fn repository_exists(&self, repository: &str) -> Result<bool> {
        self.calls.push(Call::RepositoryExists {
            repository: repository.to_string(),
        });
        self.check_queries()?;
        Ok(self.repositories.lock().unwrap().contains_key(repository))
    }

    async fn manifest_exists(&self, repository: &str, reference: &str) -> Result<bool> {
        self.calls.push(Call::ManifestExists {
            repository: repository.to_string(),
            reference: reference.to_string(),
        });
        self.check_queries()?;
        let repositories = self.repositories.lock().unwrap();
        let artifacts = repositories
            .get(repository)
            .ok_or_else(|| anyhow!("NAME_UNKNOWN: repository {repository} is not known"))?;
        Ok(artifacts.iter().any(|artifact| Self::matches(artifact, reference)))
    }

    async fn latest_digest(&self, repository: &str) -> Result<Option<String>> {
        self.calls.push(Call::LatestDigest {
            repository: repository.to_string(),
        });
        self.check_queries()?;
        Ok(self
            .repositories
            .lock()
            .unwrap()
            .get(repository)
            .and_then(|artifacts| artifacts.last())
            .map(|artifact| artifact.digest.clone()))
    }

    async fn import_image(
        &self,
        source: &ImportSource,
        target_repository: &str,
        tags: &[String],
    ) -> Result<()> {
        self.calls.push(Call::Import {
            source: source.reference.to_string(),
            repository: target_repository.to_string(),
            tags: tags.to_vec(),
        });
        if self.fail_imports.load(Ordering::SeqCst) {
            bail!("import of {} was denied", source.reference);
        }
        let digest = source
            .reference
            .digest
            .clone()
            .ok_or_else(|| anyhow!("source is not digest-pinned"))?;
        let tags: Vec<&str> = tags.iter().map(String::as_str).collect();
        self.push(target_repository, &digest, &tags);
        Ok(())
    }

    async fn revision_label(&self, _repository: &str, digest: &str) -> Result<Option<String>> {
        self.calls.push(Call::RevisionLabel {
            digest: digest.to_string(),
        });
        self.check_queries()?;
        Ok(self.labels.lock().unwrap().get(digest).cloned())
    }
}

#[derive(Debug)]
struct App {
    state: DeploymentState,
    revisions: Vec<Revision>,
}

/// Hosting platform with at most one app per target
#[derive(Debug)]
pub struct FakePlatform {
    registry: Arc<FakeRegistry>,
    apps: Mutex<HashMap<String, App>>,
    calls: CallLog,
    grant_outcome: Mutex<GrantOutcome>,
    /// Probes report the grant as effective from this attempt on
    effective_after: AtomicU32,
    probes: AtomicU32,
    pub fail_grant: AtomicBool,
    pub fail_merge_tags: AtomicBool,
}

impl FakePlatform {
    pub fn new(registry: Arc<FakeRegistry>, calls: CallLog) -> Self {
        Self {
            registry,
            apps: Mutex::new(HashMap::new()),
            calls,
            grant_outcome: Mutex::new(GrantOutcome::Granted),
            effective_after: AtomicU32::new(1),
            probes: AtomicU32::new(0),
            fail_grant: AtomicBool::new(false),
            fail_merge_tags: AtomicBool::new(false),
        }
    }

    /// Create the target's app running `image` with one revision
    pub fn create_app(&self, target: &ServiceTarget, image: &ImageReference, bound: bool) {
        let registries = if bound {
            vec![RegistryBinding {
                server: target.registry_domain.clone(),
                identity: Some("system".to_string()),
            }]
        } else {
            Vec::new()
        };
        let revision = format!("{}--0000001", target.app_name);
        self.apps.lock().unwrap().insert(
            target.app_name.clone(),
            App {
                state: DeploymentState {
                    image: Some(image.clone()),
                    container_name: target.app_name.clone(),
                    registries,
                    identity: DeploymentIdentity {
                        kind: IdentityKind::PlatformManaged,
                        principal_id: Some(format!("principal-{}", target.app_name)),
                        resource_id: None,
                    },
                    tags: BTreeMap::new(),
                    latest_revision: Some(revision.clone()),
                },
                revisions: vec![Revision {
                    name: revision,
                    created: None,
                    active: true,
                }],
            },
        );
    }

    /// Attach a user-supplied identity; the platform reports it instead of its own
    pub fn attach_user_identity(&self, target: &ServiceTarget, resource_id: &str, principal_id: &str) {
        if let Some(app) = self.apps.lock().unwrap().get_mut(&target.app_name) {
            app.state.identity = DeploymentIdentity {
                kind: IdentityKind::UserSupplied,
                principal_id: Some(principal_id.to_string()),
                resource_id: Some(resource_id.to_string()),
            };
        }
    }

    pub fn state(&self, target: &ServiceTarget) -> Option<DeploymentState> {
        self.apps
            .lock()
            .unwrap()
            .get(&target.app_name)
            .map(|app| app.state.clone())
    }

    pub fn deployed_image(&self, target: &ServiceTarget) -> Option<ImageReference> {
        self.state(target).and_then(|state| state.image)
    }

    pub fn set_tag(&self, target: &ServiceTarget, key: &str, value: &str) {
        if let Some(app) = self.apps.lock().unwrap().get_mut(&target.app_name) {
            app.state.tags.insert(key.to_string(), value.to_string());
        }
    }

    pub fn clear_revisions(&self, target: &ServiceTarget) {
        if let Some(app) = self.apps.lock().unwrap().get_mut(&target.app_name) {
            app.revisions.clear();
            app.state.latest_revision = None;
        }
    }

    pub fn set_grant_outcome(&self, outcome: GrantOutcome) {
        *self.grant_outcome.lock().unwrap() = outcome;
    }

    pub fn set_effective_after(&self, attempts: u32) {
        self.effective_after.store(attempts, Ordering::SeqCst);
    }

    pub fn probes(&self) -> u32 {
        self.probes.load(Ordering::SeqCst)
    }

    /// Pull validation for one image of `app`
    fn validate_pull(&self, app: &App, image: &ImageReference) -> Result<()> {
        if !image.is_hosted_by(self.registry.domain()) {
            return Ok(());
        }
        if !app
            .state
            .registry_binding_present(self.registry.domain())
        {
            bail!(
                "InvalidParameterValueInContainerTemplate: registry {} is not configured",
                self.registry.domain()
            );
        }
        if !self.registry.can_serve(image) {
            bail!("InvalidParameterValueInContainerTemplate: unable to pull image {image}");
        }
        Ok(())
    }

    fn apply_image(app: &mut App, image: &ImageReference) {
        let name = format!(
            "{}--{:07}",
            app.state.container_name,
            app.revisions.len() + 1
        );
        app.state.image = Some(image.clone());
        app.state.latest_revision = Some(name.clone());
        for revision in &mut app.revisions {
            revision.active = false;
        }
        app.revisions.push(Revision {
            name,
            created: None,
            active: true,
        });
    }
}

#[async_trait]
impl DeploymentPlatform for FakePlatform {
    async fn get_deployment(&self, target: &ServiceTarget) -> Result<Option<DeploymentState>> {
        self.calls.push(Call::GetDeployment);
        Ok(self.state(target))
    }

    async fn grant_pull_permission(
        &self,
        principal_id: &str,
        registry_scope: &str,
    ) -> Result<GrantOutcome> {
        self.calls.push(Call::Grant {
            principal_id: principal_id.to_string(),
            scope: registry_scope.to_string(),
        });
        if self.fail_grant.load(Ordering::SeqCst) {
            bail!("AuthorizationFailed: caller cannot write role assignments");
        }
        Ok(*self.grant_outcome.lock().unwrap())
    }

    async fn pull_permission_effective(
        &self,
        _principal_id: &str,
        _registry_scope: &str,
    ) -> Result<bool> {
        self.calls.push(Call::Probe);
        let attempt = self.probes.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(attempt >= self.effective_after.load(Ordering::SeqCst))
    }

    async fn set_registry_binding(
        &self,
        target: &ServiceTarget,
        server: &str,
        identity: &str,
    ) -> Result<()> {
        self.calls.push(Call::SetRegistryBinding {
            server: server.to_string(),
            identity: identity.to_string(),
        });
        let mut apps = self.apps.lock().unwrap();
        let app = apps
            .get_mut(&target.app_name)
            .ok_or_else(|| anyhow!("ResourceNotFound: {}", target.app_name))?;
        app.state
            .registries
            .retain(|binding| !binding.server.eq_ignore_ascii_case(server));
        app.state.registries.push(RegistryBinding {
            server: server.to_string(),
            identity: Some(identity.to_string()),
        });
        Ok(())
    }

    async fn update_image(
        &self,
        target: &ServiceTarget,
        _container_name: &str,
        image: &ImageReference,
    ) -> Result<()> {
        self.calls.push(Call::UpdateImage {
            image: image.to_string(),
        });
        let mut apps = self.apps.lock().unwrap();
        let app = apps
            .get_mut(&target.app_name)
            .ok_or_else(|| anyhow!("ResourceNotFound: {}", target.app_name))?;
        if let Some(current) = app.state.image.clone() {
            self.validate_pull(app, &current)?;
        }
        self.validate_pull(app, image)?;
        Self::apply_image(app, image);
        Ok(())
    }

    async fn list_revisions(&self, target: &ServiceTarget) -> Result<Vec<Revision>> {
        self.calls.push(Call::ListRevisions);
        Ok(self
            .apps
            .lock()
            .unwrap()
            .get(&target.app_name)
            .map(|app| app.revisions.clone())
            .unwrap_or_default())
    }

    async fn copy_revision(
        &self,
        target: &ServiceTarget,
        from_revision: &str,
        _container_name: &str,
        image: &ImageReference,
    ) -> Result<()> {
        self.calls.push(Call::CopyRevision {
            from_revision: from_revision.to_string(),
            image: image.to_string(),
        });
        let mut apps = self.apps.lock().unwrap();
        let app = apps
            .get_mut(&target.app_name)
            .ok_or_else(|| anyhow!("ResourceNotFound: {}", target.app_name))?;
        if !app.revisions.iter().any(|r| r.name == from_revision) {
            bail!("ResourceNotFound: revision {from_revision}");
        }
        self.validate_pull(app, image)?;
        Self::apply_image(app, image);
        Ok(())
    }

    async fn merge_tags(
        &self,
        target: &ServiceTarget,
        tags: &BTreeMap<String, String>,
    ) -> Result<()> {
        self.calls.push(Call::MergeTags { tags: tags.clone() });
        if self.fail_merge_tags.load(Ordering::SeqCst) {
            bail!("AuthorizationFailed: cannot write tags");
        }
        let mut apps = self.apps.lock().unwrap();
        let app = apps
            .get_mut(&target.app_name)
            .ok_or_else(|| anyhow!("ResourceNotFound: {}", target.app_name))?;
        app.state.tags.extend(tags.clone());
        Ok(())
    }
}

/// Key/value store kept in memory
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    values: Mutex<BTreeMap<String, String>>,
    pub fail_writes: AtomicBool,
}

impl MemoryConfigStore {
    pub fn insert(&self, key: &str, value: &str) {
        self.values
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
    }

    pub fn value(&self, key: &str) -> Option<String> {
        self.values.lock().unwrap().get(key).cloned()
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.value(key))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            bail!("config store is read-only");
        }
        self.insert(key, value);
        Ok(())
    }
}

/// One environment wired to fakes: registry `acme{name}.azurecr.io`, namespace and
/// service prefix `acme`
pub struct TestEnvironment {
    pub calls: CallLog,
    pub registry: Arc<FakeRegistry>,
    pub platform: Arc<FakePlatform>,
    pub store: Arc<MemoryConfigStore>,
    pub context: EnvironmentContext,
}

impl TestEnvironment {
    pub fn new(name: &str) -> Self {
        let calls = CallLog::default();
        let config = EnvironmentConfig {
            environment: name.to_string(),
            subscription_id: "00000000-0000-0000-0000-000000000001".to_string(),
            resource_group: format!("rg-acme-{name}"),
            registry_name: format!("acme{name}"),
            registry_resource_group: format!("rg-acme-{name}"),
            registry_domain: format!("acme{name}.azurecr.io"),
            registry_namespace: "acme".to_string(),
            service_prefix: Some("acme".to_string()),
            identity_kind: IdentityKind::PlatformManaged,
            user_identity_id: None,
        };
        let registry = Arc::new(FakeRegistry::new(
            &config.registry_domain,
            calls.clone(),
        ));
        let platform = Arc::new(FakePlatform::new(Arc::clone(&registry), calls.clone()));
        let store = Arc::new(MemoryConfigStore::default());

        let context = EnvironmentContext {
            config,
            registry: registry.clone(),
            platform: platform.clone(),
            store: store.clone(),
        };

        Self {
            calls,
            registry,
            platform,
            store,
            context,
        }
    }

    pub fn target(&self) -> ServiceTarget {
        self.context.config.target(SERVICE_KEY).unwrap()
    }

    /// The service's repository in this environment's registry
    pub fn repository(&self) -> String {
        self.target().registry_repository
    }

    /// Digest-pinned reference to the service's repository in this environment
    pub fn image(&self, digest: &str) -> ImageReference {
        ImageReference::with_digest(
            &self.context.config.registry_domain,
            self.repository(),
            digest,
        )
    }

    pub fn push(&self, digest: &str) {
        self.registry.push(&self.repository(), digest, &[]);
    }

    pub fn registry_scope(&self) -> String {
        self.context.config.registry_resource_id()
    }
}

pub fn placeholder() -> ImageReference {
    ImageReference::parse(DEFAULT_PLACEHOLDER_IMAGE).unwrap()
}

/// Deployer waiting a fixed [`PROPAGATION_DELAY`] after new grants
pub fn deployer() -> Deployer {
    Deployer::new(
        Arc::new(FixedDelay::new(PROPAGATION_DELAY)),
        placeholder(),
    )
}
