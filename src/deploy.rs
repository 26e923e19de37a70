use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::config::{ConfigStore, EnvPointer, Environments};
use crate::error::{Error, Result};
use crate::locks::ProjectLocks;
use crate::remote::{Deployment, ScriptService, Version};

/// Provider cap on stored versions, and the thresholds where status starts
/// warning about it.
const VERSION_LIMIT: usize = 200;
const VERSION_WARN_AT: usize = 150;
const VERSION_CRITICAL_AT: usize = 190;

const URL_RETRY_DELAYS: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(4),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvSlot {
    Dev,
    Staging,
    Prod,
}

impl EnvSlot {
    pub const ALL: [EnvSlot; 3] = [EnvSlot::Dev, EnvSlot::Staging, EnvSlot::Prod];

    pub fn marker(self) -> &'static str {
        match self {
            EnvSlot::Dev => "[DEV]",
            EnvSlot::Staging => "[STAGING]",
            EnvSlot::Prod => "[PROD]",
        }
    }

    pub fn of_description(description: &str) -> Option<EnvSlot> {
        let trimmed = description.trim_start();
        EnvSlot::ALL
            .into_iter()
            .find(|slot| trimmed.starts_with(slot.marker()))
    }
}

fn find_slot<'a>(deployments: &'a [Deployment], slot: EnvSlot) -> Option<&'a Deployment> {
    deployments
        .iter()
        .find(|d| EnvSlot::of_description(&d.description) == Some(slot))
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotStatus {
    pub environment: EnvSlot,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployment: Option<Deployment>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployStatus {
    pub slots: Vec<SlotStatus>,
    pub total_versions: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub highest_version: Option<u32>,
    pub prod_version_count: usize,
    pub version_limit: usize,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetOutcome {
    pub status: String,
    pub deployments: Vec<Deployment>,
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_warning: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromoteOutcome {
    pub from: EnvSlot,
    pub to: EnvSlot,
    pub version_number: u32,
    pub deployment_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_warning: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackOutcome {
    pub deployment_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_version: Option<u32>,
    pub to_version: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_warning: Option<String>,
}

/// Manages the three logical environments of a project, encoded as bracket
/// markers in deployment descriptions. At most one deployment per marker is
/// canonical. Reset is transactional (create-before-delete) and serialized
/// per scriptId; the other operations run concurrently.
pub struct DeploymentManager {
    remote: Arc<dyn ScriptService>,
    config: Arc<ConfigStore>,
    locks: Arc<ProjectLocks>,
}

impl DeploymentManager {
    pub fn new(
        remote: Arc<dyn ScriptService>,
        config: Arc<ConfigStore>,
        locks: Arc<ProjectLocks>,
    ) -> Self {
        Self {
            remote,
            config,
            locks,
        }
    }

    pub async fn status(&self, script_id: &str) -> Result<DeployStatus> {
        let deployments = self.remote.list_deployments(script_id).await?;
        let versions = self.remote.list_versions(script_id).await?;
        let slots = EnvSlot::ALL
            .into_iter()
            .map(|slot| SlotStatus {
                environment: slot,
                deployment: find_slot(&deployments, slot).cloned(),
            })
            .collect();
        let total_versions = versions.len();
        let highest_version = versions.iter().map(|v| v.version_number).max();
        let prod_version_count = self.prod_version_count(script_id, &versions);
        let warnings = version_warnings(total_versions);
        Ok(DeployStatus {
            slots,
            total_versions,
            highest_version,
            prod_version_count,
            version_limit: VERSION_LIMIT,
            warnings,
        })
    }

    fn prod_version_count(&self, script_id: &str, versions: &[Version]) -> usize {
        let mut tagged: Vec<u32> = versions
            .iter()
            .filter(|v| {
                v.description
                    .as_deref()
                    .map(|d| EnvSlot::of_description(d) == Some(EnvSlot::Prod))
                    .unwrap_or(false)
            })
            .map(|v| v.version_number)
            .collect();
        if let Ok(cfg) = self.config.load() {
            if let Some((_, entry)) = cfg.project_by_script_id(script_id) {
                if let Some(prod) = entry.environments.as_ref().and_then(|e| e.prod.as_ref()) {
                    tagged.extend(prod.history.iter().copied());
                }
            }
        }
        tagged.sort_unstable();
        tagged.dedup();
        tagged.len()
    }

    /// Transactional reset: create the three fresh HEAD-tracking web-app
    /// deployments first, and only then delete the old ones. The project is
    /// never observable with zero deployments: a partial create rolls the
    /// new ones back, and deletion failures degrade the result to partial.
    pub async fn reset(&self, script_id: &str) -> Result<ResetOutcome> {
        let _guard = self.locks.lock(script_id).await;

        let old = self.remote.list_deployments(script_id).await?;
        let mut created: Vec<Deployment> = Vec::new();
        for slot in EnvSlot::ALL {
            match self
                .remote
                .create_deployment(script_id, slot.marker(), None)
                .await
            {
                Ok(deployment) => created.push(deployment),
                Err(err) => {
                    for deployment in &created {
                        if let Err(cleanup_err) = self
                            .remote
                            .delete_deployment(script_id, &deployment.deployment_id)
                            .await
                        {
                            tracing::warn!(
                                deployment = %deployment.deployment_id,
                                %cleanup_err,
                                "rollback of freshly created deployment failed"
                            );
                        }
                    }
                    return Err(err);
                }
            }
        }

        // Web-app URLs are not immediately available after create.
        for deployment in &mut created {
            if deployment.web_app_url.is_none() {
                *deployment = self
                    .await_web_app_url(script_id, deployment.clone())
                    .await;
            }
        }

        let created_ids: Vec<&str> = created.iter().map(|d| d.deployment_id.as_str()).collect();
        let mut warnings = Vec::new();
        for deployment in &old {
            if created_ids.contains(&deployment.deployment_id.as_str()) {
                continue;
            }
            if let Err(err) = self
                .remote
                .delete_deployment(script_id, &deployment.deployment_id)
                .await
            {
                warnings.push(format!(
                    "failed to delete old deployment {}: {err}",
                    deployment.deployment_id
                ));
            }
        }

        let config_warning = self
            .record_environments(script_id, &created)
            .await
            .err()
            .map(|err| format!("deployments are live but the config update failed: {err}"));

        Ok(ResetOutcome {
            status: if warnings.is_empty() {
                "success".to_string()
            } else {
                "partial".to_string()
            },
            deployments: created,
            warnings,
            config_warning,
        })
    }

    async fn await_web_app_url(&self, script_id: &str, mut deployment: Deployment) -> Deployment {
        for delay in URL_RETRY_DELAYS {
            tokio::time::sleep(delay).await;
            match self
                .remote
                .get_deployment(script_id, &deployment.deployment_id)
                .await
            {
                Ok(fresh) if fresh.web_app_url.is_some() => return fresh,
                Ok(_) => {}
                Err(err) => {
                    tracing::debug!(
                        deployment = %deployment.deployment_id,
                        %err,
                        "web app url refetch failed"
                    );
                }
            }
        }
        deployment.web_app_url = None;
        deployment
    }

    /// dev→staging snapshots HEAD into a new version and points staging at
    /// it; staging→prod points prod at staging's current version.
    pub async fn promote(
        &self,
        script_id: &str,
        to: EnvSlot,
        description: Option<&str>,
    ) -> Result<PromoteOutcome> {
        let deployments = self.remote.list_deployments(script_id).await?;
        match to {
            EnvSlot::Staging => {
                let description = description
                    .map(str::trim)
                    .filter(|d| !d.is_empty())
                    .ok_or_else(|| {
                        Error::validation("promotion to staging requires a non-empty description")
                    })?;
                let staging = find_slot(&deployments, EnvSlot::Staging).ok_or_else(|| {
                    Error::validation(
                        "no [STAGING] deployment exists; run deploy_config reset first",
                    )
                })?;
                let tagged = format!("{} {description}", EnvSlot::Staging.marker());
                let version = self.remote.create_version(script_id, &tagged).await?;
                let updated = self
                    .remote
                    .update_deployment(
                        script_id,
                        &staging.deployment_id,
                        &tagged,
                        Some(version.version_number),
                    )
                    .await?;
                let config_warning = self
                    .record_pointer(script_id, EnvSlot::Staging, &updated, false)
                    .await
                    .err()
                    .map(|err| format!("staging promoted but the config update failed: {err}"));
                Ok(PromoteOutcome {
                    from: EnvSlot::Dev,
                    to: EnvSlot::Staging,
                    version_number: version.version_number,
                    deployment_id: updated.deployment_id,
                    config_warning,
                })
            }
            EnvSlot::Prod => {
                let staging = find_slot(&deployments, EnvSlot::Staging).ok_or_else(|| {
                    Error::validation("no [STAGING] deployment exists to promote from")
                })?;
                let version_number = staging.version_number.ok_or_else(|| {
                    Error::validation(
                        "staging tracks HEAD; promote dev→staging first to pin a version",
                    )
                })?;
                let prod = find_slot(&deployments, EnvSlot::Prod).ok_or_else(|| {
                    Error::validation("no [PROD] deployment exists; run deploy_config reset first")
                })?;
                let description = format!(
                    "{} promoted from staging v{version_number}",
                    EnvSlot::Prod.marker()
                );
                let updated = self
                    .remote
                    .update_deployment(
                        script_id,
                        &prod.deployment_id,
                        &description,
                        Some(version_number),
                    )
                    .await?;
                let config_warning = self
                    .record_pointer(script_id, EnvSlot::Prod, &updated, true)
                    .await
                    .err()
                    .map(|err| format!("prod promoted but the config update failed: {err}"));
                Ok(PromoteOutcome {
                    from: EnvSlot::Staging,
                    to: EnvSlot::Prod,
                    version_number,
                    deployment_id: updated.deployment_id,
                    config_warning,
                })
            }
            EnvSlot::Dev => Err(Error::validation("dev is not a promotion target")),
        }
    }

    /// Roll prod back to an explicit version, or to the version immediately
    /// preceding the current one in the recorded prod history.
    pub async fn rollback(
        &self,
        script_id: &str,
        to_version: Option<u32>,
    ) -> Result<RollbackOutcome> {
        let deployments = self.remote.list_deployments(script_id).await?;
        let prod = find_slot(&deployments, EnvSlot::Prod)
            .ok_or_else(|| Error::validation("no [PROD] deployment exists"))?;
        let current = prod.version_number;
        let target = match to_version {
            Some(v) => v,
            None => {
                let current = current.ok_or_else(|| {
                    Error::validation("prod tracks HEAD; nothing to roll back from")
                })?;
                self.previous_prod_version(script_id, current)
                    .await?
                    .ok_or_else(|| {
                        Error::validation(format!(
                            "no prod version precedes v{current}; pass an explicit toVersion"
                        ))
                    })?
            }
        };
        let description = format!("{} rollback to v{target}", EnvSlot::Prod.marker());
        let updated = self
            .remote
            .update_deployment(script_id, &prod.deployment_id, &description, Some(target))
            .await?;
        let config_warning = self
            .record_pointer(script_id, EnvSlot::Prod, &updated, false)
            .await
            .err()
            .map(|err| format!("rollback applied but the config update failed: {err}"));
        Ok(RollbackOutcome {
            deployment_id: updated.deployment_id,
            from_version: current,
            to_version: target,
            config_warning,
        })
    }

    /// The prod history comes from the config registry; when the registry is
    /// empty (fresh config) fall back to versions carrying the [PROD] marker.
    async fn previous_prod_version(&self, script_id: &str, current: u32) -> Result<Option<u32>> {
        let mut history: Vec<u32> = Vec::new();
        let cfg = self.config.load()?;
        if let Some((_, entry)) = cfg.project_by_script_id(script_id) {
            if let Some(prod) = entry.environments.as_ref().and_then(|e| e.prod.as_ref()) {
                history.extend(prod.history.iter().copied());
            }
        }
        if history.is_empty() {
            let versions = self.remote.list_versions(script_id).await?;
            history.extend(
                versions
                    .iter()
                    .filter(|v| {
                        v.description
                            .as_deref()
                            .map(|d| EnvSlot::of_description(d) == Some(EnvSlot::Prod))
                            .unwrap_or(false)
                    })
                    .map(|v| v.version_number),
            );
        }
        history.sort_unstable();
        history.dedup();
        Ok(history.into_iter().rev().find(|v| *v < current))
    }

    async fn record_environments(&self, script_id: &str, created: &[Deployment]) -> Result<()> {
        let script_id = script_id.to_string();
        let created = created.to_vec();
        self.config
            .update("deploy reset", move |cfg| {
                let Some((name, _)) = cfg.project_by_script_id(&script_id) else {
                    return Err(Error::validation(format!(
                        "scriptId {script_id} is not in the project catalog"
                    )));
                };
                let name = name.clone();
                let entry = cfg.projects.get_mut(&name).expect("entry exists");
                let envs = entry.environments.get_or_insert_with(Environments::default);
                for (slot, deployment) in EnvSlot::ALL.iter().zip(created.iter()) {
                    let pointer = EnvPointer {
                        deployment_id: deployment.deployment_id.clone(),
                        version_number: deployment.version_number,
                        web_app_url: deployment.web_app_url.clone(),
                        updated_at: Some(chrono::Utc::now().to_rfc3339()),
                        history: Vec::new(),
                    };
                    match slot {
                        EnvSlot::Dev => envs.dev = Some(pointer),
                        EnvSlot::Staging => envs.staging = Some(pointer),
                        EnvSlot::Prod => envs.prod = Some(pointer),
                    }
                }
                Ok(())
            })
            .await
    }

    async fn record_pointer(
        &self,
        script_id: &str,
        slot: EnvSlot,
        deployment: &Deployment,
        append_history: bool,
    ) -> Result<()> {
        let script_id = script_id.to_string();
        let deployment = deployment.clone();
        self.config
            .update("deploy pointer", move |cfg| {
                let Some((name, _)) = cfg.project_by_script_id(&script_id) else {
                    return Err(Error::validation(format!(
                        "scriptId {script_id} is not in the project catalog"
                    )));
                };
                let name = name.clone();
                let entry = cfg.projects.get_mut(&name).expect("entry exists");
                let envs = entry.environments.get_or_insert_with(Environments::default);
                let pointer = match slot {
                    EnvSlot::Dev => envs.dev.get_or_insert_with(EnvPointer::default),
                    EnvSlot::Staging => envs.staging.get_or_insert_with(EnvPointer::default),
                    EnvSlot::Prod => envs.prod.get_or_insert_with(EnvPointer::default),
                };
                pointer.deployment_id = deployment.deployment_id.clone();
                pointer.version_number = deployment.version_number;
                pointer.web_app_url = deployment.web_app_url.clone();
                pointer.updated_at = Some(chrono::Utc::now().to_rfc3339());
                if append_history {
                    if let Some(v) = deployment.version_number {
                        if pointer.history.last() != Some(&v) {
                            pointer.history.push(v);
                        }
                    }
                }
                Ok(())
            })
            .await
    }
}

fn version_warnings(total: usize) -> Vec<String> {
    let mut warnings = Vec::new();
    if total >= VERSION_CRITICAL_AT {
        warnings.push(format!(
            "critical: {total} of {VERSION_LIMIT} versions used; delete old versions now"
        ));
    } else if total >= VERSION_WARN_AT {
        warnings.push(format!(
            "warning: {total} of {VERSION_LIMIT} versions used"
        ));
    }
    warnings
}
