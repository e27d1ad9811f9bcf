//! GCP cloud context: a project owned by the workspace, with the workspace's policy groups
//! bound onto the project IAM.

use super::CloudContextService;
use crate::cloud::{group_member, ignore_not_found, project_role, GcpClient};
use crate::dao::CloudContextDao;
use crate::error::{OrchestratorError, Result};
use crate::flight::{FlightContext, FlightMap, FlightPlan, RetryRule, Step, StepResult};
use crate::iam::{BrokerResourceRef, IdentityBroker, ServiceIdentity, WsmIamRole};
use crate::keys;
use crate::model::{CloudContext, CloudPlatform, GcpCloudContext, GcpPolicyGroups};
use async_trait::async_trait;
use rand::Rng;
use std::sync::Arc;
use tracing::info;

const PROJECT_ID_PREFIX: &str = "terra-";
const PROJECT_SUFFIX_LEN: usize = 12;
const PROJECT_ID_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

pub struct GcpContextService {
    dao: CloudContextDao,
    gcp: Arc<dyn GcpClient>,
    broker: Arc<dyn IdentityBroker>,
    service_identity: ServiceIdentity,
    default_zone: Option<String>,
}

impl GcpContextService {
    pub fn new(
        dao: CloudContextDao,
        gcp: Arc<dyn GcpClient>,
        broker: Arc<dyn IdentityBroker>,
        service_identity: ServiceIdentity,
        default_zone: Option<String>,
    ) -> Self {
        Self {
            dao,
            gcp,
            broker,
            service_identity,
            default_zone,
        }
    }
}

#[async_trait]
impl CloudContextService for GcpContextService {
    fn platform(&self) -> CloudPlatform {
        CloudPlatform::Gcp
    }

    fn dao(&self) -> &CloudContextDao {
        &self.dao
    }

    fn add_create_steps(&self, plan: &mut FlightPlan, _inputs: &FlightMap) -> Result<()> {
        plan.add_step(GenerateProjectIdStep, RetryRule::None);
        plan.add_step(
            CreateGcpProjectStep {
                gcp: self.gcp.clone(),
            },
            RetryRule::cloud_long(),
        );
        plan.add_step(
            SyncWorkspacePolicyGroupsStep {
                broker: self.broker.clone(),
                service_identity: self.service_identity.clone(),
            },
            RetryRule::broker(),
        );
        plan.add_step(
            GcpCloudSyncStep {
                gcp: self.gcp.clone(),
            },
            RetryRule::cloud(),
        );
        plan.add_step(
            SetGcpContextStep {
                default_zone: self.default_zone.clone(),
            },
            RetryRule::None,
        );
        Ok(())
    }

    fn add_delete_steps(&self, plan: &mut FlightPlan, _inputs: &FlightMap) -> Result<()> {
        plan.add_step(
            DeleteGcpProjectStep {
                gcp: self.gcp.clone(),
            },
            RetryRule::cloud_long(),
        );
        Ok(())
    }
}

fn generate_project_id() -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..PROJECT_SUFFIX_LEN)
        .map(|_| PROJECT_ID_ALPHABET[rng.random_range(0..PROJECT_ID_ALPHABET.len())] as char)
        .collect();
    format!("{}{}", PROJECT_ID_PREFIX, suffix)
}

/// Pick the project id once; reruns reuse the id stored in the working map.
struct GenerateProjectIdStep;

#[async_trait]
impl Step for GenerateProjectIdStep {
    async fn execute(&self, ctx: &mut FlightContext) -> StepResult {
        if !ctx.working().contains(&keys::GCP_PROJECT_ID) {
            ctx.working_mut().put(&keys::GCP_PROJECT_ID, &generate_project_id())?;
        }
        Ok(())
    }

    async fn compensate(&self, _ctx: &mut FlightContext) -> StepResult {
        Ok(())
    }
}

struct CreateGcpProjectStep {
    gcp: Arc<dyn GcpClient>,
}

#[async_trait]
impl Step for CreateGcpProjectStep {
    async fn execute(&self, ctx: &mut FlightContext) -> StepResult {
        let project_id = ctx.working().require(&keys::GCP_PROJECT_ID)?;
        if self.gcp.get_project(&project_id).await?.is_some() {
            info!("Project {} already exists", project_id);
            return Ok(());
        }

        ctx.check_interrupted()?;
        match self.gcp.create_project(&project_id).await {
            Ok(()) => {}
            // Our own earlier attempt landed after the probe.
            Err(OrchestratorError::DuplicateResource(_)) => {}
            Err(e) => return Err(e.into()),
        }
        info!("Created project {}", project_id);
        Ok(())
    }

    async fn compensate(&self, ctx: &mut FlightContext) -> StepResult {
        let Some(project_id) = ctx.working().get(&keys::GCP_PROJECT_ID)? else {
            return Ok(());
        };
        ignore_not_found(self.gcp.delete_project(&project_id).await)?;
        info!("Deleted project {}", project_id);
        Ok(())
    }
}

/// Ask the broker for the group behind each workspace role.
struct SyncWorkspacePolicyGroupsStep {
    broker: Arc<dyn IdentityBroker>,
    service_identity: ServiceIdentity,
}

impl SyncWorkspacePolicyGroupsStep {
    async fn sync(&self, workspace: &BrokerResourceRef, role: WsmIamRole) -> Result<String> {
        self.broker
            .sync_policy_to_group(self.service_identity.token(), workspace, role.as_str())
            .await
    }
}

#[async_trait]
impl Step for SyncWorkspacePolicyGroupsStep {
    async fn execute(&self, ctx: &mut FlightContext) -> StepResult {
        let workspace_id = ctx.inputs().require(&keys::WORKSPACE_ID)?;
        let workspace = BrokerResourceRef::workspace(workspace_id);

        let owner = self.sync(&workspace, WsmIamRole::Owner).await?;
        ctx.check_interrupted()?;
        let writer = self.sync(&workspace, WsmIamRole::Writer).await?;
        ctx.check_interrupted()?;
        let reader = self.sync(&workspace, WsmIamRole::Reader).await?;
        ctx.check_interrupted()?;
        let application = self.sync(&workspace, WsmIamRole::Application).await?;

        let groups = GcpPolicyGroups {
            owner,
            writer,
            reader,
            application,
        };
        ctx.working_mut().put(&keys::GCP_POLICY_GROUPS, &groups)?;
        Ok(())
    }

    async fn compensate(&self, _ctx: &mut FlightContext) -> StepResult {
        Ok(())
    }
}

/// Bind the workspace groups onto the project's IAM policy.
///
/// The undo is a no-op: deleting the project drops its policy.
struct GcpCloudSyncStep {
    gcp: Arc<dyn GcpClient>,
}

#[async_trait]
impl Step for GcpCloudSyncStep {
    async fn execute(&self, ctx: &mut FlightContext) -> StepResult {
        let project_id = ctx.working().require(&keys::GCP_PROJECT_ID)?;
        let groups = ctx.working().require(&keys::GCP_POLICY_GROUPS)?;

        let mut policy = self.gcp.get_project_iam_policy(&project_id).await?;
        let mut changed = false;
        for (role, group) in [
            (WsmIamRole::Owner, &groups.owner),
            (WsmIamRole::Writer, &groups.writer),
            (WsmIamRole::Reader, &groups.reader),
            (WsmIamRole::Application, &groups.application),
        ] {
            changed |= policy.add_binding(&project_role(role, &project_id)?, &group_member(group));
        }

        if !changed {
            return Ok(());
        }
        ctx.check_interrupted()?;
        match self.gcp.set_project_iam_policy(&project_id, &policy).await {
            Ok(()) => Ok(()),
            Err(OrchestratorError::DuplicateResource(msg)) => {
                Err(OrchestratorError::RetryableRemote(format!("project policy changed underneath us: {}", msg)).into())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn compensate(&self, _ctx: &mut FlightContext) -> StepResult {
        Ok(())
    }
}

struct SetGcpContextStep {
    default_zone: Option<String>,
}

#[async_trait]
impl Step for SetGcpContextStep {
    async fn execute(&self, ctx: &mut FlightContext) -> StepResult {
        let context = CloudContext::Gcp(GcpCloudContext {
            project_id: ctx.working().require(&keys::GCP_PROJECT_ID)?,
            default_zone: self.default_zone.clone(),
            policy_groups: Some(ctx.working().require(&keys::GCP_POLICY_GROUPS)?),
        });
        ctx.working_mut().put(&keys::CLOUD_CONTEXT, &context)?;
        Ok(())
    }

    async fn compensate(&self, _ctx: &mut FlightContext) -> StepResult {
        Ok(())
    }
}

struct DeleteGcpProjectStep {
    gcp: Arc<dyn GcpClient>,
}

#[async_trait]
impl Step for DeleteGcpProjectStep {
    async fn execute(&self, ctx: &mut FlightContext) -> StepResult {
        let Some(context) = ctx.working().get(&keys::CLOUD_CONTEXT)? else {
            info!("No GCP context was ever finished; nothing to tear down");
            return Ok(());
        };
        let gcp = context
            .as_gcp()
            .ok_or_else(|| OrchestratorError::InternalLogic(format!("expected a GCP context, got {}", context.platform())))?;

        ignore_not_found(self.gcp.delete_project(&gcp.project_id).await)?;
        info!("Deleted project {}", gcp.project_id);
        Ok(())
    }

    async fn compensate(&self, _ctx: &mut FlightContext) -> StepResult {
        Ok(())
    }
}
