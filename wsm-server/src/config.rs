use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;
use wsm_orchestrator::model::AwsCloudContext;
use wsm_orchestrator::{ManagerOptions, StateRule};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default = "default_broker_url")]
    pub broker_url: String,

    #[serde(default = "default_service_token")]
    pub service_token: Option<String>,

    #[serde(default = "default_gcp_access_token")]
    pub gcp_access_token: Option<String>,

    #[serde(default = "default_azure_access_token")]
    pub azure_access_token: Option<String>,

    #[serde(default = "default_janitor_interval")]
    pub janitor_interval_secs: u64,

    #[serde(default = "default_flight_retention_days")]
    pub flight_retention_days: i64,

    #[serde(default = "default_aws_environment")]
    pub aws_environment: Option<AwsCloudContext>,

    #[serde(default = "default_gcp_zone")]
    pub gcp_default_zone: Option<String>,

    #[serde(default = "default_state_rule")]
    pub state_rule: Option<StateRule>,

    #[serde(default = "default_flight_timeout")]
    pub flight_timeout_secs: u64,
}

fn env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn default_db_path() -> PathBuf {
    if let Some(path) = env("WSM_DB_PATH") {
        return PathBuf::from(path);
    }

    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".wsm").join("wsm.db")
}

fn default_broker_url() -> String {
    env("WSM_BROKER_URL").unwrap_or_else(|| "http://localhost:8080".to_string())
}

fn default_service_token() -> Option<String> {
    env("WSM_SERVICE_TOKEN")
}

fn default_gcp_access_token() -> Option<String> {
    env("WSM_GCP_ACCESS_TOKEN")
}

fn default_azure_access_token() -> Option<String> {
    env("WSM_AZURE_ACCESS_TOKEN")
}

fn default_janitor_interval() -> u64 {
    env("WSM_JANITOR_INTERVAL")
        .and_then(|s| s.parse().ok())
        .unwrap_or(300) // 5 minutes
}

fn default_flight_retention_days() -> i64 {
    env("WSM_FLIGHT_RETENTION_DAYS")
        .and_then(|s| s.parse().ok())
        .unwrap_or(14)
}

fn default_aws_environment() -> Option<AwsCloudContext> {
    aws_environment_from(env)
}

fn default_gcp_zone() -> Option<String> {
    env("WSM_GCP_DEFAULT_ZONE")
}

fn default_state_rule() -> Option<StateRule> {
    state_rule_from(env("WSM_STATE_RULE").as_deref())
}

fn default_flight_timeout() -> u64 {
    env("WSM_FLIGHT_TIMEOUT")
        .and_then(|s| s.parse().ok())
        .unwrap_or(300)
}

/// All four `WSM_AWS_*` variables, or no AWS environment at all.
pub fn aws_environment_from(lookup: impl Fn(&str) -> Option<String>) -> Option<AwsCloudContext> {
    let organization_id = lookup("WSM_AWS_ORGANIZATION_ID");
    let account_id = lookup("WSM_AWS_ACCOUNT_ID");
    let tenant_alias = lookup("WSM_AWS_TENANT_ALIAS");
    let environment_alias = lookup("WSM_AWS_ENVIRONMENT_ALIAS");

    match (organization_id, account_id, tenant_alias, environment_alias) {
        (Some(organization_id), Some(account_id), Some(tenant_alias), Some(environment_alias)) => Some(AwsCloudContext {
            organization_id,
            account_id,
            tenant_alias,
            environment_alias,
        }),
        (None, None, None, None) => None,
        _ => {
            warn!("Incomplete WSM_AWS_* settings; AWS cloud contexts are disabled");
            None
        }
    }
}

/// An unparseable rule falls back to each resource type's own rule.
pub fn state_rule_from(raw: Option<&str>) -> Option<StateRule> {
    let raw = raw?;
    match raw.parse() {
        Ok(rule) => Some(rule),
        Err(e) => {
            warn!("Ignoring WSM_STATE_RULE: {}", e);
            None
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            broker_url: default_broker_url(),
            service_token: default_service_token(),
            gcp_access_token: default_gcp_access_token(),
            azure_access_token: default_azure_access_token(),
            janitor_interval_secs: default_janitor_interval(),
            flight_retention_days: default_flight_retention_days(),
            aws_environment: default_aws_environment(),
            gcp_default_zone: default_gcp_zone(),
            state_rule: default_state_rule(),
            flight_timeout_secs: default_flight_timeout(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::default()
    }

    pub fn manager_options(&self) -> ManagerOptions {
        ManagerOptions {
            gcp_default_zone: self.gcp_default_zone.clone(),
            aws_environment: self.aws_environment.clone(),
            state_rule_override: self.state_rule,
            flight_timeout: Duration::from_secs(self.flight_timeout_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_aws_environment_needs_all_variables() {
        let full = lookup(&[
            ("WSM_AWS_ORGANIZATION_ID", "o-1"),
            ("WSM_AWS_ACCOUNT_ID", "123"),
            ("WSM_AWS_TENANT_ALIAS", "tenant"),
            ("WSM_AWS_ENVIRONMENT_ALIAS", "dev"),
        ]);
        let environment = aws_environment_from(full).unwrap();
        assert_eq!(environment.account_id, "123");

        let partial = lookup(&[("WSM_AWS_ACCOUNT_ID", "123")]);
        assert!(aws_environment_from(partial).is_none());
        assert!(aws_environment_from(lookup(&[])).is_none());
    }

    #[test]
    fn test_state_rule_parsing() {
        assert_eq!(state_rule_from(Some("broken_on_failure")), Some(StateRule::BrokenOnFailure));
        assert_eq!(state_rule_from(Some("DELETE_ON_FAILURE")), Some(StateRule::DeleteOnFailure));
        assert_eq!(state_rule_from(Some("sometimes")), None);
        assert_eq!(state_rule_from(None), None);
    }

    #[test]
    fn test_manager_options_carry_settings() {
        let config = Config {
            db_path: PathBuf::from("/tmp/wsm-test.db"),
            broker_url: "http://broker".to_string(),
            service_token: None,
            gcp_access_token: None,
            azure_access_token: None,
            janitor_interval_secs: 60,
            flight_retention_days: 1,
            aws_environment: None,
            gcp_default_zone: Some("us-central1-a".to_string()),
            state_rule: Some(StateRule::BrokenOnFailure),
            flight_timeout_secs: 30,
        };
        let options = config.manager_options();
        assert_eq!(options.gcp_default_zone.as_deref(), Some("us-central1-a"));
        assert_eq!(options.state_rule_override, Some(StateRule::BrokenOnFailure));
        assert_eq!(options.flight_timeout, Duration::from_secs(30));
    }
}
