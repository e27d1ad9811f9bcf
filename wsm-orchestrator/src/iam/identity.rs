use super::{BearerToken, IdentityBroker};
use crate::error::Result;
use tracing::info;

/// The orchestrator's own identity in the broker. OWNER of every controlled resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceIdentity {
    email: String,
    token: BearerToken,
}

impl ServiceIdentity {
    pub fn new(email: impl Into<String>, token: BearerToken) -> Self {
        Self {
            email: email.into(),
            token,
        }
    }

    /// Look the service up in the broker, registering it on first start.
    pub async fn initialize(broker: &dyn IdentityBroker, token: BearerToken) -> Result<Self> {
        let user = match broker.user_info(&token).await? {
            Some(user) => user,
            None => {
                info!("Service identity not known to the broker; registering");
                broker.register_user(&token).await?
            }
        };

        info!("Service identity is {}", user.user_email);
        Ok(Self::new(user.user_email, token))
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn token(&self) -> &BearerToken {
        &self.token
    }
}
