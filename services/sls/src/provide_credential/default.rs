use crate::provide_credential::{
    EcsRamRoleCredentialProvider, EnvCredentialProvider, ProvideCredentialChain,
    StaticCredentialProvider,
};
use crate::{Config, Credential};
use async_trait::async_trait;
use slsreq_core::{Context, ProvideCredential, Result};

/// DefaultCredentialProvider is a loader that will try to load credential via default chains.
///
/// Resolution order:
///
/// 1. Keys set in [`Config`]
/// 2. Environment variables
/// 3. ECS RAM role
#[derive(Debug)]
pub struct DefaultCredentialProvider {
    chain: ProvideCredentialChain,
}

impl Default for DefaultCredentialProvider {
    fn default() -> Self {
        Self::new(&Config::default())
    }
}

impl DefaultCredentialProvider {
    /// Create a new `DefaultCredentialProvider` instance from config.
    pub fn new(config: &Config) -> Self {
        let mut chain = ProvideCredentialChain::new();

        if let (Some(ak), Some(sk)) = (&config.access_key_id, &config.access_key_secret) {
            if !ak.is_empty() && !sk.is_empty() {
                let mut cred = Credential::new(ak, sk);
                if let Some(token) = &config.security_token {
                    cred = cred.with_security_token(token);
                }
                chain = chain.push(StaticCredentialProvider::from(cred));
            }
        }

        let ecs = match &config.role_name {
            Some(role_name) => EcsRamRoleCredentialProvider::new().with_role_name(role_name),
            None => EcsRamRoleCredentialProvider::new(),
        };
        let chain = chain.push(EnvCredentialProvider::new()).push(ecs);

        Self { chain }
    }

    /// Create with a custom credential chain.
    pub fn with_chain(chain: ProvideCredentialChain) -> Self {
        Self { chain }
    }

    /// Try `provider` before the rest of the chain.
    pub fn push_front(
        mut self,
        provider: impl ProvideCredential<Credential = Credential> + 'static,
    ) -> Self {
        self.chain = self.chain.push_front(provider);
        self
    }
}

#[async_trait]
impl ProvideCredential for DefaultCredentialProvider {
    type Credential = Credential;

    async fn provide_credential(&self, ctx: &Context) -> Result<Option<Self::Credential>> {
        self.chain.provide_credential(ctx).await
    }
}
