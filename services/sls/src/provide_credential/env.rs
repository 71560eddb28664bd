use crate::{constants::*, Credential};
use async_trait::async_trait;
use slsreq_core::{Context, ProvideCredential, Result};

/// EnvCredentialProvider loads credentials from environment variables.
///
/// This provider looks for the following environment variables:
/// - `ALIBABA_CLOUD_ACCESS_KEY_ID`: The access key ID
/// - `ALIBABA_CLOUD_ACCESS_KEY_SECRET`: The access key secret
/// - `ALIBABA_CLOUD_SECURITY_TOKEN`: The security token (optional)
#[derive(Debug, Default)]
pub struct EnvCredentialProvider;

impl EnvCredentialProvider {
    /// Create a new EnvCredentialProvider.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProvideCredential for EnvCredentialProvider {
    type Credential = Credential;

    async fn provide_credential(&self, ctx: &Context) -> Result<Option<Self::Credential>> {
        let access_key_id = ctx.env_var(ALIBABA_CLOUD_ACCESS_KEY_ID);
        let access_key_secret = ctx.env_var(ALIBABA_CLOUD_ACCESS_KEY_SECRET);

        match (access_key_id, access_key_secret) {
            (Some(ak), Some(sk)) if !ak.is_empty() && !sk.is_empty() => {
                let cred = Credential::new(ak, sk);
                Ok(Some(match ctx.env_var(ALIBABA_CLOUD_SECURITY_TOKEN) {
                    Some(token) => cred.with_security_token(token),
                    None => cred,
                }))
            }
            _ => Ok(None),
        }
    }
}
