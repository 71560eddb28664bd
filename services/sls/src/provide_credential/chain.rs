use crate::Credential;
use async_trait::async_trait;
use slsreq_core::{Context, ProvideCredential, Result};
use std::fmt::{self, Debug};

/// A chain of credential providers that will be tried in order.
///
/// The first provider returning a credential wins. Errors are logged and
/// the next provider is tried. When no provider yields a credential, the
/// last error seen is returned so the caller learns why.
#[derive(Default)]
pub struct ProvideCredentialChain {
    providers: Vec<Box<dyn ProvideCredential<Credential = Credential>>>,
}

impl ProvideCredentialChain {
    /// Create a new empty credential provider chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a credential provider to the end of the chain.
    pub fn push(mut self, provider: impl ProvideCredential<Credential = Credential>) -> Self {
        self.providers.push(Box::new(provider));
        self
    }

    /// Add a credential provider to the front of the chain.
    pub fn push_front(mut self, provider: impl ProvideCredential<Credential = Credential>) -> Self {
        self.providers.insert(0, Box::new(provider));
        self
    }

    /// Number of providers in the chain.
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Returns true if the chain has no provider.
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl Debug for ProvideCredentialChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProvideCredentialChain")
            .field("providers", &self.providers)
            .finish()
    }
}

#[async_trait]
impl ProvideCredential for ProvideCredentialChain {
    type Credential = Credential;

    async fn provide_credential(&self, ctx: &Context) -> Result<Option<Self::Credential>> {
        let mut last_err = None;
        for provider in &self.providers {
            log::debug!("trying credential provider: {provider:?}");

            match provider.provide_credential(ctx).await {
                Ok(Some(cred)) => {
                    log::debug!("loaded credential from provider: {provider:?}");
                    return Ok(Some(cred));
                }
                Ok(None) => continue,
                Err(err) => {
                    log::warn!("failed to load credential from provider {provider:?}: {err}");
                    last_err = Some(err);
                }
            }
        }

        match last_err {
            Some(err) => Err(err),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StaticCredentialProvider;
    use slsreq_core::Error;

    #[derive(Debug)]
    struct FailProvider;

    #[async_trait]
    impl ProvideCredential for FailProvider {
        type Credential = Credential;

        async fn provide_credential(&self, _: &Context) -> Result<Option<Self::Credential>> {
            Err(Error::credential_unavailable("mock provider failed"))
        }
    }

    #[derive(Debug)]
    struct EmptyProvider;

    #[async_trait]
    impl ProvideCredential for EmptyProvider {
        type Credential = Credential;

        async fn provide_credential(&self, _: &Context) -> Result<Option<Self::Credential>> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_chain_returns_first_success() {
        let _ = env_logger::builder().is_test(true).try_init();

        let chain = ProvideCredentialChain::new()
            .push(FailProvider)
            .push(EmptyProvider)
            .push(StaticCredentialProvider::new("test_key", "test_secret"))
            .push(StaticCredentialProvider::new("unused", "unused"));

        let cred = chain
            .provide_credential(&Context::new())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cred.access_key_id, "test_key");
        assert_eq!(cred.access_key_secret, "test_secret");
    }

    #[tokio::test]
    async fn test_chain_surfaces_error_when_nothing_loaded() {
        let chain = ProvideCredentialChain::new()
            .push(EmptyProvider)
            .push(FailProvider)
            .push(EmptyProvider);

        let err = chain.provide_credential(&Context::new()).await.unwrap_err();
        assert_eq!(err.kind(), slsreq_core::ErrorKind::CredentialUnavailable);
        assert!(err.to_string().contains("mock provider failed"), "{err}");
    }

    #[tokio::test]
    async fn test_chain_returns_none_when_all_empty() {
        let chain = ProvideCredentialChain::new()
            .push(EmptyProvider)
            .push(EmptyProvider);

        let cred = chain.provide_credential(&Context::new()).await.unwrap();
        assert!(cred.is_none());
        assert!(ProvideCredentialChain::new()
            .provide_credential(&Context::new())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_push_front() {
        let chain = ProvideCredentialChain::new()
            .push(StaticCredentialProvider::new("second", "secret"))
            .push_front(StaticCredentialProvider::new("first", "secret"));

        assert_eq!(chain.len(), 2);
        let cred = chain
            .provide_credential(&Context::new())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cred.access_key_id, "first");
    }
}
