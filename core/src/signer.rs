use crate::{Context, Error, ProvideCredential, Result, SignRequest, SigningCredential};
use std::sync::Arc;

/// Signer is the main struct used to sign the request.
///
/// The credential is asked from the provider on every call. Providers that
/// hand out temporary tokens cache them and decide on their own when a
/// refresh is due, so the signer never holds a stale copy.
#[derive(Clone, Debug)]
pub struct Signer<K: SigningCredential> {
    ctx: Context,
    provider: Arc<dyn ProvideCredential<Credential = K>>,
    signer: Arc<dyn SignRequest<Credential = K>>,
}

impl<K: SigningCredential> Signer<K> {
    /// Create a new signer.
    pub fn new(
        ctx: Context,
        provider: impl ProvideCredential<Credential = K>,
        signer: impl SignRequest<Credential = K>,
    ) -> Self {
        Self {
            ctx,
            provider: Arc::new(provider),
            signer: Arc::new(signer),
        }
    }

    /// The context this signer was built with.
    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// Load a credential and sign the request with it.
    pub async fn sign(&self, req: &mut http::request::Parts, body: Option<&[u8]>) -> Result<()> {
        let credential = self.provider.provide_credential(&self.ctx).await?;
        let Some(credential) = credential.filter(|v| v.is_valid()) else {
            return Err(Error::credential_invalid(
                "no valid credential found from provider",
            ));
        };

        self.signer
            .sign_request(&self.ctx, req, body, Some(&credential))
            .await
    }
}
