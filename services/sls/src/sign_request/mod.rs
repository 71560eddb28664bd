use crate::constants::X_ACS_SECURITY_TOKEN;
use crate::{Config, Credential};
use async_trait::async_trait;
use http::HeaderValue;
use slsreq_core::time::{now, DateTime};
use slsreq_core::{Context, Error, Result, SignRequest};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

mod v1;
mod v4;

/// SignVersion selects the signature protocol of a client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SignVersion {
    /// Legacy HMAC digest over a fixed header list.
    #[default]
    V1,
    /// Canonical request with a region scoped signing key.
    V4,
}

impl FromStr for SignVersion {
    type Err = Error;

    /// Parse `""` or `"v1"` as [`SignVersion::V1`] and `"v4"` as [`SignVersion::V4`].
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "" | "v1" => Ok(SignVersion::V1),
            "v4" => Ok(SignVersion::V4),
            v => Err(Error::config_invalid(format!("sign version {v} is invalid"))),
        }
    }
}

impl Display for SignVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            SignVersion::V1 => f.write_str("v1"),
            SignVersion::V4 => f.write_str("v4"),
        }
    }
}

/// RequestSigner signs log service requests.
///
/// The version is fixed at construction. Every call takes the current time
/// unless the request carries its own `Date` (v1) or `x-log-date` (v4).
#[derive(Debug, Clone)]
pub struct RequestSigner {
    version: SignVersion,
    region: String,
    time: Option<DateTime>,
}

impl RequestSigner {
    /// Create a new signer.
    ///
    /// `region` is only used by v4, where an empty region fails every sign.
    pub fn new(version: SignVersion, region: &str) -> Self {
        Self {
            version,
            region: region.to_string(),
            time: None,
        }
    }

    /// Create a signer from the version and region of a [`Config`].
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.sign_version, config.region.as_deref().unwrap_or_default())
    }

    /// Specify the signing time.
    ///
    /// # Note
    ///
    /// We should always take current time to sign requests.
    /// Only use this function for testing.
    #[cfg(test)]
    pub fn with_time(mut self, time: DateTime) -> Self {
        self.time = Some(time);
        self
    }

    /// The version this signer produces.
    pub fn version(&self) -> SignVersion {
        self.version
    }
}

#[async_trait]
impl SignRequest for RequestSigner {
    type Credential = Credential;

    async fn sign_request(
        &self,
        _ctx: &Context,
        req: &mut http::request::Parts,
        body: Option<&[u8]>,
        credential: Option<&Self::Credential>,
    ) -> Result<()> {
        let Some(cred) = credential else {
            return Ok(());
        };

        if self.version == SignVersion::V4 && self.region.is_empty() {
            return Err(Error::config_invalid(
                "sign version v4 requires a valid region",
            ));
        }

        if let Some(token) = &cred.security_token {
            let mut value: HeaderValue = token.parse()?;
            value.set_sensitive(true);
            req.headers.insert(X_ACS_SECURITY_TOKEN, value);
        }

        let signing_time = self.time.unwrap_or_else(now);
        match self.version {
            SignVersion::V1 => v1::sign(req, body, cred, signing_time),
            SignVersion::V4 => v4::sign(req, body, cred, &self.region, signing_time),
        }
    }
}
