use chrono::TimeDelta;
use slsreq_core::time::{format_rfc3339, DateTime};
use slsreq_core::utils::Redact;
use slsreq_core::SigningCredential;
use std::fmt::{Debug, Formatter};

/// Default factor of a token's lifetime after which it's refreshed.
pub const DEFAULT_EXPIRED_FACTOR: f64 = 0.8;

/// Credential that holds the access_key and secret_key.
#[derive(Default, Clone, PartialEq, Eq)]
pub struct Credential {
    /// Access key id for log service.
    pub access_key_id: String,
    /// Access key secret for log service.
    pub access_key_secret: String,
    /// Security token for STS credentials.
    pub security_token: Option<String>,
}

impl Credential {
    /// Create a credential from long-term keys.
    pub fn new(access_key_id: impl Into<String>, access_key_secret: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            access_key_secret: access_key_secret.into(),
            security_token: None,
        }
    }

    /// Attach a security token. Empty tokens are dropped.
    pub fn with_security_token(mut self, token: impl Into<String>) -> Self {
        let token = token.into();
        self.security_token = (!token.is_empty()).then_some(token);
        self
    }
}

impl Debug for Credential {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("access_key_id", &Redact::from(&self.access_key_id))
            .field("access_key_secret", &Redact::from(&self.access_key_secret))
            .field("security_token", &Redact::from(&self.security_token))
            .finish()
    }
}

impl SigningCredential for Credential {
    fn is_valid(&self) -> bool {
        !self.access_key_id.is_empty() && !self.access_key_secret.is_empty()
    }
}

/// TemporaryCredential is a [`Credential`] with a bounded lifetime, like the
/// STS tokens handed out by the ECS metadata service.
///
/// It's never updated in place, a refresh replaces it as a whole.
#[derive(Clone)]
pub struct TemporaryCredential {
    /// The credential itself.
    pub credential: Credential,
    /// The instant after which the service rejects the credential.
    pub expiration: DateTime,
    /// The instant the credential was issued.
    pub last_updated: DateTime,
    expired_factor: f64,
}

impl Debug for TemporaryCredential {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemporaryCredential")
            .field("credential", &self.credential)
            .field("expiration", &format_rfc3339(self.expiration).to_string())
            .field("last_updated", &format_rfc3339(self.last_updated).to_string())
            .field("expired_factor", &self.expired_factor)
            .finish()
    }
}

impl TemporaryCredential {
    /// Create a new temporary credential with the default expired factor.
    pub fn new(credential: Credential, expiration: DateTime, last_updated: DateTime) -> Self {
        Self {
            credential,
            expiration,
            last_updated,
            expired_factor: DEFAULT_EXPIRED_FACTOR,
        }
    }

    /// Set the share of the lifetime after which a refresh is due.
    ///
    /// A smaller factor refreshes more often, `1.0` waits until the last two
    /// minutes. Values outside `(0, 1]` are ignored.
    pub fn with_expired_factor(mut self, factor: f64) -> Self {
        if factor > 0.0 && factor <= 1.0 {
            self.expired_factor = factor;
        }
        self
    }

    /// The expired factor in use.
    pub fn expired_factor(&self) -> f64 {
        self.expired_factor
    }

    /// Returns true if the credential is expired or will expire soon.
    pub fn should_refresh(&self, now: DateTime) -> bool {
        if now + TimeDelta::minutes(2) > self.expiration {
            return true;
        }

        let lifetime = (self.expiration - self.last_updated)
            .num_milliseconds()
            .max(0) as f64;
        let threshold = TimeDelta::milliseconds((lifetime * self.expired_factor) as i64);
        now - self.last_updated > threshold
    }

    /// Returns true if the credential is past its absolute expiration.
    pub fn has_expired(&self, now: DateTime) -> bool {
        now > self.expiration
    }
}
