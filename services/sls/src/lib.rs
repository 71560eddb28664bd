//! Signing and delivering Alibaba Cloud log service requests.
//!
//! ## Overview
//!
//! The log service accepts two signature versions. [`SignVersion::V1`] is an
//! HMAC-SHA256 digest over the method, body MD5, content type, date, the
//! `x-log-*`/`x-acs-*` headers and the resource. [`SignVersion::V4`] signs a
//! canonical request with a key scoped to date and region.
//!
//! Credentials come from a [`ProvideCredential`](slsreq_core::ProvideCredential)
//! implementation:
//!
//! - [`StaticCredentialProvider`]: fixed keys
//! - [`EnvCredentialProvider`]: `ALIBABA_CLOUD_ACCESS_KEY_ID` and friends
//! - [`ExternalRefreshCredentialProvider`]: a user callback, usually talking to STS
//! - [`EcsRamRoleCredentialProvider`]: the ECS instance metadata service
//! - [`ProvideCredentialChain`] and [`DefaultCredentialProvider`]: combinations of the above
//!
//! [`RequestExecutor`] puts it together: it fills in the protocol headers,
//! signs every attempt with a fresh credential and retries failures that
//! are worth retrying until the configured deadline.
//!
//! ## Quick Start
//!
//! ```no_run
//! use bytes::Bytes;
//! use http::{HeaderMap, Method};
//! use slsreq_core::{Context, OsEnv};
//! use slsreq_http_send_reqwest::ReqwestHttpSend;
//! use slsreq_sls::{Config, RequestExecutor};
//!
//! # async fn example() -> slsreq_sls::Result<()> {
//! let ctx = Context::new()
//!     .with_http_send(ReqwestHttpSend::default())
//!     .with_env(OsEnv);
//!
//! let config = Config {
//!     endpoint: "https://cn-hangzhou.log.aliyuncs.com".to_string(),
//!     ..Default::default()
//! };
//! let executor = RequestExecutor::from_config(ctx, config);
//!
//! let mut headers = HeaderMap::new();
//! headers.insert("x-log-bodyrawsize", "0".parse().unwrap());
//! let resp = executor
//!     .execute(Method::GET, Some("my-project"), "/logstores", headers, None::<Bytes>)
//!     .await?;
//! println!("{}", String::from_utf8_lossy(resp.body()));
//! # Ok(())
//! # }
//! ```

mod constants;

mod config;
pub use config::Config;

mod credential;
pub use credential::{Credential, TemporaryCredential};

mod error;
pub use error::{BadResponseError, Error, Result, ServiceError};

mod sign_request;
pub use sign_request::{RequestSigner, SignVersion};

mod provide_credential;
pub use provide_credential::*;

mod execute;
pub use execute::{RequestExecutor, RetryPolicy};
