//! Core components for signing log service requests.
//!
//! This crate provides the foundational types and traits shared by the slsreq
//! crates. Service crates build on top of it.
//!
//! ## Overview
//!
//! - **Context**: a container holding the HTTP client and the environment
//! - **Traits**: credential loading (`ProvideCredential`) and request signing (`SignRequest`)
//! - **Signer**: loads a credential and signs a request with it
//!
//! ## Example
//!
//! ```no_run
//! use async_trait::async_trait;
//! use slsreq_core::{Context, ProvideCredential, Result, SignRequest, Signer, SigningCredential};
//!
//! #[derive(Clone, Debug)]
//! struct MyCredential {
//!     key: String,
//!     secret: String,
//! }
//!
//! impl SigningCredential for MyCredential {
//!     fn is_valid(&self) -> bool {
//!         !self.key.is_empty() && !self.secret.is_empty()
//!     }
//! }
//!
//! #[derive(Debug)]
//! struct MyProvider;
//!
//! #[async_trait]
//! impl ProvideCredential for MyProvider {
//!     type Credential = MyCredential;
//!
//!     async fn provide_credential(&self, _: &Context) -> Result<Option<Self::Credential>> {
//!         Ok(Some(MyCredential {
//!             key: "my-access-key".to_string(),
//!             secret: "my-secret-key".to_string(),
//!         }))
//!     }
//! }
//!
//! #[derive(Debug)]
//! struct MySigner;
//!
//! #[async_trait]
//! impl SignRequest for MySigner {
//!     type Credential = MyCredential;
//!
//!     async fn sign_request(
//!         &self,
//!         _ctx: &Context,
//!         req: &mut http::request::Parts,
//!         _body: Option<&[u8]>,
//!         cred: Option<&Self::Credential>,
//!     ) -> Result<()> {
//!         if let Some(cred) = cred {
//!             req.headers.insert("x-my-key", cred.key.parse()?);
//!         }
//!         Ok(())
//!     }
//! }
//!
//! # async fn example() -> Result<()> {
//! let signer = Signer::new(Context::new(), MyProvider, MySigner);
//!
//! let mut parts = http::Request::get("https://example.com")
//!     .body(())
//!     .unwrap()
//!     .into_parts()
//!     .0;
//! signer.sign(&mut parts, None).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Utilities
//!
//! - [`hash`]: hashing helpers
//! - [`time`]: time formatting and parsing
//! - [`utils`]: redaction of secret values

// Make sure all our public APIs have docs.
#![warn(missing_docs)]

pub mod hash;
pub mod time;
pub mod utils;

mod context;
pub use context::{Context, Env, HttpSend, NoopEnv, NoopHttpSend, OsEnv, StaticEnv};

mod error;
pub use error::{Error, ErrorKind, Result};

mod api;
pub use api::{ProvideCredential, SignRequest, SigningCredential};

mod signer;
pub use signer::Signer;
