// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

use crate::Credential;
use async_trait::async_trait;
use slsreq_core::{Context, ProvideCredential, Result};

/// StaticCredentialProvider always hands out the same credential.
///
/// There is no refresh: a temporary token given here stops working once it
/// expires.
#[derive(Debug, Clone)]
pub struct StaticCredentialProvider {
    credential: Credential,
}

impl StaticCredentialProvider {
    /// Create a new StaticCredentialProvider with access key ID and access key secret.
    pub fn new(access_key_id: &str, access_key_secret: &str) -> Self {
        Self {
            credential: Credential::new(access_key_id, access_key_secret),
        }
    }

    /// Set the security token.
    pub fn with_security_token(mut self, token: &str) -> Self {
        self.credential = self.credential.with_security_token(token);
        self
    }
}

impl From<Credential> for StaticCredentialProvider {
    fn from(credential: Credential) -> Self {
        Self { credential }
    }
}

#[async_trait]
impl ProvideCredential for StaticCredentialProvider {
    type Credential = Credential;

    async fn provide_credential(&self, _: &Context) -> Result<Option<Self::Credential>> {
        Ok(Some(self.credential.clone()))
    }
}
