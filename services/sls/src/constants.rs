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

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC};

// Env values used in log service.
pub const ALIBABA_CLOUD_ACCESS_KEY_ID: &str = "ALIBABA_CLOUD_ACCESS_KEY_ID";
pub const ALIBABA_CLOUD_ACCESS_KEY_SECRET: &str = "ALIBABA_CLOUD_ACCESS_KEY_SECRET";
pub const ALIBABA_CLOUD_SECURITY_TOKEN: &str = "ALIBABA_CLOUD_SECURITY_TOKEN";
pub const ALIBABA_CLOUD_ECS_METADATA: &str = "ALIBABA_CLOUD_ECS_METADATA";

// Headers used in log service.
pub const X_LOG_API_VERSION: &str = "x-log-apiversion";
pub const X_LOG_SIGNATURE_METHOD: &str = "x-log-signaturemethod";
pub const X_LOG_BODY_RAW_SIZE: &str = "x-log-bodyrawsize";
pub const X_LOG_REQUEST_ID: &str = "x-log-requestid";
pub const X_LOG_DATE: &str = "x-log-date";
pub const X_LOG_CONTENT_SHA256: &str = "x-log-content-sha256";
pub const X_ACS_SECURITY_TOKEN: &str = "x-acs-security-token";
pub const CONTENT_MD5: &str = "content-md5";

pub const API_VERSION: &str = "0.6.0";
pub const SIGNATURE_METHOD: &str = "hmac-sha256";
pub const DEFAULT_CONTENT_TYPE: &str = "application/json";

// Signature v4 tokens.
pub const SIGN_V4_ALGORITHM: &str = "SLS4-HMAC-SHA256";
pub const SIGN_V4_KEY_PREFIX: &str = "aliyun_v4";
pub const SIGN_V4_PRODUCT: &str = "sls";
pub const SIGN_V4_TERMINATOR: &str = "aliyun_v4_request";

pub const ECS_RAM_ROLE_URL_PREFIX: &str =
    "http://100.100.100.200/latest/meta-data/ram/security-credentials/";

/// AsciiSet for query keys and values in the v4 canonical request.
///
/// Only `A-Z a-z 0-9 - _ . ~` stay as-is, so space becomes `%20` and `*`
/// becomes `%2A`.
pub static SIGN_V4_QUERY_ENCODE_SET: AsciiSet = NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// AsciiSet for the path in the v4 canonical request, which keeps `/`.
pub static SIGN_V4_PATH_ENCODE_SET: AsciiSet = NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');
