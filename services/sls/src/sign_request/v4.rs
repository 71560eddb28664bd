//! Signature v4: canonical request signed with a key scoped to date and region.

use crate::constants::*;
use crate::Credential;
use http::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, HOST};
use http::HeaderValue;
use log::debug;
use percent_encoding::{percent_decode_str, utf8_percent_encode};
use slsreq_core::hash::{hex_hmac_sha256, hex_sha256, hmac_sha256, EMPTY_STRING_SHA256};
use slsreq_core::time::{format_date, format_iso8601, DateTime};
use slsreq_core::{Error, Result};
use std::collections::BTreeMap;
use std::fmt::Write;

pub(super) fn sign(
    req: &mut http::request::Parts,
    body: Option<&[u8]>,
    cred: &Credential,
    region: &str,
    signing_time: DateTime,
) -> Result<()> {
    let path = req.uri.path();
    if !path.starts_with('/') {
        return Err(Error::request_invalid(format!(
            "uri {} has no valid path",
            req.uri
        )));
    }
    let path = percent_decode_str(path).decode_utf8_lossy().to_string();
    let params = canonicalize_query(req.uri.query());

    if req.headers.get(CONTENT_TYPE).is_some_and(|v| v.is_empty()) {
        req.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static(DEFAULT_CONTENT_TYPE));
    }

    let (date, date_time) = match req.headers.get(X_LOG_DATE) {
        Some(v) => {
            let date_time = v.to_str()?.to_string();
            let date = date_time
                .get(..8)
                .ok_or_else(|| {
                    Error::request_invalid(format!("header {X_LOG_DATE} {date_time} is invalid"))
                })?
                .to_string();
            (date, date_time)
        }
        None => (format_date(signing_time), format_iso8601(signing_time)),
    };

    let body = body.unwrap_or_default();
    let payload_hash = if body.is_empty() {
        EMPTY_STRING_SHA256.to_string()
    } else {
        hex_sha256(body)
    };

    req.headers
        .insert(X_LOG_CONTENT_SHA256, payload_hash.parse()?);
    req.headers.insert(X_LOG_DATE, date_time.parse()?);
    req.headers.insert(CONTENT_LENGTH, body.len().into());

    let headers = canonicalize_headers(req)?;
    let signed_headers = headers.keys().copied().collect::<Vec<_>>().join(";");

    let mut creq = String::new();
    writeln!(&mut creq, "{}", req.method.as_str())?;
    writeln!(
        &mut creq,
        "{}",
        utf8_percent_encode(&path, &SIGN_V4_PATH_ENCODE_SET)
    )?;
    writeln!(&mut creq, "{params}")?;
    for (k, v) in &headers {
        writeln!(&mut creq, "{k}:{v}")?;
    }
    writeln!(&mut creq)?;
    writeln!(&mut creq, "{signed_headers}")?;
    write!(&mut creq, "{payload_hash}")?;
    debug!("calculated canonical request: {creq}");

    let scope = format!("{date}/{region}/{SIGN_V4_PRODUCT}/{SIGN_V4_TERMINATOR}");
    let string_to_sign = format!(
        "{SIGN_V4_ALGORITHM}\n{date_time}\n{scope}\n{}",
        hex_sha256(creq.as_bytes())
    );
    debug!("calculated string to sign: {string_to_sign}");

    let signing_key = generate_signing_key(&cred.access_key_secret, &date, region);
    let signature = hex_hmac_sha256(&signing_key, string_to_sign.as_bytes());

    let mut value: HeaderValue = format!(
        "{SIGN_V4_ALGORITHM} Credential={}/{scope},SignedHeaders={signed_headers},Signature={signature}",
        cred.access_key_id
    )
    .parse()?;
    value.set_sensitive(true);
    req.headers.insert(AUTHORIZATION, value);

    Ok(())
}

/// Keys and values are trimmed and encoded, the first value of a repeated
/// key wins, `=` is omitted for empty values.
fn canonicalize_query(query: Option<&str>) -> String {
    let Some(query) = query else {
        return String::new();
    };

    let mut first_values: Vec<(String, String)> = Vec::new();
    for (k, v) in form_urlencoded::parse(query.as_bytes()) {
        if first_values.iter().all(|(seen, _)| seen.as_str() != k) {
            first_values.push((k.into_owned(), v.into_owned()));
        }
    }

    let params = first_values
        .iter()
        .map(|(k, v)| {
            (
                utf8_percent_encode(k.trim(), &SIGN_V4_QUERY_ENCODE_SET).to_string(),
                utf8_percent_encode(v.trim(), &SIGN_V4_QUERY_ENCODE_SET).to_string(),
            )
        })
        .collect::<BTreeMap<_, _>>();

    params
        .iter()
        .map(|(k, v)| {
            if v.is_empty() {
                k.clone()
            } else {
                format!("{k}={v}")
            }
        })
        .collect::<Vec<_>>()
        .join("&")
}

fn canonicalize_headers(req: &http::request::Parts) -> Result<BTreeMap<&str, &str>> {
    let mut headers = BTreeMap::new();
    for name in req.headers.keys() {
        let key = name.as_str();
        if key == HOST.as_str()
            || key == CONTENT_TYPE.as_str()
            || key.starts_with("x-log-")
            || key.starts_with("x-acs-")
        {
            headers.insert(key, req.headers[name].to_str()?.trim());
        }
    }
    Ok(headers)
}

fn generate_signing_key(secret: &str, date: &str, region: &str) -> Vec<u8> {
    let key = format!("{SIGN_V4_KEY_PREFIX}{secret}");
    let sign_date = hmac_sha256(key.as_bytes(), date.as_bytes());
    let sign_region = hmac_sha256(&sign_date, region.as_bytes());
    let sign_product = hmac_sha256(&sign_region, SIGN_V4_PRODUCT.as_bytes());
    hmac_sha256(&sign_product, SIGN_V4_TERMINATOR.as_bytes())
}
