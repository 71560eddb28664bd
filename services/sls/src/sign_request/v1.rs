//! Signature v1: `SLS <id>:<base64 hmac-sha256>`.

use crate::constants::CONTENT_MD5;
use crate::Credential;
use http::header::{AUTHORIZATION, CONTENT_TYPE, DATE};
use http::HeaderValue;
use log::debug;
use percent_encoding::percent_decode_str;
use slsreq_core::hash::{base64_hmac_sha256, hex_md5_upper};
use slsreq_core::time::{format_http_date, DateTime};
use slsreq_core::Result;
use std::collections::BTreeMap;
use std::fmt::Write;

pub(super) fn sign(
    req: &mut http::request::Parts,
    body: Option<&[u8]>,
    cred: &Credential,
    signing_time: DateTime,
) -> Result<()> {
    let content_md5 = match body {
        Some(body) => {
            let v = hex_md5_upper(body);
            req.headers.insert(CONTENT_MD5, v.parse()?);
            v
        }
        None => String::new(),
    };

    let date = match req.headers.get(DATE) {
        Some(v) => v.to_str()?.to_string(),
        None => {
            let v = format_http_date(signing_time);
            req.headers.insert(DATE, v.parse()?);
            v
        }
    };

    let string_to_sign = build_string_to_sign(req, &content_md5, &date)?;
    debug!("calculated string to sign: {string_to_sign:?}");

    let signature = base64_hmac_sha256(
        cred.access_key_secret.as_bytes(),
        string_to_sign.as_bytes(),
    );
    let mut value: HeaderValue = format!("SLS {}:{}", cred.access_key_id, signature).parse()?;
    value.set_sensitive(true);
    req.headers.insert(AUTHORIZATION, value);

    Ok(())
}

fn build_string_to_sign(
    req: &http::request::Parts,
    content_md5: &str,
    date: &str,
) -> Result<String> {
    let mut s = String::new();
    writeln!(&mut s, "{}", req.method.as_str())?;
    writeln!(&mut s, "{content_md5}")?;
    writeln!(
        &mut s,
        "{}",
        req.headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
    )?;
    writeln!(&mut s, "{date}")?;
    writeln!(&mut s, "{}", canonicalize_headers(req)?)?;
    write!(&mut s, "{}", canonicalize_resource(req))?;

    Ok(s)
}

fn canonicalize_headers(req: &http::request::Parts) -> Result<String> {
    let mut headers = BTreeMap::new();
    for name in req.headers.keys() {
        let key = name.as_str().trim();
        if !(key.starts_with("x-log-") || key.starts_with("x-acs-")) {
            continue;
        }
        let value = req.headers[name].to_str()?.trim();
        headers.insert(key, value);
    }

    Ok(headers
        .iter()
        .map(|(k, v)| format!("{k}:{v}"))
        .collect::<Vec<_>>()
        .join("\n"))
}

fn canonicalize_resource(req: &http::request::Parts) -> String {
    let path = percent_decode_str(req.uri.path()).decode_utf8_lossy();
    let Some(query) = req.uri.query().filter(|v| !v.is_empty()) else {
        return path.to_string();
    };

    let mut params: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (k, v) in form_urlencoded::parse(query.as_bytes()) {
        params.entry(k.into_owned()).or_default().push(v.into_owned());
    }

    let query = params
        .iter()
        .map(|(k, values)| values.iter().map(|v| format!("{k}={v}")).collect::<String>())
        .collect::<Vec<_>>()
        .join("&");
    format!("{path}?{query}")
}
