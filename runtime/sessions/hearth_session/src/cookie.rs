//! Parse the `Cookie` request header and render the session `Set-Cookie` header.
//!
//! Cookie handling is delegated to [`biscotti`]. Parsing is more lenient than
//! `biscotti` on its own: a malformed pair never fails the whole header.
use crate::config::SessionCookieConfig;
use biscotti::{
    Processor, ProcessorConfig, RemovalCookie, RequestCookies, ResponseCookie, ResponseCookies,
};
use indexmap::IndexMap;
use jiff::{SignedDuration, Timestamp, tz::TimeZone};

/// Parse the value of a `Cookie` header into name/value pairs.
///
/// Values are percent-decoded. If decoding fails (malformed escape sequence or
/// invalid UTF-8), the raw value is kept.
/// Pairs without a name are skipped; when a name appears more than once, the
/// last occurrence wins.
///
/// This function never fails: cookies are client input, and malformed
/// input must not fail the request.
pub fn parse_cookies(header: &str) -> IndexMap<String, String> {
    let decoding = processor(true);
    let verbatim = processor(false);
    let mut cookies = IndexMap::new();
    for pair in header.split(';') {
        let Some((name, value)) = pair.split_once('=') else {
            continue;
        };
        let name = name.trim();
        if name.is_empty() {
            continue;
        }
        let pair = format!("{name}={}", value.trim());
        let Some(value) =
            parse_value(&pair, name, &decoding).or_else(|| parse_value(&pair, name, &verbatim))
        else {
            tracing::debug!(cookie.name = name, "Skipping a malformed request cookie");
            continue;
        };
        // `insert` keeps the original position but overwrites the value.
        cookies.insert(name.to_owned(), value);
    }
    cookies
}

fn parse_value(pair: &str, name: &str, processor: &Processor) -> Option<String> {
    let mut cookies = RequestCookies::new();
    cookies.extend_from_header(pair, processor).ok()?;
    cookies.get(name).map(|cookie| cookie.value().to_owned())
}

/// Render the `Set-Cookie` header value for a live session cookie.
///
/// `Max-Age` is computed against `now` (in whole seconds, never negative),
/// while `Expires` carries `expires_at` as an HTTP date.
pub fn serialize_session_cookie(
    config: &SessionCookieConfig,
    value: &str,
    expires_at: Timestamp,
    now: Timestamp,
) -> String {
    let max_age = (expires_at.as_millisecond() - now.as_millisecond()).max(0) / 1000;
    let cookie = ResponseCookie::new(config.name.clone(), value.to_owned())
        .set_max_age(SignedDuration::from_secs(max_age))
        .set_expires(expires_at.to_zoned(TimeZone::UTC));
    render(with_attributes(cookie, config))
}

/// Render the `Set-Cookie` header value that removes the session cookie from the client.
pub fn serialize_removal_cookie(config: &SessionCookieConfig) -> String {
    let cookie: ResponseCookie<'static> = RemovalCookie::new(config.name.clone()).into();
    render(with_attributes(cookie.set_max_age(SignedDuration::ZERO), config))
}

fn with_attributes(
    mut cookie: ResponseCookie<'static>,
    config: &SessionCookieConfig,
) -> ResponseCookie<'static> {
    if let Some(domain) = config.domain.as_deref() {
        cookie = cookie.set_domain(domain.to_owned());
    }
    if let Some(path) = config.path.as_deref() {
        cookie = cookie.set_path(path.to_owned());
    }
    cookie = cookie.set_same_site(config.same_site);
    if config.secure {
        cookie = cookie.set_secure(true);
    }
    if config.http_only {
        cookie = cookie.set_http_only(true);
    }
    cookie
}

fn render(cookie: ResponseCookie<'static>) -> String {
    let mut cookies = ResponseCookies::new();
    cookies.insert(cookie);
    cookies
        .header_values(&processor(true))
        .next()
        .unwrap_or_default()
}

fn processor(percent_encode: bool) -> Processor {
    let mut config = ProcessorConfig::default();
    config.percent_encode = percent_encode;
    config.into()
}
