//! Cookie header decoding and session cookie construction.

pub use cookie::Cookie;
use cookie::time::Duration;

/// Decode one `Cookie` header value into its pairs.
///
/// Pairs that fail to parse (no `=`, empty name) are skipped rather than
/// failing the whole header.
pub fn decode_cookies(header: &str) -> impl Iterator<Item = Cookie<'static>> + '_ {
    Cookie::split_parse(header).filter_map(|parsed| match parsed {
        Ok(cookie) => Some(cookie.into_owned()),
        Err(err) => {
            tracing::debug!(error = %err, "Skipping malformed cookie pair");
            None
        }
    })
}

/// Find the first cookie with the given name.
pub fn find_cookie<'a>(cookies: &'a [Cookie<'static>], name: &str) -> Option<&'a Cookie<'static>> {
    cookies.iter().find(|c| c.name() == name)
}

/// Build the cookie carrying a session id. `max_age` of `None` makes it
/// session-only.
pub fn session_cookie(name: &str, id: &str, path: &str, max_age: Option<i64>) -> Cookie<'static> {
    let mut builder = Cookie::build((name.to_string(), id.to_string()))
        .path(path.to_string())
        .http_only(true);
    if let Some(secs) = max_age {
        builder = builder.max_age(Duration::seconds(secs));
    }
    builder.build()
}

/// True if `name` is a valid cookie-name token (RFC 6265).
pub fn is_valid_cookie_name(name: &str) -> bool {
    !name.is_empty()
        && name.bytes().all(|b| {
            b.is_ascii_graphic()
                && !matches!(
                    b,
                    b'(' | b')' | b'<' | b'>' | b'@' | b',' | b';' | b':' | b'\\' | b'"'
                        | b'/' | b'[' | b']' | b'?' | b'=' | b'{' | b'}'
                )
        })
}
