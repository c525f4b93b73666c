use url::{Position, Url};

const REDACTED: &str = "REDACTED";
const ELLIPSIS: &str = "...";

/// Makes a URL safe to store in telemetry.
///
/// Query values of `redacted_params` (compared case-insensitively) are replaced, a password in the
/// user info is removed, and the result is cut to `max_len` characters with a trailing `...`.
/// Relative URLs keep their path and query. Input that does not parse as a URL is only truncated.
pub(crate) fn sanitize_url(raw: &str, redacted_params: &[String], max_len: usize) -> String {
    let sanitized = match Url::parse(raw) {
        Ok(mut url) => {
            redact(&mut url, redacted_params);
            url.to_string()
        }
        Err(url::ParseError::RelativeUrlWithoutBase) if raw.starts_with('/') => {
            match Url::parse("http://relative.invalid").and_then(|base| base.join(raw)) {
                Ok(mut url) => {
                    redact(&mut url, redacted_params);
                    url[Position::BeforePath..].to_string()
                }
                Err(_) => raw.to_string(),
            }
        }
        Err(_) => raw.to_string(),
    };
    truncate(sanitized, max_len)
}

fn redact(url: &mut Url, redacted_params: &[String]) {
    if url.password().is_some() {
        let _ = url.set_password(None);
    }

    let is_redacted =
        |key: &str| redacted_params.iter().any(|param| param.eq_ignore_ascii_case(key));
    if !url.query_pairs().any(|(key, _)| is_redacted(&key)) {
        return;
    }
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(key, value)| {
            let value = if is_redacted(&key) {
                REDACTED.to_string()
            } else {
                value.into_owned()
            };
            (key.into_owned(), value)
        })
        .collect();
    url.query_pairs_mut().clear().extend_pairs(pairs);
}

fn truncate(mut value: String, max_len: usize) -> String {
    if value.chars().count() <= max_len {
        return value;
    }
    let with_ellipsis = max_len >= ELLIPSIS.len();
    let keep = if with_ellipsis {
        max_len - ELLIPSIS.len()
    } else {
        max_len
    };
    let end = value
        .char_indices()
        .nth(keep)
        .map_or(value.len(), |(index, _)| index);
    value.truncate(end);
    if with_ellipsis {
        value.push_str(ELLIPSIS);
    }
    value
}
