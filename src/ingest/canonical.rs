//! URL canonicalization.

const TRACKING_PREFIXES: &[&str] = &["utm_"];
const TRACKING_PARAMS: &[&str] = &["fbclid", "gclid"];

/// Lowercases the host, strips tracking params (`utm_*`, `fbclid`,
/// `gclid`), optionally strips the query entirely, and drops any
/// fragment. Not a full RFC-3986 parser — just enough structure (scheme,
/// host, path, query) to make ingestion idempotent under query-string
/// jitter.
pub fn canonicalize_url(raw: &str, strip_query_entirely: bool) -> String {
    let without_fragment = raw.split('#').next().unwrap_or(raw);
    let (before_query, query) = match without_fragment.split_once('?') {
        Some((b, q)) => (b, Some(q)),
        None => (without_fragment, None),
    };

    let lowered_authority = lowercase_host(before_query);

    let kept_query = if strip_query_entirely {
        None
    } else {
        query.map(strip_tracking_params).filter(|q| !q.is_empty())
    };

    match kept_query {
        Some(q) => format!("{lowered_authority}?{q}"),
        None => lowered_authority,
    }
}

fn lowercase_host(url_without_query: &str) -> String {
    if let Some(scheme_end) = url_without_query.find("://") {
        let scheme = &url_without_query[..scheme_end];
        let rest = &url_without_query[scheme_end + 3..];
        let (host, path) = match rest.find('/') {
            Some(i) => (&rest[..i], &rest[i..]),
            None => (rest, ""),
        };
        format!("{}://{}{}", scheme, host.to_lowercase(), path)
    } else {
        url_without_query.to_string()
    }
}

fn strip_tracking_params(query: &str) -> String {
    query
        .split('&')
        .filter(|pair| {
            let key = pair.split('=').next().unwrap_or("");
            !TRACKING_PREFIXES.iter().any(|p| key.starts_with(p))
                && !TRACKING_PARAMS.contains(&key)
        })
        .collect::<Vec<_>>()
        .join("&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowercases_host_but_preserves_path_case() {
        assert_eq!(
            canonicalize_url("https://Example.COM/Path", false),
            "https://example.com/Path"
        );
    }

    #[test]
    fn strips_tracking_params_but_keeps_others() {
        assert_eq!(
            canonicalize_url("https://x.test/?utm_source=a&id=5&fbclid=z", false),
            "https://x.test/?id=5"
        );
    }

    #[test]
    fn strip_query_entirely_drops_all_params() {
        assert_eq!(
            canonicalize_url("https://x.test/?id=5", true),
            "https://x.test/"
        );
    }

    #[test]
    fn drops_fragment() {
        assert_eq!(canonicalize_url("https://x.test/a#section", false), "https://x.test/a");
    }

    #[test]
    fn query_string_jitter_produces_the_same_canonical_url() {
        let a = canonicalize_url("https://x.test/a?id=5&utm_campaign=spring", false);
        let b = canonicalize_url("https://x.test/a?utm_campaign=summer&id=5", false);
        assert_eq!(a, b);
    }
}
