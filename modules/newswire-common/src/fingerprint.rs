// Content and URL fingerprints used by the dedup engine. All of these are
// persisted, so they must stay stable across runs and releases — hashing is
// sha256-based rather than the std hasher.

use sha2::{Digest, Sha256};

/// Query parameters that carry tracking state rather than content identity.
const TRACKING_PARAMS: &[&str] = &[
    "_dt",
    "fbclid",
    "gclid",
    "yclid",
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
    "ref",
    "from",
    "mc_cid",
    "mc_eid",
];

/// Canonicalize a URL for dedup comparison: lowercase scheme/host, drop
/// default ports and fragments, strip tracking parameters, sort the
/// remaining query pairs, and trim the trailing slash.
///
/// Unparseable input is returned trimmed but otherwise untouched — a bad
/// URL should still dedup against itself.
pub fn normalize_url(raw: &str) -> String {
    let Ok(parsed) = url::Url::parse(raw.trim()) else {
        return raw.trim().to_string();
    };

    let scheme = parsed.scheme().to_lowercase();
    let host = parsed.host_str().unwrap_or_default().to_lowercase();

    // url::Url already drops the default port for the scheme; keep any
    // explicit non-default one.
    let port = parsed
        .port()
        .map(|p| format!(":{p}"))
        .unwrap_or_default();

    let path = parsed.path().trim_end_matches('/').to_string();

    let mut pairs: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(key, _)| !TRACKING_PARAMS.contains(&key.as_ref()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    pairs.sort();

    let query = if pairs.is_empty() {
        String::new()
    } else {
        let joined: Vec<String> = pairs.into_iter().map(|(k, v)| format!("{k}={v}")).collect();
        format!("?{}", joined.join("&"))
    };

    format!("{scheme}://{host}{port}{path}{query}")
}

/// Hex sha256 of the normalized URL. Defense against normalization gaps:
/// two representations of the same URL hash identically once normalized.
pub fn url_hash(raw: &str) -> String {
    hex_sha256(normalize_url(raw).as_bytes())
}

/// Hex sha256 checksum of item content. Catches identical content
/// republished under a different URL.
pub fn content_checksum(text: &str) -> String {
    hex_sha256(text.trim().as_bytes())
}

/// 64-bit simhash over title + body tokens. Near-duplicate rewrites of the
/// same story land within a small hamming distance of each other.
pub fn simhash64(text: &str, title: &str) -> u64 {
    let mut weights = [0i32; 64];

    for token in tokens(title).chain(tokens(text)) {
        let h = token_hash(&token);
        for (bit, weight) in weights.iter_mut().enumerate() {
            if h >> bit & 1 == 1 {
                *weight += 1;
            } else {
                *weight -= 1;
            }
        }
    }

    let mut hash = 0u64;
    for (bit, weight) in weights.iter().enumerate() {
        if *weight > 0 {
            hash |= 1 << bit;
        }
    }
    hash
}

/// Number of differing bits between two simhashes.
pub fn hamming_distance(a: u64, b: u64) -> u32 {
    (a ^ b).count_ones()
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 2)
        .map(|t| t.to_lowercase())
}

fn token_hash(token: &str) -> u64 {
    let digest = Sha256::digest(token.as_bytes());
    u64::from_le_bytes(digest[..8].try_into().unwrap())
}

fn hex_sha256(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_tracking_ports_and_fragments() {
        let url = "https://Example.com:443/path/?utm_source=x&b=2&a=1#frag";
        assert_eq!(normalize_url(url), "https://example.com/path?a=1&b=2");
    }

    #[test]
    fn normalize_preserves_clean_urls() {
        assert_eq!(
            normalize_url("https://example.com/page?id=123"),
            "https://example.com/page?id=123"
        );
    }

    #[test]
    fn normalize_keeps_explicit_nondefault_port() {
        assert_eq!(
            normalize_url("https://example.com:8443/a"),
            "https://example.com:8443/a"
        );
    }

    #[test]
    fn normalize_drops_query_when_all_params_tracked() {
        assert_eq!(
            normalize_url("https://example.com/page?utm_source=x&utm_medium=y"),
            "https://example.com/page"
        );
    }

    #[test]
    fn url_hash_insensitive_to_representation() {
        let a = "https://Example.com:443/path/?utm_source=x&b=2&a=1#frag";
        let b = "https://example.com/path?a=1&b=2";
        assert_eq!(url_hash(a), url_hash(b));
    }

    #[test]
    fn checksum_deterministic_and_distinct() {
        assert_eq!(content_checksum("hello world"), content_checksum("hello world"));
        assert_ne!(content_checksum("hello"), content_checksum("world"));
    }

    #[test]
    fn simhash_ignores_case_and_punctuation() {
        let base = "Moscow officials announced a new transport policy today after the council vote.";
        let reformatted =
            "MOSCOW officials announced a new transport policy today, after the council vote!";
        let a = simhash64(base, "Transport update");
        let b = simhash64(reformatted, "Transport update");
        assert_eq!(hamming_distance(a, b), 0);
    }

    #[test]
    fn simhash_near_duplicates_are_close() {
        let base = "City hall confirmed on Tuesday that the regional transport authority will \
                    expand the suburban rail network, adding four stations and new rolling stock \
                    across the eastern corridor before the end of next year according to planners.";
        let similar = "City hall confirmed on Wednesday that the regional transport authority will \
                    expand the suburban rail network, adding four stations and new rolling stock \
                    across the eastern corridor before the end of next year according to planners.";
        let a = simhash64(base, "Transport update");
        let b = simhash64(similar, "Transport update");
        assert_eq!(hamming_distance(a, a), 0);
        assert!(hamming_distance(a, b) <= 20);
    }

    #[test]
    fn simhash_unrelated_texts_are_far() {
        let a = simhash64(
            "Moscow officials announced a new transport policy today.",
            "Transport update",
        );
        let b = simhash64(
            "Quarterly earnings beat analyst expectations across the banking sector.",
            "Markets digest",
        );
        assert!(hamming_distance(a, b) > 10);
    }
}
