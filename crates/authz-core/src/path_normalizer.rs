//! Pure function mapping a concrete request path to a policy pattern by
//! replacing ID-like segments with the `:id` sentinel.
//!
//! This module intentionally has no dependency on the rest of the crate: it
//! is safe to call from anywhere (registry lookups, policy rule authoring
//! tools, tests) without pulling in route/enforcer state.

const ID_SENTINEL: &str = ":id";

/// Normalizes a raw URL path into its policy pattern.
///
/// Splits on `/`, replacing each ID-like segment with `:id`, then rejoins.
/// A trailing `/` is stripped before splitting. Empty input and the root
/// path `/` are fixed points.
pub fn normalize(path: &str) -> String {
    if path.is_empty() {
        return String::new();
    }
    if path == "/" {
        return "/".to_string();
    }

    let trimmed = path.strip_suffix('/').unwrap_or(path);
    let leading_slash = trimmed.starts_with('/');

    let segments: Vec<&str> = trimmed.split('/').collect();
    let mut out = String::with_capacity(trimmed.len());
    let mut first = true;

    for seg in segments {
        if seg.is_empty() {
            // Preserves the leading slash (split on "/a/b" yields a leading
            // empty segment) without rewriting genuinely empty segments.
            if first && leading_slash {
                out.push('/');
            }
            first = false;
            continue;
        }
        if !first {
            out.push('/');
        }
        first = false;
        if is_id_segment(seg) {
            out.push_str(ID_SENTINEL);
        } else {
            out.push_str(seg);
        }
    }

    out
}

/// Tests, in order, whether a path segment should be treated as an
/// identifier rather than a literal route component.
fn is_id_segment(segment: &str) -> bool {
    is_all_digits(segment) || is_canonical_uuid(segment) || is_alphanumeric_id(segment)
}

fn is_all_digits(segment: &str) -> bool {
    !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit())
}

/// Accepts the canonical 8-4-4-4-12 hyphenated hex form only.
fn is_canonical_uuid(segment: &str) -> bool {
    let bytes = segment.as_bytes();
    if bytes.len() != 36 {
        return false;
    }
    for (i, b) in bytes.iter().enumerate() {
        match i {
            8 | 13 | 18 | 23 => {
                if *b != b'-' {
                    return false;
                }
            }
            _ => {
                if !b.is_ascii_hexdigit() {
                    return false;
                }
            }
        }
    }
    true
}

/// At least 3 characters, letters/digits/`-`/`_` only, and containing at
/// least one digit. Catches opaque/mixed tokens such as `abc-123-xyz` while
/// leaving plain dictionary words (`staff`, `profile`, `qualification`) as
/// literal route components — those segments carry no digit and so never
/// reach this rule.
fn is_alphanumeric_id(segment: &str) -> bool {
    segment.len() >= 3
        && segment.bytes().any(|b| b.is_ascii_digit())
        && segment
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_and_root_are_fixed_points() {
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("/"), "/");
    }

    #[test]
    fn numeric_segment_is_replaced() {
        assert_eq!(normalize("/api/v1/staff/123"), "/api/v1/staff/:id");
    }

    #[test]
    fn uuid_segment_is_replaced() {
        let path = "/api/v1/staff/qualification/550e8400-e29b-41d4-a716-446655440000";
        assert_eq!(
            normalize(path),
            "/api/v1/staff/qualification/:id"
        );
    }

    #[test]
    fn short_segments_are_not_rewritten() {
        assert_eq!(normalize("/a/b/c"), "/a/b/c");
        assert_eq!(normalize("/api/v1"), "/api/v1");
    }

    #[test]
    fn colon_and_empty_segments_are_not_ids() {
        assert_eq!(normalize("/api/:already"), "/api/:already");
    }

    #[test]
    fn trailing_slash_is_stripped() {
        assert_eq!(normalize("/api/v1/staff/123/"), "/api/v1/staff/:id");
    }

    #[test]
    fn mixed_alphanumeric_slug_with_a_digit_is_rewritten() {
        assert_eq!(normalize("/docs/abc-123-xyz"), "/docs/:id");
        assert_eq!(normalize("/docs/a1"), "/docs/a1");
    }

    #[test]
    fn dictionary_word_segments_stay_literal() {
        assert_eq!(normalize("/api/v1/staff/profile"), "/api/v1/staff/profile");
        assert_eq!(normalize("/docs/abc"), "/docs/abc");
    }

    #[test]
    fn literal_segments_around_a_trailing_id_are_preserved() {
        assert_eq!(
            normalize("/api/v1/staff/qualification/630"),
            "/api/v1/staff/qualification/:id"
        );
    }

    #[test]
    fn normalizing_a_pattern_is_idempotent() {
        let once = normalize("/api/v1/staff/qualification/630");
        let twice = normalize(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn non_canonical_uuid_still_matches_alphanumeric_rule() {
        // Not 36 bytes, so the UUID check rejects it, but it still matches
        // the "alphanumeric, length >= 3" fallback rule.
        assert_eq!(normalize("/x/550e8400-e29b-41d4-a716"), "/x/:id");
    }
}
