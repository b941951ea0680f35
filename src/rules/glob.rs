//! Minimal `*`-wildcard glob matcher for `user_agents` conditions.
//!
//! Intentionally hand-rolled: the grammar is a single wildcard character,
//! not worth pulling in a general glob crate for.

/// Returns true if `text` matches `pattern`, where `*` in `pattern` matches
/// any run of characters (including none).
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    match_from(&p, &t)
}

fn match_from(p: &[char], t: &[char]) -> bool {
    match p.first() {
        None => t.is_empty(),
        Some('*') => {
            // Either the star matches zero characters, or it consumes one
            // more character of `t` and we keep trying.
            match_from(&p[1..], t) || (!t.is_empty() && match_from(p, &t[1..]))
        }
        Some(c) => t.first() == Some(c) && match_from(&p[1..], &t[1..]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match() {
        assert!(glob_match("Mozilla", "Mozilla"));
        assert!(!glob_match("Mozilla", "mozilla"));
    }

    #[test]
    fn trailing_wildcard() {
        assert!(glob_match("Mozilla*", "Mozilla/5.0 (Macintosh)"));
    }

    #[test]
    fn leading_wildcard() {
        assert!(glob_match("*bot*", "Googlebot/2.1"));
    }

    #[test]
    fn multiple_wildcards() {
        assert!(glob_match("*bot*crawler*", "anybotsanycrawlerthing"));
        assert!(!glob_match("*bot*crawler*", "anybotthing"));
    }

    #[test]
    fn bare_star_matches_anything() {
        assert!(glob_match("*", ""));
        assert!(glob_match("*", "anything at all"));
    }

    #[test]
    fn no_wildcard_requires_exact_match() {
        assert!(!glob_match("curl", "curl/8.0"));
    }
}
