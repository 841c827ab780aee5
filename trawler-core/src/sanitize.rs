// Filesystem-safe names for cache files

const FORBIDDEN: &[char] = &['\\', '/', '*', '?', ':', '"', '<', '>', '|'];

/// Replaces every path-illegal character with `_` and collapses runs of
/// `_` into one. Idempotent.
pub fn sanitize_filename(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_underscore = false;
    for ch in name.chars() {
        let ch = if FORBIDDEN.contains(&ch) { '_' } else { ch };
        if ch == '_' {
            if !last_underscore {
                out.push('_');
            }
            last_underscore = true;
        } else {
            out.push(ch);
            last_underscore = false;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_forbidden_characters() {
        let out = sanitize_filename("a/b:c*d");
        assert_eq!(out, "a_b_c_d");
        assert!(!out.contains(FORBIDDEN));
    }

    #[test]
    fn test_collapses_runs() {
        assert_eq!(sanitize_filename("10.1101/2024.01.01//v1"), "10.1101_2024.01.01_v1");
        assert_eq!(sanitize_filename("a___b"), "a_b");
        assert_eq!(sanitize_filename("\"10x\" chromium"), "_10x_ chromium");
    }

    #[test]
    fn test_idempotent() {
        for input in ["a/b:c*d", "<>|??", "plain", "x__/__y", "", "\\\\server\\share"] {
            let once = sanitize_filename(input);
            assert_eq!(sanitize_filename(&once), once, "input {:?}", input);
            assert!(!once.contains(FORBIDDEN) && !once.contains("__"));
        }
    }
}
