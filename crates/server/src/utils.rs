use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;

/// `len` bytes from the OS random source, URL-safe base64 without padding.
pub fn random_token(len: usize) -> Result<String, getrandom::Error> {
    let mut bytes = vec![0u8; len];
    getrandom::fill(&mut bytes)?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// Whether `url` is a same-origin path that may receive a one-time code.
///
/// Only absolute paths are accepted. Browsers resolve `//host` and `/\host` to
/// another origin, so a second leading slash is refused and backslashes or
/// control characters anywhere are refused too.
pub fn is_local_redirect(url: &str) -> bool {
    let Some(rest) = url.strip_prefix('/') else {
        return false;
    };
    !rest.starts_with('/') && !url.chars().any(|c| c.is_control() || c == '\\')
}

/// Appends `otc={code}` to a redirect target. A target that already carries a
/// query string gets the parameter appended with `&`.
pub fn with_otc(redirect_url: &str, code: &str) -> String {
    let sep = if redirect_url.contains('?') { '&' } else { '?' };
    format!("{redirect_url}{sep}otc={code}")
}

/// Normalizes a provider path segment: surrounding whitespace removed, lower case.
pub fn normalize_provider(name: &str) -> String {
    name.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_token_length_and_alphabet() {
        let a = random_token(32).unwrap();
        let b = random_token(32).unwrap();
        assert_eq!(a.len(), 43);
        assert_ne!(a, b);
        assert!(!a.contains('=') && !a.contains('+') && !a.contains('/'));
    }

    #[test]
    fn test_with_otc() {
        assert_eq!(with_otc("/app", "abc"), "/app?otc=abc");
        assert_eq!(with_otc("/done?x=1", "abc"), "/done?x=1&otc=abc");
    }

    #[test]
    fn test_is_local_redirect() {
        for ok in ["/", "/app", "/done?tab=2", "/a/b#frag", "/next?u=https://x.example"] {
            assert!(is_local_redirect(ok), "{ok} should be accepted");
        }
        for bad in [
            "",
            "app",
            "https://evil.example/x",
            "//evil.example/x",
            "/\\evil.example",
            "/app\\..\\x",
            "/app\r\nLocation: x",
            "/\t/evil.example",
            "javascript:alert(1)",
        ] {
            assert!(!is_local_redirect(bad), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn test_normalize_provider() {
        assert_eq!(normalize_provider("  Google "), "google");
    }
}
