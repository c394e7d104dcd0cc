use crate::constants::{MAX_NAMESPACE_LEN, MAX_RELEASE_LEN, UNIQUE_ID_LEN};
use rand::distributions::Alphanumeric;
use rand::Rng;

/// Builds a Helm release name of the form `<base>-<suffix>-<id>`. Every component is normalized
/// to lowercase alphanumerics and hyphens, empty components are dropped, and the result is cut to
/// the Helm release name limit without leaving a hyphen at either end.
pub fn release_name(base: &str, suffix: &str, id: &str) -> String {
    join_truncated(&[base, suffix, id], MAX_RELEASE_LEN)
}

/// Builds a namespace name `<prefix>-<id>`, with `-<commit_sha>` appended when a commit is known.
pub fn namespace_name(prefix: &str, id: &str, commit_sha: Option<&str>) -> String {
    let mut components = vec![prefix, id];
    if let Some(sha) = commit_sha {
        components.push(sha);
    }
    join_truncated(&components, MAX_NAMESPACE_LEN)
}

/// A random lowercase alphanumeric id.
pub fn unique_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(UNIQUE_ID_LEN)
        .map(|c| char::from(c).to_ascii_lowercase())
        .collect()
}

/// Lowercases, trims and replaces everything outside `[a-z0-9-]` with a hyphen, then collapses
/// hyphen runs and trims hyphens from both ends.
pub fn normalize(component: &str) -> String {
    let replaced: String = component
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| match c {
            'a'..='z' | '0'..='9' | '-' => c,
            _ => '-',
        })
        .collect();
    let mut collapsed = String::with_capacity(replaced.len());
    for c in replaced.chars() {
        if c == '-' && collapsed.ends_with('-') {
            continue;
        }
        collapsed.push(c);
    }
    collapsed.trim_matches('-').to_string()
}

fn join_truncated(components: &[&str], max_len: usize) -> String {
    let joined = components
        .iter()
        .map(|component| normalize(component))
        .filter(|component| !component.is_empty())
        .collect::<Vec<_>>()
        .join("-");
    // Everything is ASCII at this point so byte truncation is safe.
    let truncated = if joined.len() > max_len {
        &joined[..max_len]
    } else {
        joined.as_str()
    };
    truncated.trim_matches('-').to_string()
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

#[cfg(test)]
mod test {
    use super::*;
    use regex::Regex;

    fn assert_valid(name: &str, max_len: usize) {
        let re = Regex::new("^[a-z0-9]([a-z0-9-]*[a-z0-9])?$").unwrap();
        assert!(name.len() <= max_len, "'{}' is longer than {}", name, max_len);
        assert!(re.is_match(name), "'{}' is not a valid name", name);
    }

    #[test]
    fn release_name_joins_components() {
        assert_eq!(release_name("zitadel", "pdb", "ab12cd"), "zitadel-pdb-ab12cd");
    }

    #[test]
    fn release_name_normalizes() {
        assert_eq!(
            release_name("  Zitadel_Test ", "Min.Available!!", "AB12cd"),
            "zitadel-test-min-available-ab12cd"
        );
    }

    #[test]
    fn release_name_drops_empty_components() {
        assert_eq!(release_name("zitadel", "", "ab12cd"), "zitadel-ab12cd");
        assert_eq!(release_name("zitadel", "___", "ab12cd"), "zitadel-ab12cd");
    }

    #[test]
    fn release_name_truncates_without_trailing_hyphen() {
        // The cut lands right after a hyphen.
        let base = "a".repeat(52);
        let name = release_name(&base, "suffix", "id");
        assert_eq!(name, base);
        assert_valid(&name, MAX_RELEASE_LEN);

        let name = release_name(&"x".repeat(80), "y", "z");
        assert_eq!(name.len(), MAX_RELEASE_LEN);
        assert_valid(&name, MAX_RELEASE_LEN);
    }

    #[test]
    fn release_name_is_deterministic() {
        assert_eq!(
            release_name("zitadel", "secrets", "q1w2e3"),
            release_name("zitadel", "secrets", "q1w2e3")
        );
    }

    #[test]
    fn unique_id_shape() {
        let re = Regex::new("^[a-z0-9]{6}$").unwrap();
        for _ in 0..50 {
            let id = unique_id();
            assert!(re.is_match(&id), "bad id '{}'", id);
        }
    }

    #[test]
    fn namespace_name_with_commit() {
        assert_eq!(namespace_name("e2e", "ab12cd", None), "e2e-ab12cd");
        assert_eq!(
            namespace_name("zitadel-test-login", "ab12cd", Some("0123abcdef")),
            "zitadel-test-login-ab12cd-0123abcdef"
        );
    }

    #[test]
    fn namespace_name_fits_limit() {
        let sha = "4582be1a9eeae5823aad17f58a58746696c43bcc";
        let name = namespace_name("zitadel-test-accessibility-with-tls", &unique_id(), Some(sha));
        assert_valid(&name, MAX_NAMESPACE_LEN);
    }
}
