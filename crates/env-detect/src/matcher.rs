use std::collections::HashMap;

use regex::Regex;

/// Check whether `hostname` matches a hostname glob pattern.
///
/// Returns the observed hostname on match so the detector can record it in
/// the diagnostic [`MatchedRule`](crate::rules::MatchedRule) list.
pub fn match_hostname(pattern: &str, hostname: &str) -> Option<String> {
    if glob_matches(pattern, hostname) {
        Some(hostname.to_string())
    } else {
        None
    }
}

/// Check an `env_var` rule pattern of the form `KEY=VALUE` against the
/// environment snapshot.  Matching is exact string equality on the named
/// variable's value.
pub fn match_env_var(pattern: &str, env_vars: &HashMap<String, String>) -> Option<String> {
    let Some((key, expected)) = pattern.split_once('=') else {
        tracing::warn!(pattern, "env_var rule pattern is missing '='; ignoring");
        return None;
    };
    let actual = env_vars.get(key)?;
    if actual == expected {
        Some(format!("{key}={actual}"))
    } else {
        None
    }
}

/// Check a `cloud_tag` rule pattern of the form `key=value-glob` against
/// the probed instance tags.  The key is matched exactly, the value as a
/// case-sensitive glob.
pub fn match_cloud_tag(pattern: &str, tags: &HashMap<String, String>) -> Option<String> {
    let Some((key, value_pattern)) = pattern.split_once('=') else {
        tracing::warn!(pattern, "cloud_tag rule pattern is missing '='; ignoring");
        return None;
    };
    let actual = tags.get(key)?;
    if glob_matches(value_pattern, actual) {
        Some(format!("{key}={actual}"))
    } else {
        None
    }
}

/// Check a `cloud_provider` rule pattern against the probed provider name.
/// Exact (case-sensitive) equality.
pub fn match_cloud_provider(pattern: &str, provider: &str) -> Option<String> {
    if pattern == provider {
        Some(provider.to_string())
    } else {
        None
    }
}

/// Simple glob matching: convert a pattern with `*` / `?` wildcards into an
/// anchored regex and test it against the full input string.  Matching is
/// case-sensitive.  An invalid pattern is treated as a non-match.
pub fn glob_matches(pattern: &str, input: &str) -> bool {
    let mut regex_str = String::with_capacity(pattern.len() + 4);
    regex_str.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => regex_str.push_str(".*"),
            '?' => regex_str.push('.'),
            // Escape regex-special characters.
            '.' | '+' | '(' | ')' | '[' | ']' | '{' | '}' | '^' | '$' | '\\' | '|' => {
                regex_str.push('\\');
                regex_str.push(ch);
            }
            _ => regex_str.push(ch),
        }
    }
    regex_str.push('$');

    match Regex::new(&regex_str) {
        Ok(re) => re.is_match(input),
        Err(e) => {
            tracing::warn!(pattern, error = %e, "invalid glob pattern; treating as non-match");
            false
        }
    }
}
