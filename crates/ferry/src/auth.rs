//! Registry token lookup.
//!
//! The token is read from the environment only. It is wrapped in
//! [`AuthToken`] as soon as it is read so that it cannot reach logs,
//! receipts or error messages through `Debug` or `Display`.

use std::env;

use ferry_types::AuthToken;

/// Variable consulted when the configured one is unset, so ferry works
/// unchanged inside GitHub Actions.
pub const FALLBACK_TOKEN_ENV: &str = "GITHUB_TOKEN";

/// Where a token was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenSource {
    Env(String),
}

impl std::fmt::Display for TokenSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenSource::Env(name) => write!(f, "${name}"),
        }
    }
}

/// Resolve the registry token.
///
/// Resolution order:
/// 1) `primary_env` (from `release.token_env`, `FERRY_TOKEN` by default)
/// 2) `GITHUB_TOKEN`
///
/// Blank values are treated as unset. Returns `None` if nothing is configured.
pub fn resolve_token(primary_env: &str) -> Option<(AuthToken, TokenSource)> {
    [primary_env, FALLBACK_TOKEN_ENV]
        .into_iter()
        .find_map(|name| token_from_env(name).map(|tok| (tok, TokenSource::Env(name.to_string()))))
}

fn token_from_env(name: &str) -> Option<AuthToken> {
    let value = env::var(name).ok()?;
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    Some(AuthToken::new(value))
}

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::*;

    #[test]
    #[serial]
    fn primary_variable_wins() {
        temp_env::with_vars(
            [
                ("FERRY_TEST_TOKEN", Some("primary")),
                (FALLBACK_TOKEN_ENV, Some("fallback")),
            ],
            || {
                let (tok, source) = resolve_token("FERRY_TEST_TOKEN").expect("token");
                assert_eq!(tok.expose(), "primary");
                assert_eq!(source, TokenSource::Env("FERRY_TEST_TOKEN".to_string()));
            },
        );
    }

    #[test]
    #[serial]
    fn falls_back_to_github_token() {
        temp_env::with_vars(
            [
                ("FERRY_TEST_TOKEN", None),
                (FALLBACK_TOKEN_ENV, Some("  from-actions \n")),
            ],
            || {
                let (tok, source) = resolve_token("FERRY_TEST_TOKEN").expect("token");
                assert_eq!(tok.expose(), "from-actions");
                assert_eq!(source.to_string(), "$GITHUB_TOKEN");
            },
        );
    }

    #[test]
    #[serial]
    fn blank_values_are_unset() {
        temp_env::with_vars(
            [
                ("FERRY_TEST_TOKEN", Some("   ")),
                (FALLBACK_TOKEN_ENV, Some("")),
            ],
            || {
                assert!(resolve_token("FERRY_TEST_TOKEN").is_none());
            },
        );
    }

    #[test]
    #[serial]
    fn token_is_not_printable() {
        temp_env::with_var("FERRY_TEST_TOKEN", Some("s3cr3t"), || {
            let (tok, _) = resolve_token("FERRY_TEST_TOKEN").expect("token");
            assert!(!format!("{tok:?}").contains("s3cr3t"));
            assert!(!format!("{tok}").contains("s3cr3t"));
        });
    }
}
