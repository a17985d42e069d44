//! Logged-in identity and credential checks.
//!
//! The identity is held in an explicit `AuthContext` passed by reference to
//! whatever needs it. Only `login` and `logout` mutate it.

use regex::Regex;
use std::sync::OnceLock;

use crate::error::{ClientError, ClientResult};

/// Paths whose 401 answers are part of normal flow and must not clear the session.
pub const AUTH_EXEMPT_PATHS: [&str; 3] = ["/login", "/register", "/check-auth"];

pub const MIN_PASSWORD_LEN: usize = 8;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AuthContext {
    email: Option<String>,
}

impl AuthContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn logged_in(email: impl Into<String>) -> Self {
        Self {
            email: Some(email.into()),
        }
    }

    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.email.is_some()
    }

    pub fn login(&mut self, email: impl Into<String>) {
        let email = email.into();
        log::info!("AuthContext: logged in as {}", email);
        self.email = Some(email);
    }

    pub fn logout(&mut self) {
        if let Some(email) = self.email.take() {
            log::info!("AuthContext: {} logged out", email);
        }
    }
}

/// True when a 401 from `path` should not end the session.
pub fn is_auth_exempt(path: &str) -> bool {
    let path = path.split('?').next().unwrap_or(path);
    AUTH_EXEMPT_PATHS.contains(&path)
}

fn email_re() -> &'static Regex {
    static EMAIL_RE: OnceLock<Regex> = OnceLock::new();
    EMAIL_RE.get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap())
}

/// Character classes a password must contain, with the message for each.
fn password_rules() -> &'static [(Regex, &'static str); 3] {
    static PASSWORD_RULES: OnceLock<[(Regex, &'static str); 3]> = OnceLock::new();
    PASSWORD_RULES.get_or_init(|| {
        [
            (Regex::new("[A-Z]").unwrap(), "an uppercase letter"),
            (Regex::new("[a-z]").unwrap(), "a lowercase letter"),
            (Regex::new("[0-9]").unwrap(), "a digit"),
        ]
    })
}

pub fn validate_email(email: &str) -> ClientResult<()> {
    if email_re().is_match(email.trim()) {
        Ok(())
    } else {
        Err(ClientError::Validation(format!(
            "'{}' is not a valid email address",
            email
        )))
    }
}

/// Mirrors the server's rules: at least 8 characters with an uppercase
/// letter, a lowercase letter and a digit.
pub fn validate_password(password: &str) -> ClientResult<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ClientError::Validation(format!(
            "password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    for (rule, what) in password_rules() {
        if !rule.is_match(password) {
            return Err(ClientError::Validation(format!(
                "password must contain {}",
                what
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_and_logout_are_the_only_transitions() {
        let mut auth = AuthContext::new();
        assert!(!auth.is_authenticated());
        auth.login("grower@example.com");
        assert_eq!(auth.email(), Some("grower@example.com"));
        auth.logout();
        assert_eq!(auth, AuthContext::new());
    }

    #[test]
    fn exempt_paths_ignore_query_strings() {
        assert!(is_auth_exempt("/login"));
        assert!(is_auth_exempt("/check-auth?x=1"));
        assert!(!is_auth_exempt("/history"));
        assert!(!is_auth_exempt("/api/predict"));
    }

    #[test]
    fn password_strength_rules() {
        assert!(validate_password("Leafy123").is_ok());
        for weak in ["Short1A", "alllower123", "ALLUPPER123", "NoDigitsHere"] {
            assert!(
                matches!(validate_password(weak), Err(ClientError::Validation(_))),
                "{weak} should be rejected"
            );
        }
    }

    #[test]
    fn email_shape() {
        assert!(validate_email("a@b.co").is_ok());
        assert!(validate_email("not-an-email").is_err());
    }

    #[test]
    fn patterns_are_compiled_once() {
        assert!(std::ptr::eq(email_re(), email_re()));
        assert!(std::ptr::eq(password_rules(), password_rules()));
        assert_eq!(password_rules().len(), 3);
    }
}
