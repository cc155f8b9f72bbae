//! Address filtering for capture targets.
//!
//! Policy checks run before anything touches the surface: a denied
//! address must produce no scrolls, no snapshots and no stored bytes.

use crate::error::{Error, Result};
use regex::Regex;
use url::Url;

/// Deny-then-allow address filter.
///
/// Deny patterns are regular expressions and always win; allow patterns
/// are glob-style, where `*` spans any run of characters. An address
/// passes only if it clears every deny pattern and matches at least one
/// allow pattern.
#[derive(Debug)]
pub struct AddressPolicy {
    deny: Vec<Regex>,
    allow: Vec<Regex>,
}

impl AddressPolicy {
    /// Compiles a policy from raw pattern strings. Bad patterns surface
    /// as configuration errors rather than silently admitting everything.
    pub fn new<S: AsRef<str>>(deny: &[S], allow: &[S]) -> Result<Self> {
        let deny = deny
            .iter()
            .map(|p| {
                Regex::new(p.as_ref())
                    .map_err(|e| Error::Config(format!("bad deny pattern '{}': {e}", p.as_ref())))
            })
            .collect::<Result<Vec<_>>>()?;
        let allow = allow
            .iter()
            .map(|p| glob_to_regex(p.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(AddressPolicy { deny, allow })
    }

    /// Checks an address, normalizing it first so lookalike spellings
    /// cannot sidestep a deny pattern.
    pub fn check(&self, address: &str) -> Result<()> {
        let url = Url::parse(address)
            .map_err(|_| Error::AddressNotPermitted(address.to_string()))?;
        let normalized = url.as_str();
        if self.deny.iter().any(|re| re.is_match(normalized)) {
            return Err(Error::AddressNotPermitted(normalized.to_string()));
        }
        if self.allow.iter().any(|re| re.is_match(normalized)) {
            Ok(())
        } else {
            Err(Error::AddressNotPermitted(normalized.to_string()))
        }
    }
}

/// Translates a glob into an anchored regex; everything except `*` is
/// matched literally.
fn glob_to_regex(glob: &str) -> Result<Regex> {
    let mut pattern = String::with_capacity(glob.len() + 8);
    pattern.push('^');
    for ch in glob.chars() {
        match ch {
            '*' => pattern.push_str(".*"),
            c if "\\.^$|?+()[]{}".contains(c) => {
                pattern.push('\\');
                pattern.push(c);
            }
            c => pattern.push(c),
        }
    }
    pattern.push('$');
    Regex::new(&pattern).map_err(|e| Error::Config(format!("bad allow pattern '{glob}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn web_policy() -> AddressPolicy {
        AddressPolicy::new(
            &[r"^https?://addons\.example\.test/.*"],
            &["http://*/*", "https://*/*", "file://*/*"],
        )
        .expect("patterns compile")
    }

    #[test]
    fn allows_ordinary_web_addresses() {
        let policy = web_policy();
        assert!(policy.check("https://example.com/a/b?c=1").is_ok());
        assert!(policy.check("http://localhost:8000/").is_ok());
    }

    #[test]
    fn deny_wins_over_allow() {
        let policy = web_policy();
        let err = policy
            .check("https://addons.example.test/store/page")
            .expect_err("deny pattern must win");
        assert!(matches!(err, Error::AddressNotPermitted(_)));
    }

    #[test]
    fn stock_config_denies_the_extension_store() {
        let config = crate::CaptureConfig::default();
        let policy = AddressPolicy::new(&config.deny_addresses, &config.allow_addresses)
            .expect("stock patterns compile");
        let err = policy
            .check("https://chrome.google.com/x")
            .expect_err("store pages are blocked despite the https allow");
        assert!(matches!(err, Error::AddressNotPermitted(_)));
        assert!(policy.check("https://example.com/x").is_ok());
    }

    #[test]
    fn unlisted_schemes_are_rejected() {
        let policy = web_policy();
        assert!(policy.check("about:blank").is_err());
        assert!(policy.check("data:text/html,hi").is_err());
    }

    #[test]
    fn unparseable_addresses_are_rejected() {
        let policy = web_policy();
        assert!(policy.check("not a url at all").is_err());
    }

    #[test]
    fn glob_translation_escapes_metacharacters() {
        let policy = AddressPolicy::new::<&str>(&[], &["https://a.b/?q=+*"]).expect("compiles");
        assert!(policy.check("https://a.b/?q=+anything").is_ok());
        // The literal dot must not match an arbitrary character.
        assert!(policy.check("https://aXb/?q=+x").is_err());
    }

    #[test]
    fn bad_deny_pattern_is_a_config_error() {
        let err = AddressPolicy::new(&["("], &["https://*/*"]).expect_err("bad regex");
        assert!(matches!(err, Error::Config(_)));
    }
}
