//! Defines the Scope type, its subset ordering, and the fixed scope-to-claims table.
use std::{cmp, fmt, str};

use std::collections::HashSet;
use serde::{Deserialize, Serialize};

/// Scope of a grant or resource, a set of scope-tokens separated by spaces.
///
/// Scopes are interpreted as a conjunction of scope tokens. This induces a partial ordering on
/// scopes where scope `A` is less or equal than scope `B` if all scope tokens of `A` are also
/// found in `B`. A refresh request for example must not ask for a scope exceeding the one
/// originally granted, i.e. the requested scope must compare less or equal.
///
/// The scope token `openid` is what turns a plain OAuth2 authorization into an OpenID Connect
/// one and triggers ID token issuance, see [`claims_for`] for the claim names the standard
/// scopes map to.
///
/// Scope-tokens are restricted to the following subset of ascii:
///   - The character '!'
///   - The character range '\x23' to '\x5b' which includes numbers and upper case letters
///   - The character range '\x5d' to '\x7e' which includes lower case letters
/// Individual scope-tokens are separated by spaces.
///
/// In particular, the characters '\x22' (`"`) and '\x5c' (`\`)  are not allowed.
///
/// [`claims_for`]: fn.claims_for.html
#[derive(Clone, PartialEq, Eq)]
pub struct Scope {
    tokens: HashSet<String>,
}

impl Serialize for Scope {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Scope {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let string: String = Deserialize::deserialize(deserializer)?;
        str::FromStr::from_str(&string).map_err(serde::de::Error::custom)
    }
}

impl Scope {
    fn invalid_scope_char(ch: char) -> bool {
        match ch {
            '\x21' => false,
            ch if ('\x23'..='\x5b').contains(&ch) => false,
            ch if ('\x5d'..='\x7e').contains(&ch) => false,
            ' ' => false, // Space separator is a valid char
            _ => true,
        }
    }

    /// Determines if this scope has enough privileges to access some resource requiring the
    /// scope on the right side. This operation is equivalent to comparison via `>=`.
    pub fn privileged_to(&self, rhs: &Scope) -> bool {
        rhs <= self
    }

    /// Determines if a resource protected by this scope should allow access to a token with the
    /// grant on the right side. This operation is equivalent to comparison via `<=`.
    pub fn allow_access(&self, rhs: &Scope) -> bool {
        self <= rhs
    }

    /// Whether the scope includes the given token, e.g. `openid`.
    pub fn contains(&self, token: &str) -> bool {
        self.tokens.contains(token)
    }

    /// Create an iterator over the individual scope tokens.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.tokens.iter().map(AsRef::as_ref)
    }
}

/// The claim names a standard OpenID Connect scope token resolves to.
///
/// This is the fixed table of Section 5.4 of the OpenID Connect Core specification. Scope
/// tokens outside the table carry no userinfo claims and resolve to `None`.
pub fn claims_for(scope_token: &str) -> Option<&'static [&'static str]> {
    const PROFILE: &[&str] = &[
        "name",
        "given_name",
        "family_name",
        "middle_name",
        "nickname",
        "profile",
        "picture",
        "website",
        "gender",
        "birthdate",
        "zoneinfo",
        "locale",
        "updated_at",
        "preferred_username",
    ];

    match scope_token {
        "openid" => Some(&["sub"]),
        "profile" => Some(PROFILE),
        "email" => Some(&["email", "email_verified"]),
        "address" => Some(&["address"]),
        "phone" => Some(&["phone_number", "phone_number_verified"]),
        _ => None,
    }
}

/// Error returned from parsing a scope as encoded in an authorization request.
#[derive(Debug)]
pub enum ParseScopeErr {
    /// A character was encountered which is not allowed to appear in scope strings.
    InvalidCharacter(char),
}

impl str::FromStr for Scope {
    type Err = ParseScopeErr;

    fn from_str(string: &str) -> Result<Scope, ParseScopeErr> {
        if let Some(ch) = string.chars().find(|&ch| Scope::invalid_scope_char(ch)) {
            return Err(ParseScopeErr::InvalidCharacter(ch));
        }
        let tokens = string.split(' ').filter(|s| !s.is_empty());
        Ok(Scope {
            tokens: tokens.map(str::to_string).collect(),
        })
    }
}

impl fmt::Display for ParseScopeErr {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        match self {
            ParseScopeErr::InvalidCharacter(chr) => {
                write!(fmt, "Encountered invalid character in scope: {}", chr)
            }
        }
    }
}

impl std::error::Error for ParseScopeErr {}

impl fmt::Debug for Scope {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_tuple("Scope").field(&self.tokens).finish()
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        let output = self
            .tokens
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(" ");
        fmt.write_str(&output)
    }
}

impl PartialOrd for Scope {
    fn partial_cmp(&self, rhs: &Self) -> Option<cmp::Ordering> {
        let intersect_count = self.tokens.intersection(&rhs.tokens).count();
        if intersect_count == self.tokens.len() && intersect_count == rhs.tokens.len() {
            Some(cmp::Ordering::Equal)
        } else if intersect_count == self.tokens.len() {
            Some(cmp::Ordering::Less)
        } else if intersect_count == rhs.tokens.len() {
            Some(cmp::Ordering::Greater)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parsing_roundtrip() {
        let scope = "openid profile email".parse::<Scope>().unwrap();
        let formatted = scope.to_string();
        let parsed = formatted.parse::<Scope>().unwrap();
        assert_eq!(scope, parsed);

        assert!(scope.contains("openid"));
        assert!(scope.contains("profile"));
        assert!(!scope.contains("phone"));
    }

    #[test]
    fn reject_invalid_characters() {
        assert!("\"openid\"".parse::<Scope>().is_err());
        assert!("open\\id".parse::<Scope>().is_err());
    }

    #[test]
    fn subset_ordering() {
        let granted = "openid profile".parse::<Scope>().unwrap();
        let narrower = "openid".parse::<Scope>().unwrap();
        let disjoint = "openid email".parse::<Scope>().unwrap();

        assert_eq!(granted.partial_cmp(&narrower), Some(cmp::Ordering::Greater));
        assert_eq!(narrower.partial_cmp(&granted), Some(cmp::Ordering::Less));
        assert_eq!(granted.partial_cmp(&disjoint), None);

        assert!(granted.privileged_to(&narrower));
        assert!(narrower.allow_access(&granted));
        assert!(!granted.allow_access(&narrower));
    }

    #[test]
    fn standard_claim_names() {
        assert_eq!(claims_for("openid"), Some(&["sub"][..]));
        assert!(claims_for("profile").unwrap().contains(&"given_name"));
        assert!(claims_for("email").unwrap().contains(&"email_verified"));
        assert_eq!(claims_for("not-a-scope"), None);
    }
}
