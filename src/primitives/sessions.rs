//! Tracks grants and every token derived from them.
//!
//! One successful authorization creates a session: the grant itself plus the authorization
//! code, access token, refresh token and ID token that get minted for it over time. All of
//! these artifacts key back to the same session so that revocation can fan out and so that
//! the userinfo endpoint can resolve any presented token to its grant.
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, MutexGuard, RwLockWriteGuard};

use chrono::{Duration, Utc};

use super::Time;
use super::generator::TagGrant;
use super::grant::Grant;
use super::scope::Scope;

/// The kind of artifact a presented string token turned out to be.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenKind {
    /// A single-use authorization code.
    Code,
    /// A bearer access token.
    Access,
    /// A refresh token.
    Refresh,
}

/// Failures of grant store operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreError {
    /// The key did not resolve to a usable grant: unknown, expired, or a code presented twice.
    InvalidGrant,

    /// The grant exists but has been revoked.
    AlreadyRevoked,

    /// Something went wrong inside the store that has no protocol meaning.
    Primitive,
}

/// The tokens minted by a promotion or refresh.
#[derive(Clone, Debug, PartialEq)]
pub struct TokenBundle {
    /// The bearer access token.
    pub access_token: String,

    /// The refresh token, if one was requested.
    pub refresh_token: Option<String>,

    /// Expiration timestamp of the access token (Utc).
    pub until: Time,

    /// The scope the underlying grant was issued for.
    pub scope: Scope,
}

/// The artifacts allocated for a freshly created session.
#[derive(Clone, Debug)]
pub struct CreatedSession {
    /// The opaque session id. Promotion by sid is what the implicit flow uses.
    pub sid: String,

    /// The freshly minted, single-use authorization code.
    pub code: String,
}

/// Stores create and mutate the grant lifecycle.
///
/// All operations are atomic per key: the exclusive `&mut self` receiver serializes mutations,
/// and the guard implementations below extend that contract to stores shared behind a lock.
/// In particular a code can be promoted successfully at most once, no matter how many callers
/// race on it, and a revocation is visible to every subsequent call.
pub trait GrantStore {
    /// Allocate a session for the grant, minting a fresh authorization code.
    fn create(&mut self, grant: Grant) -> Result<CreatedSession, StoreError>;

    /// Trade an authorization code, or the session id itself, for an access token.
    ///
    /// Fails with `AlreadyRevoked` when the session was revoked and with `InvalidGrant` when a
    /// code is presented a second time. A refresh token is only minted when asked for.
    fn promote(&mut self, key: &str, issue_refresh: bool) -> Result<TokenBundle, StoreError>;

    /// Mint a new access token for the session owning this refresh token.
    ///
    /// The refresh token itself stays valid: it does not expire and carries no reuse bound,
    /// revocation of the session is the only way to retire it. Callers rotate the ID token
    /// alongside when the grant scope includes `openid`.
    fn refresh(&mut self, refresh_token: &str) -> Result<TokenBundle, StoreError>;

    /// Revoke the session the key belongs to, cascading to all its artifacts.
    ///
    /// Revocation is monotonic, revoking an already revoked session is a no-op.
    fn revoke(&mut self, key: &str) -> Result<(), StoreError>;

    /// Whether the session owning this artifact has been revoked.
    fn is_revoked(&self, key: &str) -> Result<bool, StoreError>;

    /// The grant a code, access token or refresh token belongs to.
    fn lookup(&self, key: &str) -> Result<Option<Grant>, StoreError>;

    /// Determine what kind of artifact was presented, without resolving the grant.
    fn token_kind(&self, key: &str) -> Result<Option<TokenKind>, StoreError>;

    /// Remember the last ID token issued under the session.
    fn record_id_token(&mut self, key: &str, id_token: String) -> Result<(), StoreError>;

    /// The ID token last issued under the session, if any.
    fn last_id_token(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Drop the authorization code of a session that will never exchange it.
    ///
    /// Used when the response type did not include `code`, so that the allocated code can not
    /// be replayed out of band.
    fn clear_code(&mut self, sid: &str) -> Result<(), StoreError>;
}

struct Session {
    grant: Grant,
    code: Option<Arc<str>>,
    code_consumed: bool,
    access: Option<Arc<str>>,
    refresh: Option<Arc<str>>,
    id_token: Option<String>,
    revoked: bool,
}

/// An in-memory implementation of `GrantStore`.
///
/// Keeps a map of sessions plus an index from every minted artifact back to its session. The
/// token generator is trait based and chosen during construction; it is assumed to not be
/// possible (or at least very unlikely during their overlapping lifetime) for two different
/// grants to generate the same token.
pub struct SessionMap<G: TagGrant = Box<dyn TagGrant + Send + Sync + 'static>> {
    generator: G,
    usage: u64,
    code_duration: Duration,
    access_duration: Duration,
    sessions: HashMap<Arc<str>, Session>,
    index: HashMap<Arc<str>, (TokenKind, Arc<str>)>,
}

impl<G: TagGrant> SessionMap<G> {
    /// Construct a `SessionMap` issuing tokens with the given generator.
    ///
    /// Codes are valid for ten minutes and access tokens for one hour unless overridden.
    pub fn new(generator: G) -> Self {
        SessionMap {
            generator,
            usage: 0,
            code_duration: Duration::minutes(10),
            access_duration: Duration::hours(1),
            sessions: HashMap::new(),
            index: HashMap::new(),
        }
    }

    /// Set the validity of authorization codes.
    pub fn codes_valid_for(&mut self, duration: Duration) {
        self.code_duration = duration;
    }

    /// Set the validity of issued access tokens.
    pub fn tokens_valid_for(&mut self, duration: Duration) {
        self.access_duration = duration;
    }

    fn next_tag(&mut self, grant: &Grant) -> Result<String, StoreError> {
        // The (usage, grant) tuple needs to be unique. Since this wraps after 2^64 operations,
        // we expect the validity time of the grant to have changed by then.
        let tag = self.generator.tag(self.usage, grant).map_err(|()| StoreError::Primitive)?;
        debug_assert!(!tag.is_empty(), "An empty token was generated, this is horribly insecure.");
        self.usage = self.usage.wrapping_add(1);
        Ok(tag)
    }

    fn resolve(&self, key: &str) -> Option<&Arc<str>> {
        if let Some((sid, _)) = self.sessions.get_key_value(key) {
            return Some(sid);
        }
        self.index.get(key).map(|(_, sid)| sid)
    }

    fn mint_access(&mut self, sid: Arc<str>, issue_refresh: bool) -> Result<TokenBundle, StoreError> {
        let until = Utc::now() + self.access_duration;

        let session = self.sessions.get(&sid).ok_or(StoreError::InvalidGrant)?;
        let grant = session.grant.clone();
        let access = self.next_tag(&grant)?;
        let refresh = if issue_refresh { Some(self.next_tag(&grant)?) } else { None };

        let session = self.sessions.get_mut(&sid).ok_or(StoreError::Primitive)?;
        session.grant.until = until;

        // A re-promotion rotates the access token, the previous one stops resolving.
        if let Some(old) = session.access.take() {
            self.index.remove(&old);
        }

        let access_key: Arc<str> = Arc::from(access.as_str());
        session.access = Some(access_key.clone());
        let scope = session.grant.scope.clone();

        if let Some(refresh) = &refresh {
            let refresh_key: Arc<str> = Arc::from(refresh.as_str());
            session.refresh = Some(refresh_key.clone());
            self.index.insert(refresh_key, (TokenKind::Refresh, sid.clone()));
        }
        self.index.insert(access_key, (TokenKind::Access, sid));

        Ok(TokenBundle {
            access_token: access,
            refresh_token: refresh,
            until,
            scope,
        })
    }
}

impl<G: TagGrant> GrantStore for SessionMap<G> {
    fn create(&mut self, mut grant: Grant) -> Result<CreatedSession, StoreError> {
        grant.until = Utc::now() + self.code_duration;

        let sid = self.next_tag(&grant)?;
        let code = self.next_tag(&grant)?;

        let sid_key: Arc<str> = Arc::from(sid.as_str());
        let code_key: Arc<str> = Arc::from(code.as_str());

        self.index.insert(code_key.clone(), (TokenKind::Code, sid_key.clone()));
        self.sessions.insert(
            sid_key,
            Session {
                grant,
                code: Some(code_key),
                code_consumed: false,
                access: None,
                refresh: None,
                id_token: None,
                revoked: false,
            },
        );

        Ok(CreatedSession { sid, code })
    }

    fn promote(&mut self, key: &str, issue_refresh: bool) -> Result<TokenBundle, StoreError> {
        let by_code = !self.sessions.contains_key(key);
        let sid = self.resolve(key).cloned().ok_or(StoreError::InvalidGrant)?;

        let session = self.sessions.get_mut(&sid).ok_or(StoreError::Primitive)?;
        if session.revoked {
            return Err(StoreError::AlreadyRevoked);
        }

        if by_code {
            match self.index.get(key) {
                Some((TokenKind::Code, _)) => (),
                _ => return Err(StoreError::InvalidGrant),
            }
            // Exactly once: the first promotion consumes the code, all others fail here.
            if session.code_consumed {
                return Err(StoreError::InvalidGrant);
            }
            session.code_consumed = true;
        }

        self.mint_access(sid, issue_refresh)
    }

    fn refresh(&mut self, refresh_token: &str) -> Result<TokenBundle, StoreError> {
        let sid = match self.index.get(refresh_token) {
            Some((TokenKind::Refresh, sid)) => sid.clone(),
            _ => return Err(StoreError::InvalidGrant),
        };

        let session = self.sessions.get(&sid).ok_or(StoreError::Primitive)?;
        if session.revoked {
            return Err(StoreError::InvalidGrant);
        }

        self.mint_access(sid, false)
    }

    fn revoke(&mut self, key: &str) -> Result<(), StoreError> {
        let sid = self.resolve(key).cloned().ok_or(StoreError::InvalidGrant)?;
        let session = self.sessions.get_mut(&sid).ok_or(StoreError::Primitive)?;
        session.revoked = true;
        Ok(())
    }

    fn is_revoked(&self, key: &str) -> Result<bool, StoreError> {
        let sid = self.resolve(key).ok_or(StoreError::InvalidGrant)?;
        let session = self.sessions.get(sid).ok_or(StoreError::Primitive)?;
        Ok(session.revoked)
    }

    fn lookup(&self, key: &str) -> Result<Option<Grant>, StoreError> {
        let sid = match self.resolve(key) {
            Some(sid) => sid,
            None => return Ok(None),
        };
        Ok(self.sessions.get(sid).map(|session| session.grant.clone()))
    }

    fn token_kind(&self, key: &str) -> Result<Option<TokenKind>, StoreError> {
        Ok(self.index.get(key).map(|(kind, _)| *kind))
    }

    fn record_id_token(&mut self, key: &str, id_token: String) -> Result<(), StoreError> {
        let sid = self.resolve(key).cloned().ok_or(StoreError::InvalidGrant)?;
        let session = self.sessions.get_mut(&sid).ok_or(StoreError::Primitive)?;
        session.id_token = Some(id_token);
        Ok(())
    }

    fn last_id_token(&self, key: &str) -> Result<Option<String>, StoreError> {
        let sid = self.resolve(key).ok_or(StoreError::InvalidGrant)?;
        let session = self.sessions.get(sid).ok_or(StoreError::Primitive)?;
        Ok(session.id_token.clone())
    }

    fn clear_code(&mut self, sid: &str) -> Result<(), StoreError> {
        let session = self.sessions.get_mut(sid).ok_or(StoreError::InvalidGrant)?;
        if let Some(code) = session.code.take() {
            self.index.remove(&code);
        }
        session.code_consumed = true;
        Ok(())
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            StoreError::InvalidGrant => fmt.write_str("grant is unknown, expired or consumed"),
            StoreError::AlreadyRevoked => fmt.write_str("grant has been revoked"),
            StoreError::Primitive => fmt.write_str("grant store failed internally"),
        }
    }
}

impl std::error::Error for StoreError {}

impl<'a, S: GrantStore + ?Sized> GrantStore for &'a mut S {
    fn create(&mut self, grant: Grant) -> Result<CreatedSession, StoreError> {
        (**self).create(grant)
    }

    fn promote(&mut self, key: &str, issue_refresh: bool) -> Result<TokenBundle, StoreError> {
        (**self).promote(key, issue_refresh)
    }

    fn refresh(&mut self, refresh_token: &str) -> Result<TokenBundle, StoreError> {
        (**self).refresh(refresh_token)
    }

    fn revoke(&mut self, key: &str) -> Result<(), StoreError> {
        (**self).revoke(key)
    }

    fn is_revoked(&self, key: &str) -> Result<bool, StoreError> {
        (**self).is_revoked(key)
    }

    fn lookup(&self, key: &str) -> Result<Option<Grant>, StoreError> {
        (**self).lookup(key)
    }

    fn token_kind(&self, key: &str) -> Result<Option<TokenKind>, StoreError> {
        (**self).token_kind(key)
    }

    fn record_id_token(&mut self, key: &str, id_token: String) -> Result<(), StoreError> {
        (**self).record_id_token(key, id_token)
    }

    fn last_id_token(&self, key: &str) -> Result<Option<String>, StoreError> {
        (**self).last_id_token(key)
    }

    fn clear_code(&mut self, sid: &str) -> Result<(), StoreError> {
        (**self).clear_code(sid)
    }
}

impl<S: GrantStore + ?Sized> GrantStore for Box<S> {
    fn create(&mut self, grant: Grant) -> Result<CreatedSession, StoreError> {
        (**self).create(grant)
    }

    fn promote(&mut self, key: &str, issue_refresh: bool) -> Result<TokenBundle, StoreError> {
        (**self).promote(key, issue_refresh)
    }

    fn refresh(&mut self, refresh_token: &str) -> Result<TokenBundle, StoreError> {
        (**self).refresh(refresh_token)
    }

    fn revoke(&mut self, key: &str) -> Result<(), StoreError> {
        (**self).revoke(key)
    }

    fn is_revoked(&self, key: &str) -> Result<bool, StoreError> {
        (**self).is_revoked(key)
    }

    fn lookup(&self, key: &str) -> Result<Option<Grant>, StoreError> {
        (**self).lookup(key)
    }

    fn token_kind(&self, key: &str) -> Result<Option<TokenKind>, StoreError> {
        (**self).token_kind(key)
    }

    fn record_id_token(&mut self, key: &str, id_token: String) -> Result<(), StoreError> {
        (**self).record_id_token(key, id_token)
    }

    fn last_id_token(&self, key: &str) -> Result<Option<String>, StoreError> {
        (**self).last_id_token(key)
    }

    fn clear_code(&mut self, sid: &str) -> Result<(), StoreError> {
        (**self).clear_code(sid)
    }
}

impl<'a, S: GrantStore + ?Sized + 'a> GrantStore for MutexGuard<'a, S> {
    fn create(&mut self, grant: Grant) -> Result<CreatedSession, StoreError> {
        (**self).create(grant)
    }

    fn promote(&mut self, key: &str, issue_refresh: bool) -> Result<TokenBundle, StoreError> {
        (**self).promote(key, issue_refresh)
    }

    fn refresh(&mut self, refresh_token: &str) -> Result<TokenBundle, StoreError> {
        (**self).refresh(refresh_token)
    }

    fn revoke(&mut self, key: &str) -> Result<(), StoreError> {
        (**self).revoke(key)
    }

    fn is_revoked(&self, key: &str) -> Result<bool, StoreError> {
        (**self).is_revoked(key)
    }

    fn lookup(&self, key: &str) -> Result<Option<Grant>, StoreError> {
        (**self).lookup(key)
    }

    fn token_kind(&self, key: &str) -> Result<Option<TokenKind>, StoreError> {
        (**self).token_kind(key)
    }

    fn record_id_token(&mut self, key: &str, id_token: String) -> Result<(), StoreError> {
        (**self).record_id_token(key, id_token)
    }

    fn last_id_token(&self, key: &str) -> Result<Option<String>, StoreError> {
        (**self).last_id_token(key)
    }

    fn clear_code(&mut self, sid: &str) -> Result<(), StoreError> {
        (**self).clear_code(sid)
    }
}

impl<'a, S: GrantStore + ?Sized + 'a> GrantStore for RwLockWriteGuard<'a, S> {
    fn create(&mut self, grant: Grant) -> Result<CreatedSession, StoreError> {
        (**self).create(grant)
    }

    fn promote(&mut self, key: &str, issue_refresh: bool) -> Result<TokenBundle, StoreError> {
        (**self).promote(key, issue_refresh)
    }

    fn refresh(&mut self, refresh_token: &str) -> Result<TokenBundle, StoreError> {
        (**self).refresh(refresh_token)
    }

    fn revoke(&mut self, key: &str) -> Result<(), StoreError> {
        (**self).revoke(key)
    }

    fn is_revoked(&self, key: &str) -> Result<bool, StoreError> {
        (**self).is_revoked(key)
    }

    fn lookup(&self, key: &str) -> Result<Option<Grant>, StoreError> {
        (**self).lookup(key)
    }

    fn token_kind(&self, key: &str) -> Result<Option<TokenKind>, StoreError> {
        (**self).token_kind(key)
    }

    fn record_id_token(&mut self, key: &str, id_token: String) -> Result<(), StoreError> {
        (**self).record_id_token(key, id_token)
    }

    fn last_id_token(&self, key: &str) -> Result<Option<String>, StoreError> {
        (**self).last_id_token(key)
    }

    fn clear_code(&mut self, sid: &str) -> Result<(), StoreError> {
        (**self).clear_code(sid)
    }
}
