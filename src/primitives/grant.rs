//! Encapsulates the data bound to one authorization.
use super::Time;
use super::scope::Scope;

use std::collections::HashMap;

use url::Url;

/// Owning copy of a grant.
///
/// This binds a resource owner, a client, a scope and the parameters the authorization request
/// carried. It can be stored in a database without worrying about lifetimes or shared across
/// thread boundaries. All tokens derived from one authorization refer back to a single grant,
/// see the [`sessions`] module.
///
/// [`sessions`]: ../sessions/index.html
#[derive(Clone, Debug, PartialEq)]
pub struct Grant {
    /// Identifies the owner of the resource.
    pub owner_id: String,

    /// Identifies the client to which the grant was issued.
    pub client_id: String,

    /// The scope granted to the client.
    pub scope: Scope,

    /// The nonce from the authorization request, echoed into issued ID tokens.
    pub nonce: Option<String>,

    /// The redirection uri under which the client was contacted at issuance.
    pub redirect_uri: Url,

    /// The permission set computed for the owner by the authorization policy.
    pub permissions: Vec<String>,

    /// The embedded request object, kept for later claim resolution.
    pub oidc_request: Option<OidcRequest>,

    /// When the grant was created (Utc).
    pub issued_at: Time,

    /// Expiration date of the grant (Utc).
    pub until: Time,
}

/// A parsed embedded request object.
///
/// Clients can pass additional authorization parameters as a signed or encrypted sub-request,
/// inline in the `request` parameter or fetched from a `request_uri` reference. Only the
/// members that influence this provider are retained, everything else the object may carry is
/// dropped during parsing instead of being probed for dynamically.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OidcRequest {
    /// Overrides the maximum authentication age of the outer request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_age: Option<u64>,

    /// The claims the client requests for the ID token and the userinfo response.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claims: Option<ClaimsRequest>,
}

/// The `claims` member of a request object.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ClaimsRequest {
    /// Claims requested for the userinfo response.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub userinfo: Option<HashMap<String, Option<ClaimEntry>>>,

    /// Claims requested for the ID token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<HashMap<String, Option<ClaimEntry>>>,
}

/// Requirements attached to a single requested claim.
///
/// A claim can also be requested with a `null` entry, represented as `None` in the surrounding
/// map, in which case the claim is requested in its default manner.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ClaimEntry {
    /// Whether the claim is essential for the client to function.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub essential: Option<bool>,

    /// A specific value the claim is required to have.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    /// A set of admissible values for the claim.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<String>>,
}

impl OidcRequest {
    /// The subject the request requires, if any.
    ///
    /// A request object can pin the authorization to one specific end-user by requesting the
    /// `sub` claim of the ID token with a fixed value. When the currently authenticated user
    /// differs, the provider has to re-authenticate.
    pub fn required_subject(&self) -> Option<&str> {
        self.claims
            .as_ref()?
            .id_token
            .as_ref()?
            .get("sub")?
            .as_ref()?
            .value
            .as_deref()
    }

    /// The claim entries requested for the userinfo response.
    pub fn userinfo_claims(&self) -> Option<&HashMap<String, Option<ClaimEntry>>> {
        self.claims.as_ref()?.userinfo.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_subject_from_claims() {
        let raw = serde_json::json!({
            "max_age": 3600,
            "claims": {
                "id_token": {
                    "sub": { "value": "user-248289761001" },
                    "auth_time": { "essential": true },
                },
                "userinfo": {
                    "nickname": null,
                    "email": { "essential": true },
                },
            },
        });

        let request: OidcRequest = serde_json::from_value(raw).unwrap();
        assert_eq!(request.max_age, Some(3600));
        assert_eq!(request.required_subject(), Some("user-248289761001"));

        let userinfo = request.userinfo_claims().unwrap();
        assert!(userinfo.contains_key("nickname"));
        assert_eq!(
            userinfo["email"].as_ref().unwrap().essential,
            Some(true)
        );
    }

    #[test]
    fn no_subject_without_value() {
        let request: OidcRequest = serde_json::from_value(serde_json::json!({
            "claims": { "id_token": { "sub": null } },
        }))
        .unwrap();

        assert_eq!(request.required_subject(), None);
    }
}
