use super::defaults::*;
use super::{Body, CraftedRequest, CraftedResponse, Status, TestEndpoint, ToSingleValueQuery};
use crate::endpoint::{AuthorizationFlow, UserInfoFlow};
use crate::primitives::jose::SigningAlg;
use crate::primitives::sessions::GrantStore;

use serde_json::Value;

/// Authorize with the given scope and promote the grant, returning the access token.
fn obtain_access_token(endpoint: &mut TestEndpoint, scope: &str) -> String {
    let request = CraftedRequest {
        query: Some(
            vec![
                ("response_type", "code"),
                ("client_id", EXAMPLE_CLIENT_ID),
                ("redirect_uri", EXAMPLE_REDIRECT_URI),
                ("scope", scope),
            ]
            .iter()
            .to_single_value_query(),
        ),
        cookie: Some(EXAMPLE_COOKIE.to_string()),
        ..CraftedRequest::default()
    };

    let response = AuthorizationFlow::prepare(&mut *endpoint)
        .expect("Failed to prepare")
        .execute(request)
        .expect("Authorization should not error");
    let location = response.location.expect("Expected a redirect location");
    let code = location
        .query_pairs()
        .find(|(key, _)| key == "code")
        .map(|(_, value)| value.into_owned())
        .expect("Expected a code");

    endpoint
        .sessions
        .promote(&code, false)
        .expect("Promotion failed")
        .access_token
}

fn execute(endpoint: &mut TestEndpoint, request: CraftedRequest) -> CraftedResponse {
    UserInfoFlow::prepare(endpoint)
        .expect("Failed to prepare")
        .execute(request)
        .expect("Should not error")
}

fn bearer_request(token: &str) -> CraftedRequest {
    CraftedRequest {
        auth: Some(format!("Bearer {}", token)),
        ..CraftedRequest::default()
    }
}

#[test]
fn scope_derived_claims_are_served() {
    let mut endpoint = TestEndpoint::new();
    let token = obtain_access_token(&mut endpoint, "openid email");

    let response = execute(&mut endpoint, bearer_request(&token));
    assert_eq!(response.status, Status::Ok);

    let body: serde_json::Map<String, Value> = match &response.body {
        Some(Body::Json(json)) => serde_json::from_str(json).unwrap(),
        other => panic!("Expected a json body, got {:?}", other),
    };
    assert_eq!(body.get("sub").and_then(Value::as_str), Some(EXAMPLE_OWNER_ID));
    assert_eq!(
        body.get("email").and_then(Value::as_str),
        Some("owner@example.com")
    );
    assert!(!body.contains_key("name"), "profile scope was not requested");
}

#[test]
fn token_in_the_form_body_works_too() {
    let mut endpoint = TestEndpoint::new();
    let token = obtain_access_token(&mut endpoint, "openid");

    let request = CraftedRequest {
        urlbody: Some(
            vec![("access_token", token.as_str())]
                .iter()
                .to_single_value_query(),
        ),
        ..CraftedRequest::default()
    };

    assert_eq!(execute(&mut endpoint, request).status, Status::Ok);
}

#[test]
fn a_code_is_not_an_access_token() {
    let mut endpoint = TestEndpoint::new();
    let request = CraftedRequest {
        query: Some(
            vec![
                ("response_type", "code"),
                ("client_id", EXAMPLE_CLIENT_ID),
                ("redirect_uri", EXAMPLE_REDIRECT_URI),
                ("scope", "openid"),
            ]
            .iter()
            .to_single_value_query(),
        ),
        cookie: Some(EXAMPLE_COOKIE.to_string()),
        ..CraftedRequest::default()
    };
    let response = AuthorizationFlow::prepare(&mut endpoint)
        .expect("Failed to prepare")
        .execute(request)
        .expect("Authorization should not error");
    let code = response
        .location
        .unwrap()
        .query_pairs()
        .find(|(key, _)| key == "code")
        .map(|(_, value)| value.into_owned())
        .unwrap();

    let response = execute(&mut endpoint, bearer_request(&code));
    assert_eq!(response.status, Status::Unauthorized);
    match &response.body {
        Some(Body::Json(json)) => assert!(json.contains("failed_authentication")),
        other => panic!("Expected a json error body, got {:?}", other),
    }
}

#[test]
fn revoked_tokens_are_denied() {
    let mut endpoint = TestEndpoint::new();
    let token = obtain_access_token(&mut endpoint, "openid");
    endpoint.sessions.revoke(&token).expect("Revocation failed");

    let response = execute(&mut endpoint, bearer_request(&token));
    assert_eq!(response.status, Status::Unauthorized);
    match &response.body {
        Some(Body::Json(json)) => assert!(json.contains("access_denied")),
        other => panic!("Expected a json error body, got {:?}", other),
    }
}

#[test]
fn signing_preference_turns_the_response_into_a_jwt() {
    let mut endpoint = TestEndpoint::new();

    // Re-register the client with a userinfo signing preference.
    let mut registration = crate::primitives::registrar::tests::bare_registration(
        EXAMPLE_CLIENT_ID,
        EXAMPLE_REDIRECT_URI,
    );
    registration.userinfo_signed_response_alg = Some(SigningAlg::Hs256);
    crate::primitives::registrar::Registrar::register(&mut endpoint.registrar, registration)
        .unwrap();

    let token = obtain_access_token(&mut endpoint, "openid");
    let response = execute(&mut endpoint, bearer_request(&token));

    assert_eq!(response.status, Status::Ok);
    match &response.body {
        Some(Body::Jwt(jwt)) => assert_eq!(jwt.split('.').count(), 3),
        other => panic!("Expected a jwt body, got {:?}", other),
    }
}
