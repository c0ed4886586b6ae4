use std::collections::HashMap;

use super::defaults::*;
use super::{
    Body, CraftedRequest, CraftedResponse, Status, TestEndpoint, ToSingleValueQuery,
};
use crate::endpoint::AuthorizationFlow;

use base64::{encode_config, URL_SAFE_NO_PAD};
use url::Url;

fn execute(endpoint: &mut TestEndpoint, request: CraftedRequest) -> CraftedResponse {
    AuthorizationFlow::prepare(endpoint)
        .expect("Failed to prepare")
        .execute(request)
        .expect("Should not error")
}

fn authorize_request(params: &[(&str, &str)]) -> CraftedRequest {
    CraftedRequest {
        query: Some(params.iter().to_single_value_query()),
        cookie: Some(EXAMPLE_COOKIE.to_string()),
        ..CraftedRequest::default()
    }
}

fn query_params(url: &Url) -> HashMap<String, String> {
    url.query_pairs()
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect()
}

fn fragment_params(url: &Url) -> HashMap<String, String> {
    let fragment = url.fragment().expect("Expected fragment placement");
    url::form_urlencoded::parse(fragment.as_bytes())
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect()
}

#[test]
fn code_flow_redirects_with_code_in_query() {
    let mut endpoint = TestEndpoint::new();
    let response = execute(
        &mut endpoint,
        authorize_request(&[
            ("response_type", "code"),
            ("client_id", EXAMPLE_CLIENT_ID),
            ("redirect_uri", EXAMPLE_REDIRECT_URI),
            ("scope", "openid profile"),
            ("state", "opaque-state"),
        ]),
    );

    assert_eq!(response.status, Status::Redirect);
    let location = response.location.expect("Expected a redirect location");
    assert!(location.as_str().starts_with(EXAMPLE_REDIRECT_URI));
    assert!(location.fragment().is_none());

    let params = query_params(&location);
    assert!(params.contains_key("code"));
    assert_eq!(params.get("state").map(String::as_str), Some("opaque-state"));
    assert!(!params.contains_key("access_token"));

    // The single-sign-on cookie is attached on success.
    assert!(response
        .cookies
        .iter()
        .any(|(name, value)| name == "oxide-oidc" && value.contains(EXAMPLE_OWNER_ID)));
}

#[test]
fn anonymous_browser_gets_the_login_page() {
    // No identity behind the cookie: the orchestrator halts and delegates to the
    // authentication machinery instead of issuing anything.
    let mut endpoint = TestEndpoint::new().anonymous();
    let response = execute(
        &mut endpoint,
        authorize_request(&[
            ("response_type", "code"),
            ("client_id", EXAMPLE_CLIENT_ID),
            ("redirect_uri", EXAMPLE_REDIRECT_URI),
            ("scope", "openid profile"),
        ]),
    );

    assert_eq!(response.status, Status::Ok);
    match &response.body {
        Some(Body::Text(text)) => assert!(text.contains("login page")),
        other => panic!("Expected the login page, got {:?}", other),
    }
}

#[test]
fn authenticate_then_reauthorize_issues_the_code() {
    let mut endpoint = TestEndpoint::new().anonymous();
    let request = || {
        authorize_request(&[
            ("response_type", "code"),
            ("client_id", EXAMPLE_CLIENT_ID),
            ("redirect_uri", EXAMPLE_REDIRECT_URI),
            ("scope", "openid profile"),
        ])
    };

    let first = execute(&mut endpoint, request());
    assert_eq!(first.status, Status::Ok, "First pass must halt at authentication");

    // The login machinery established an identity, the request is replayed.
    endpoint.authenticator.identity = Some(EXAMPLE_OWNER_ID.to_string());
    let second = execute(&mut endpoint, request());

    assert_eq!(second.status, Status::Redirect);
    let location = second.location.expect("Expected a redirect location");
    let params = query_params(&location);
    assert!(params.contains_key("code"));
    assert!(!params.contains_key("access_token"));
    assert!(!params.contains_key("id_token"));
}

#[test]
fn prompt_none_without_identity_is_login_required() {
    let mut endpoint = TestEndpoint::new().anonymous();
    let response = execute(
        &mut endpoint,
        authorize_request(&[
            ("response_type", "code"),
            ("client_id", EXAMPLE_CLIENT_ID),
            ("redirect_uri", EXAMPLE_REDIRECT_URI),
            ("prompt", "none"),
        ]),
    );

    assert_eq!(response.status, Status::Redirect);
    let location = response.location.expect("Expected an error redirect");
    let params = query_params(&location);
    assert_eq!(params.get("error").map(String::as_str), Some("login_required"));
}

#[test]
fn prompt_login_forces_reauthentication() {
    // A live identity exists, the client still demands a fresh login.
    let mut endpoint = TestEndpoint::new();
    let response = execute(
        &mut endpoint,
        authorize_request(&[
            ("response_type", "code"),
            ("client_id", EXAMPLE_CLIENT_ID),
            ("redirect_uri", EXAMPLE_REDIRECT_URI),
            ("prompt", "login"),
        ]),
    );

    assert_eq!(response.status, Status::Ok);
    match &response.body {
        Some(Body::Text(text)) => assert!(text.contains("login page")),
        other => panic!("Expected the login page, got {:?}", other),
    }
}

#[test]
fn missing_client_id_is_a_direct_error() {
    let mut endpoint = TestEndpoint::new();
    let response = execute(
        &mut endpoint,
        authorize_request(&[("response_type", "code"), ("redirect_uri", EXAMPLE_REDIRECT_URI)]),
    );

    assert_eq!(response.status, Status::BadRequest);
    assert!(response.location.is_none(), "Nothing may redirect before client binding");
    match &response.body {
        Some(Body::Json(json)) => assert!(json.contains("invalid_request")),
        other => panic!("Expected a json error body, got {:?}", other),
    }
}

#[test]
fn unknown_client_never_redirects() {
    let mut endpoint = TestEndpoint::new();
    let response = execute(
        &mut endpoint,
        authorize_request(&[
            ("response_type", "code"),
            ("client_id", "SomeOtherClient"),
            ("redirect_uri", "https://attacker.example/endpoint"),
        ]),
    );

    assert_eq!(response.status, Status::BadRequest);
    assert!(response.location.is_none());
}

#[test]
fn hybrid_flow_places_everything_in_the_fragment() {
    let mut endpoint = TestEndpoint::new();
    let response = execute(
        &mut endpoint,
        authorize_request(&[
            ("response_type", "code token id_token"),
            ("client_id", EXAMPLE_CLIENT_ID),
            ("redirect_uri", EXAMPLE_REDIRECT_URI),
            ("scope", "openid"),
            ("nonce", "n-0S6_WzA2Mj"),
            ("state", "opaque-state"),
        ]),
    );

    assert_eq!(response.status, Status::Redirect);
    let location = response.location.expect("Expected a redirect location");
    assert!(location.query().is_none(), "Hybrid responses never use the query");

    let params = fragment_params(&location);
    assert!(params.contains_key("code"));
    assert!(params.contains_key("access_token"));
    assert!(params.contains_key("id_token"));
    assert_eq!(params.get("state").map(String::as_str), Some("opaque-state"));
}

#[test]
fn id_token_without_nonce_is_invalid_request() {
    let mut endpoint = TestEndpoint::new();
    let response = execute(
        &mut endpoint,
        authorize_request(&[
            ("response_type", "code token id_token"),
            ("client_id", EXAMPLE_CLIENT_ID),
            ("redirect_uri", EXAMPLE_REDIRECT_URI),
            ("scope", "openid"),
        ]),
    );

    assert_eq!(response.status, Status::BadRequest);
    match &response.body {
        Some(Body::Json(json)) => {
            assert!(json.contains("invalid_request"));
            assert!(json.contains("Missing nonce value"));
        }
        other => panic!("Expected a json error body, got {:?}", other),
    }
}

#[test]
fn unknown_response_type_is_fatal() {
    let mut endpoint = TestEndpoint::new();
    let response = execute(
        &mut endpoint,
        authorize_request(&[
            ("response_type", "code saml_assertion"),
            ("client_id", EXAMPLE_CLIENT_ID),
            ("redirect_uri", EXAMPLE_REDIRECT_URI),
        ]),
    );

    assert_eq!(response.status, Status::Redirect);
    let location = response.location.expect("Expected an error redirect");
    let params = fragment_params(&location);
    assert_eq!(
        params.get("error").map(String::as_str),
        Some("unsupported_response_type")
    );
}

#[test]
fn response_type_none_yields_a_bare_redirect() {
    let mut endpoint = TestEndpoint::new();
    let response = execute(
        &mut endpoint,
        authorize_request(&[
            ("response_type", "none"),
            ("client_id", EXAMPLE_CLIENT_ID),
            ("redirect_uri", EXAMPLE_REDIRECT_URI),
            ("state", "opaque-state"),
        ]),
    );

    assert_eq!(response.status, Status::Redirect);
    let location = response.location.expect("Expected a redirect location");
    let params = query_params(&location);
    assert_eq!(params.len(), 1);
    assert_eq!(params.get("state").map(String::as_str), Some("opaque-state"));
}

#[test]
fn request_object_can_pin_the_subject() {
    // The embedded request insists on a different subject than the live session; the
    // provider must hand over to the login machinery instead of issuing silently.
    let claims = serde_json::json!({
        "claims": { "id_token": { "sub": { "value": "SomeoneElse" } } },
    });
    let request_object = format!(
        "{}.{}.",
        encode_config(b"{\"alg\":\"none\"}", URL_SAFE_NO_PAD),
        encode_config(claims.to_string().as_bytes(), URL_SAFE_NO_PAD),
    );

    let mut endpoint = TestEndpoint::new();
    let response = execute(
        &mut endpoint,
        authorize_request(&[
            ("response_type", "code"),
            ("client_id", EXAMPLE_CLIENT_ID),
            ("redirect_uri", EXAMPLE_REDIRECT_URI),
            ("request", request_object.as_str()),
        ]),
    );

    assert_eq!(response.status, Status::Ok);
    match &response.body {
        Some(Body::Text(text)) => assert!(text.contains("SomeoneElse")),
        other => panic!("Expected the login page, got {:?}", other),
    }
}

#[test]
fn unreachable_request_uri_redirects_the_error() {
    let mut endpoint = TestEndpoint::new();
    let response = execute(
        &mut endpoint,
        authorize_request(&[
            ("response_type", "code"),
            ("client_id", EXAMPLE_CLIENT_ID),
            ("redirect_uri", EXAMPLE_REDIRECT_URI),
            ("request_uri", "https://client.example/unreachable.jwt"),
        ]),
    );

    assert_eq!(response.status, Status::Redirect);
    let location = response.location.expect("Expected an error redirect");
    let params = query_params(&location);
    assert_eq!(
        params.get("error").map(String::as_str),
        Some("invalid_request_uri")
    );
}

#[test]
fn fetched_request_object_extends_the_request() {
    let claims = serde_json::json!({ "max_age": 60 });
    let request_object = format!(
        "{}.{}.",
        encode_config(b"{\"alg\":\"none\"}", URL_SAFE_NO_PAD),
        encode_config(claims.to_string().as_bytes(), URL_SAFE_NO_PAD),
    );

    let mut endpoint = TestEndpoint::new();
    endpoint
        .http
        .documents
        .insert("https://client.example/request.jwt".to_string(), request_object);

    let response = execute(
        &mut endpoint,
        authorize_request(&[
            ("response_type", "code"),
            ("client_id", EXAMPLE_CLIENT_ID),
            ("redirect_uri", EXAMPLE_REDIRECT_URI),
            ("request_uri", "https://client.example/request.jwt"),
        ]),
    );

    assert_eq!(response.status, Status::Redirect);
    let location = response.location.expect("Expected a redirect location");
    assert!(query_params(&location).contains_key("code"));
}
