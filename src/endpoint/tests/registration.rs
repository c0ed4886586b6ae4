use super::{Body, CraftedRequest, CraftedResponse, Status, TestEndpoint, ToSingleValueQuery};
use crate::code_grant::registration::RegistrationResponse;
use crate::endpoint::{ReadRegistrationFlow, RegistrationFlow};

fn execute(endpoint: &mut TestEndpoint, request: CraftedRequest) -> CraftedResponse {
    RegistrationFlow::prepare(endpoint)
        .expect("Failed to prepare")
        .execute(request)
        .expect("Should not error")
}

fn registration_request(body: serde_json::Value) -> CraftedRequest {
    CraftedRequest {
        body: Some(body.to_string()),
        ..CraftedRequest::default()
    }
}

fn parse_registration(response: &CraftedResponse) -> RegistrationResponse {
    match &response.body {
        Some(Body::Json(json)) => serde_json::from_str(json).expect("Expected valid json"),
        other => panic!("Expected a json body, got {:?}", other),
    }
}

#[test]
fn registration_and_read_back() {
    let mut endpoint = TestEndpoint::new();
    let response = execute(
        &mut endpoint,
        registration_request(serde_json::json!({
            "redirect_uris": ["https://fresh.example/cb"],
            "subject_type": "public",
        })),
    );

    assert_eq!(response.status, Status::Ok);
    assert!(response.no_store, "Registration responses must not be cached");

    let registered = parse_registration(&response);
    assert_eq!(registered.redirect_uris, vec!["https://fresh.example/cb".to_string()]);
    let secret = registered.client_secret.clone().expect("Expected a secret");
    assert!(!secret.is_empty());
    let rat = registered
        .registration_access_token
        .clone()
        .expect("Expected a registration access token");

    // Read the registration back with the minted bearer token.
    let read_request = CraftedRequest {
        query: Some(
            vec![("client_id", registered.client_id.as_str())]
                .iter()
                .to_single_value_query(),
        ),
        auth: Some(format!("Bearer {}", rat)),
        ..CraftedRequest::default()
    };

    let read = ReadRegistrationFlow::prepare(&mut endpoint)
        .expect("Failed to prepare")
        .execute(read_request)
        .expect("Should not error");
    assert_eq!(read.status, Status::Ok);

    let view = parse_registration(&read);
    assert_eq!(view.client_id, registered.client_id);
    assert_eq!(view.redirect_uris, registered.redirect_uris);
}

#[test]
fn read_back_with_foreign_client_id_is_refused() {
    let mut endpoint = TestEndpoint::new();
    let response = execute(
        &mut endpoint,
        registration_request(serde_json::json!({
            "redirect_uris": ["https://fresh.example/cb"],
        })),
    );
    let registered = parse_registration(&response);
    let rat = registered.registration_access_token.unwrap();

    let read_request = CraftedRequest {
        query: Some(vec![("client_id", "SomeoneElse")].iter().to_single_value_query()),
        auth: Some(format!("Bearer {}", rat)),
        ..CraftedRequest::default()
    };

    let read = ReadRegistrationFlow::prepare(&mut endpoint)
        .expect("Failed to prepare")
        .execute(read_request)
        .expect("Should not error");
    assert_eq!(read.status, Status::Unauthorized);
    assert_eq!(read.www_authenticate.as_deref(), Some("Bearer"));
}

#[test]
fn fragments_fail_registration() {
    let mut endpoint = TestEndpoint::new();
    let response = execute(
        &mut endpoint,
        registration_request(serde_json::json!({
            "redirect_uris": ["https://fresh.example/cb#fragment"],
        })),
    );

    assert_eq!(response.status, Status::BadRequest);
    match &response.body {
        Some(Body::Json(json)) => assert!(json.contains("invalid_configuration_parameter")),
        other => panic!("Expected a json error body, got {:?}", other),
    }
}

#[test]
fn cross_host_registration_needs_a_sector_document() {
    let mut endpoint = TestEndpoint::new();
    let response = execute(
        &mut endpoint,
        registration_request(serde_json::json!({
            "redirect_uris": ["https://one.example/cb", "https://two.example/cb"],
        })),
    );
    assert_eq!(response.status, Status::BadRequest);

    // With a sector document covering both uris the registration passes.
    endpoint.http.documents.insert(
        "https://sector.example/ids.json".to_string(),
        "[\"https://one.example/cb\", \"https://two.example/cb\"]".to_string(),
    );
    let response = execute(
        &mut endpoint,
        registration_request(serde_json::json!({
            "redirect_uris": ["https://one.example/cb", "https://two.example/cb"],
            "sector_identifier_uri": "https://sector.example/ids.json",
            "subject_type": "pairwise",
        })),
    );
    assert_eq!(response.status, Status::Ok);
}

#[test]
fn malformed_body_is_a_configuration_error() {
    let mut endpoint = TestEndpoint::new();
    let response = execute(
        &mut endpoint,
        CraftedRequest {
            body: Some("not json at all".to_string()),
            ..CraftedRequest::default()
        },
    );

    assert_eq!(response.status, Status::BadRequest);
    match &response.body {
        Some(Body::Json(json)) => assert!(json.contains("invalid_configuration_parameter")),
        other => panic!("Expected a json error body, got {:?}", other),
    }
}
