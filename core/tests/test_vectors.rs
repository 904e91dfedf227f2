//! Verify build/parse methods against JSON test vectors stored in `test-vectors/`.
//!
//! Each vector file describes inputs, expected requests, simulated responses,
//! and expected parse results. Comparing parsed JSON (not raw strings) avoids
//! false negatives from field-ordering differences.

use lending_core::{
    ApiError, Belonging, BelongingRecord, EntityKind, Friend, FriendRecord, HttpMethod,
    HttpResponse, LendingClient, NewThing, PageLinks, Record,
};
use serde_json::Value;

const BASE_URL: &str = "http://localhost:8000/api";

fn client() -> LendingClient {
    LendingClient::new(BASE_URL)
}

/// Parse the method string from test vectors into `HttpMethod`.
fn parse_method(s: &str) -> HttpMethod {
    match s {
        "GET" => HttpMethod::Get,
        "POST" => HttpMethod::Post,
        "PATCH" => HttpMethod::Patch,
        other => panic!("unknown method: {other}"),
    }
}

fn parse_kind(s: &str) -> EntityKind {
    match s {
        "friend" => EntityKind::Friend,
        "belonging" => EntityKind::Belonging,
        "borrow" => EntityKind::Borrow,
        other => panic!("unknown kind: {other}"),
    }
}

fn pairs(value: &Value) -> Vec<(String, String)> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .map(|h| {
                    let arr = h.as_array().unwrap();
                    (arr[0].as_str().unwrap().to_string(), arr[1].as_str().unwrap().to_string())
                })
                .collect()
        })
        .unwrap_or_default()
}

fn simulated(case: &Value) -> HttpResponse {
    let sim = &case["simulated_response"];
    HttpResponse {
        status: sim["status"].as_u64().unwrap() as u16,
        headers: pairs(&sim["headers"]),
        body: sim["body"].as_str().unwrap().to_string(),
    }
}

/// Name and id of a decoded friend or belonging record.
fn hydrated(kind: EntityKind, record: Value) -> (u64, String) {
    match kind {
        EntityKind::Friend => {
            let friend = Friend::from_record(serde_json::from_value::<FriendRecord>(record).unwrap()).unwrap();
            (friend.id(), friend.name().to_string())
        }
        EntityKind::Belonging => {
            let belonging =
                Belonging::from_record(serde_json::from_value::<BelongingRecord>(record).unwrap()).unwrap();
            (belonging.id(), belonging.name().to_string())
        }
        EntityKind::Borrow => panic!("borrows need resolved references"),
    }
}

// ---------------------------------------------------------------------------
// List
// ---------------------------------------------------------------------------

#[test]
fn list_test_vectors() {
    let raw = include_str!("../../test-vectors/list.json");
    let vectors: Value = serde_json::from_str(raw).unwrap();

    let c = client();
    for case in vectors["cases"].as_array().unwrap() {
        let name = case["name"].as_str().unwrap();
        let kind = parse_kind(case["kind"].as_str().unwrap());
        let expected_req = &case["expected_request"];

        // Verify build
        let req = c.build_list(kind, None);
        assert_eq!(req.method, parse_method(expected_req["method"].as_str().unwrap()), "{name}: method");
        assert_eq!(req.path, format!("{BASE_URL}{}", expected_req["path"].as_str().unwrap()), "{name}: path");
        assert!(req.body.is_none(), "{name}: body should be None");

        // Verify parse
        let page = c.parse_page::<Value>(simulated(case)).unwrap();
        let ids: Vec<u64> = page.records.iter().map(|r| r["id"].as_u64().unwrap()).collect();
        let expected_ids: Vec<u64> = serde_json::from_value(case["expected_result"]["ids"].clone()).unwrap();
        assert_eq!(ids, expected_ids, "{name}: ids");

        let expected_links: PageLinks =
            serde_json::from_value(case["expected_result"]["links"].clone()).unwrap();
        assert_eq!(page.links, expected_links, "{name}: links");
    }
}

// ---------------------------------------------------------------------------
// Create
// ---------------------------------------------------------------------------

#[test]
fn create_test_vectors() {
    let raw = include_str!("../../test-vectors/create.json");
    let vectors: Value = serde_json::from_str(raw).unwrap();

    let c = client();
    for case in vectors["cases"].as_array().unwrap() {
        let name = case["name"].as_str().unwrap();
        let kind = parse_kind(case["kind"].as_str().unwrap());
        let input: NewThing = serde_json::from_value(case["input"].clone()).unwrap();
        let expected_req = &case["expected_request"];

        // Verify build
        let req = c.build_create_thing(kind, &input).unwrap();
        assert_eq!(req.method, parse_method(expected_req["method"].as_str().unwrap()), "{name}: method");
        assert_eq!(req.path, format!("{BASE_URL}{}", expected_req["path"].as_str().unwrap()), "{name}: path");
        assert_eq!(req.headers, pairs(&expected_req["headers"]), "{name}: headers");

        let req_body: Value = serde_json::from_str(req.body.as_deref().unwrap()).unwrap();
        assert_eq!(req_body, expected_req["body"], "{name}: body");

        // Verify parse
        let record: Value = c.parse_create(simulated(case)).unwrap();
        let (id, entity_name) = hydrated(kind, record);
        assert_eq!(id, case["expected_result"]["id"].as_u64().unwrap(), "{name}: id");
        assert_eq!(entity_name, case["expected_result"]["name"].as_str().unwrap(), "{name}: name");
    }
}

// ---------------------------------------------------------------------------
// Get
// ---------------------------------------------------------------------------

#[test]
fn get_test_vectors() {
    let raw = include_str!("../../test-vectors/get.json");
    let vectors: Value = serde_json::from_str(raw).unwrap();

    let c = client();
    for case in vectors["cases"].as_array().unwrap() {
        let name = case["name"].as_str().unwrap();
        let kind = parse_kind(case["kind"].as_str().unwrap());
        let id = case["input_id"].as_u64().unwrap();
        let expected_req = &case["expected_request"];

        // Verify build
        let req = c.build_get(kind, id);
        assert_eq!(req.method, parse_method(expected_req["method"].as_str().unwrap()), "{name}: method");
        assert_eq!(req.path, format!("{BASE_URL}{}", expected_req["path"].as_str().unwrap()), "{name}: path");
        assert!(req.body.is_none(), "{name}: body should be None");

        // Verify parse
        let result = c.parse_get::<Value>(simulated(case));

        if let Some(expected_error) = case.get("expected_error") {
            let err = result.unwrap_err();
            match expected_error.as_str().unwrap() {
                "NotFound" => assert!(matches!(err, ApiError::NotFound), "{name}: expected NotFound"),
                "HttpError" => assert!(matches!(err, ApiError::HttpError { .. }), "{name}: expected HttpError"),
                other => panic!("{name}: unknown expected_error: {other}"),
            }
        } else {
            let (got_id, entity_name) = hydrated(kind, result.unwrap());
            assert_eq!(got_id, case["expected_result"]["id"].as_u64().unwrap(), "{name}: id");
            assert_eq!(entity_name, case["expected_result"]["name"].as_str().unwrap(), "{name}: name");
        }
    }
}
