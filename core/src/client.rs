//! Stateless HTTP request builder and response parser for the lending API.
//!
//! # Design
//! `LendingClient` holds only a `base_url` and carries no mutable state
//! between calls. Each endpoint is split into a `build_*` method that produces
//! an `HttpRequest` and a `parse_*` method that consumes an `HttpResponse`.
//! Authentication is attached by the caller with `HttpRequest::with_auth`, so
//! the client never sees the session token.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::ApiError;
use crate::http::{HttpMethod, HttpRequest, HttpResponse};
use crate::types::{
    Credentials, EntityKind, NewBorrow, NewThing, RegisteredUser, ReturnPatch, TokenReply,
};

/// Named pagination relations (`first`, `prev`, `next`, `last`) of one page.
pub type PageLinks = BTreeMap<String, String>;

/// One decoded page of a collection listing.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<R> {
    pub records: Vec<R>,
    pub links: PageLinks,
}

impl<R> Page<R> {
    pub fn next(&self) -> Option<&str> {
        self.links.get("next").map(String::as_str)
    }
}

/// Server-side filters for the borrowings listing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListQuery {
    /// Only items currently out.
    pub missing: bool,
    /// Only items past their due date.
    pub overdue: bool,
}

impl ListQuery {
    pub fn missing() -> Self {
        Self { missing: true, ..Self::default() }
    }

    pub fn overdue() -> Self {
        Self { overdue: true, ..Self::default() }
    }

    fn query_string(&self) -> Option<String> {
        let mut params = Vec::new();
        if self.missing {
            params.push("missing=true");
        }
        if self.overdue {
            params.push("overdue=true");
        }
        (!params.is_empty()).then(|| params.join("&"))
    }
}

/// Synchronous, stateless client for the lending API.
#[derive(Debug, Clone)]
pub struct LendingClient {
    base_url: String,
}

impl LendingClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn collection_url(&self, kind: EntityKind) -> String {
        format!("{}/{}", self.base_url, kind.collection_path())
    }

    pub fn detail_url(&self, kind: EntityKind, id: u64) -> String {
        format!("{}{id}/", self.collection_url(kind))
    }

    // -- auth ---------------------------------------------------------------

    pub fn build_register(&self, credentials: &Credentials) -> Result<HttpRequest, ApiError> {
        json_request(HttpMethod::Post, format!("{}/auth/users/", self.base_url), credentials)
    }

    pub fn build_login(&self, credentials: &Credentials) -> Result<HttpRequest, ApiError> {
        json_request(
            HttpMethod::Post,
            format!("{}/auth/token/login/", self.base_url),
            credentials,
        )
    }

    /// Logout needs the token being revoked; attach it with `with_auth`.
    pub fn build_logout(&self) -> HttpRequest {
        empty_request(HttpMethod::Post, format!("{}/auth/token/logout/", self.base_url))
    }

    pub fn parse_register(&self, response: HttpResponse) -> Result<RegisteredUser, ApiError> {
        parse_json(&response, 201)
    }

    pub fn parse_login(&self, response: HttpResponse) -> Result<TokenReply, ApiError> {
        parse_json(&response, 200)
    }

    pub fn parse_logout(&self, response: HttpResponse) -> Result<(), ApiError> {
        check_status(&response, 204)
    }

    // -- reads --------------------------------------------------------------

    pub fn build_list(&self, kind: EntityKind, query: Option<&ListQuery>) -> HttpRequest {
        let mut path = self.collection_url(kind);
        if let Some(qs) = query.and_then(ListQuery::query_string) {
            path.push('?');
            path.push_str(&qs);
        }
        empty_request(HttpMethod::Get, path)
    }

    /// Follow a pagination link exactly as the server handed it out.
    pub fn build_page(&self, url: &str) -> HttpRequest {
        empty_request(HttpMethod::Get, url.to_string())
    }

    pub fn build_get(&self, kind: EntityKind, id: u64) -> HttpRequest {
        empty_request(HttpMethod::Get, self.detail_url(kind, id))
    }

    /// Decode a listing page. A missing `Link` header means a final page.
    pub fn parse_page<R: DeserializeOwned>(&self, response: HttpResponse) -> Result<Page<R>, ApiError> {
        let records = parse_json(&response, 200)?;
        let links = response.header("link").map(parse_link_header).unwrap_or_default();
        Ok(Page { records, links })
    }

    pub fn parse_get<R: DeserializeOwned>(&self, response: HttpResponse) -> Result<R, ApiError> {
        parse_json(&response, 200)
    }

    // -- writes -------------------------------------------------------------

    /// Create a friend or a belonging. Borrows go through `build_create_borrow`.
    pub fn build_create_thing(&self, kind: EntityKind, input: &NewThing) -> Result<HttpRequest, ApiError> {
        json_request(HttpMethod::Post, self.collection_url(kind), input)
    }

    pub fn build_create_borrow(&self, input: &NewBorrow) -> Result<HttpRequest, ApiError> {
        json_request(HttpMethod::Post, self.collection_url(EntityKind::Borrow), input)
    }

    pub fn build_mark_returned(&self, id: u64, input: &ReturnPatch) -> Result<HttpRequest, ApiError> {
        json_request(HttpMethod::Patch, self.detail_url(EntityKind::Borrow, id), input)
    }

    pub fn parse_create<R: DeserializeOwned>(&self, response: HttpResponse) -> Result<R, ApiError> {
        parse_json(&response, 201)
    }

    pub fn parse_update<R: DeserializeOwned>(&self, response: HttpResponse) -> Result<R, ApiError> {
        parse_json(&response, 200)
    }
}

fn empty_request(method: HttpMethod, path: String) -> HttpRequest {
    HttpRequest {
        method,
        path,
        headers: Vec::new(),
        body: None,
    }
}

fn json_request<T: Serialize>(method: HttpMethod, path: String, input: &T) -> Result<HttpRequest, ApiError> {
    let body = serde_json::to_string(input).map_err(|e| ApiError::SerializationError(e.to_string()))?;
    Ok(HttpRequest {
        method,
        path,
        headers: vec![("content-type".to_string(), "application/json".to_string())],
        body: Some(body),
    })
}

fn parse_json<R: DeserializeOwned>(response: &HttpResponse, expected: u16) -> Result<R, ApiError> {
    check_status(response, expected)?;
    serde_json::from_str(&response.body).map_err(|e| ApiError::DeserializationError(e.to_string()))
}

/// Map non-success status codes to the appropriate `ApiError` variant.
fn check_status(response: &HttpResponse, expected: u16) -> Result<(), ApiError> {
    if response.status == expected {
        return Ok(());
    }
    if response.status == 404 {
        return Err(ApiError::NotFound);
    }
    Err(ApiError::HttpError {
        status: response.status,
        body: response.body.clone(),
    })
}

/// Parse an RFC 5988 `Link` header into `rel -> url`.
///
/// Entries without a `rel` parameter are skipped. A `rel` holding several
/// space-separated relation types registers the url under each of them.
pub fn parse_link_header(value: &str) -> PageLinks {
    let mut links = PageLinks::new();
    for entry in split_outside_brackets(value) {
        let mut parts = entry.split(';').map(str::trim);
        let Some(target) = parts.next() else { continue };
        let Some(url) = target.strip_prefix('<').and_then(|t| t.strip_suffix('>')) else {
            continue;
        };
        for param in parts {
            let Some((key, rel)) = param.split_once('=') else { continue };
            if !key.trim().eq_ignore_ascii_case("rel") {
                continue;
            }
            for name in rel.trim().trim_matches('"').split_whitespace() {
                links.insert(name.to_ascii_lowercase(), url.to_string());
            }
        }
    }
    links
}

/// Split on commas that are not inside `<...>`.
fn split_outside_brackets(value: &str) -> Vec<&str> {
    let mut entries = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in value.char_indices() {
        match c {
            '<' => depth += 1,
            '>' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                entries.push(value[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    entries.push(value[start..].trim());
    entries.retain(|e| !e.is_empty());
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FriendRecord;

    fn client() -> LendingClient {
        LendingClient::new("http://localhost:8000/api/")
    }

    fn response(status: u16, body: &str) -> HttpResponse {
        HttpResponse {
            status,
            headers: Vec::new(),
            body: body.to_string(),
        }
    }

    #[test]
    fn build_list_produces_correct_request() {
        let req = client().build_list(EntityKind::Friend, None);
        assert_eq!(req.method, HttpMethod::Get);
        assert_eq!(req.path, "http://localhost:8000/api/v1/friends/");
        assert!(req.body.is_none());
        assert!(req.headers.is_empty());
    }

    #[test]
    fn build_list_appends_filters() {
        let req = client().build_list(EntityKind::Borrow, Some(&ListQuery::missing()));
        assert_eq!(req.path, "http://localhost:8000/api/v1/borrowings/?missing=true");
        let both = ListQuery { missing: true, overdue: true };
        let req = client().build_list(EntityKind::Borrow, Some(&both));
        assert_eq!(
            req.path,
            "http://localhost:8000/api/v1/borrowings/?missing=true&overdue=true"
        );
        let req = client().build_list(EntityKind::Borrow, Some(&ListQuery::default()));
        assert_eq!(req.path, "http://localhost:8000/api/v1/borrowings/");
    }

    #[test]
    fn build_get_uses_detail_url() {
        let req = client().build_get(EntityKind::Belonging, 7);
        assert_eq!(req.method, HttpMethod::Get);
        assert_eq!(req.path, "http://localhost:8000/api/v1/belongings/7/");
    }

    #[test]
    fn build_create_thing_produces_correct_request() {
        let input = NewThing { name: "umbrella".to_string() };
        let req = client().build_create_thing(EntityKind::Belonging, &input).unwrap();
        assert_eq!(req.method, HttpMethod::Post);
        assert_eq!(req.path, "http://localhost:8000/api/v1/belongings/");
        assert_eq!(
            req.headers,
            vec![("content-type".to_string(), "application/json".to_string())]
        );
        let body: serde_json::Value = serde_json::from_str(req.body.as_deref().unwrap()).unwrap();
        assert_eq!(body["name"], "umbrella");
    }

    #[test]
    fn build_mark_returned_is_patch() {
        let input = ReturnPatch { returned: "2020-01-12T20:15:00".to_string() };
        let req = client().build_mark_returned(3, &input).unwrap();
        assert_eq!(req.method, HttpMethod::Patch);
        assert_eq!(req.path, "http://localhost:8000/api/v1/borrowings/3/");
        let body: serde_json::Value = serde_json::from_str(req.body.as_deref().unwrap()).unwrap();
        assert_eq!(body["returned"], "2020-01-12T20:15:00");
    }

    #[test]
    fn build_login_posts_credentials() {
        let creds = Credentials { username: "djoser".into(), password: "alpine12".into() };
        let req = client().build_login(&creds).unwrap();
        assert_eq!(req.path, "http://localhost:8000/api/auth/token/login/");
        let body: serde_json::Value = serde_json::from_str(req.body.as_deref().unwrap()).unwrap();
        assert_eq!(body["username"], "djoser");
        assert!(req.header("authorization").is_none());
    }

    #[test]
    fn parse_page_reads_links() {
        let mut resp = response(200, r#"[{"id":1,"name":"Sam","has_overdue":false}]"#);
        resp.headers.push((
            "Link".to_string(),
            r#"<http://h/api/v1/friends/?page=2>; rel="next", <http://h/api/v1/friends/?page=3>; rel="last""#
                .to_string(),
        ));
        let page: Page<FriendRecord> = client().parse_page(resp).unwrap();
        assert_eq!(page.records.len(), 1);
        assert_eq!(page.next(), Some("http://h/api/v1/friends/?page=2"));
        assert_eq!(page.links["last"], "http://h/api/v1/friends/?page=3");
    }

    #[test]
    fn parse_page_without_links_is_final() {
        let page: Page<FriendRecord> = client().parse_page(response(200, "[]")).unwrap();
        assert!(page.records.is_empty());
        assert!(page.next().is_none());
    }

    #[test]
    fn parse_page_bad_json() {
        let err = client().parse_page::<FriendRecord>(response(200, "not json")).unwrap_err();
        assert!(matches!(err, ApiError::DeserializationError(_)));
    }

    #[test]
    fn parse_get_not_found() {
        let err = client().parse_get::<FriendRecord>(response(404, "")).unwrap_err();
        assert!(matches!(err, ApiError::NotFound));
    }

    #[test]
    fn parse_create_wrong_status() {
        let err = client()
            .parse_create::<FriendRecord>(response(500, "internal error"))
            .unwrap_err();
        assert!(matches!(err, ApiError::HttpError { status: 500, .. }));
    }

    #[test]
    fn parse_logout_expects_no_content() {
        assert!(client().parse_logout(response(204, "")).is_ok());
        let err = client().parse_logout(response(401, "")).unwrap_err();
        assert!(matches!(err, ApiError::HttpError { status: 401, .. }));
    }

    #[test]
    fn trailing_slash_is_stripped() {
        let client = LendingClient::new("http://localhost:8000/api///");
        assert_eq!(client.base_url(), "http://localhost:8000/api");
        assert_eq!(
            client.collection_url(EntityKind::Friend),
            "http://localhost:8000/api/v1/friends/"
        );
    }

    #[test]
    fn link_header_handles_multiple_rels_and_noise() {
        let links = parse_link_header(
            r#"<http://a/?page=1>; rel="first prev", <http://a/?page=3>;rel=next, <http://a/nolink>, garbage"#,
        );
        assert_eq!(links["first"], "http://a/?page=1");
        assert_eq!(links["prev"], "http://a/?page=1");
        assert_eq!(links["next"], "http://a/?page=3");
        assert_eq!(links.len(), 3);
    }

    #[test]
    fn link_header_keeps_commas_inside_urls() {
        let links = parse_link_header(r#"<http://a/?ids=1,2&page=2>; rel="next""#);
        assert_eq!(links["next"], "http://a/?ids=1,2&page=2");
    }
}
