//! HTTP client and Domain API for the Arena PLM REST interface (spec.md §4.2-§4.3, §6).
//!
//! Callers never build a path string. Every operation here is a named method
//! that knows its own endpoint, so the push pipeline and diff engine read as
//! business logic, not URL assembly.
//!
//! # Example
//!
//! ```no_run
//! use plm_sync_client::ArenaClient;
//! use plm_sync_auth::Credentials;
//!
//! let creds = Credentials {
//!     email: "user@example.com".into(),
//!     password: "secret".into(),
//!     workspace_id: "ws-1".into(),
//!     api_base: "https://api.arenasolutions.com/v1".into(),
//! };
//! let client = ArenaClient::new(creds, std::env::temp_dir().join("plm-sync-cache"));
//! let item = client.get_item_by_number("CABLE-9");
//! ```

mod normalize;

use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use plm_sync_auth::{Authenticator, Credentials, LoginResponse, SessionManager};
use plm_sync_cache::ItemCache;
use plm_sync_retry::parse_retry_after;
use plm_sync_types::{CacheEntry, Item, PlmError, Result};
use reqwest::blocking::Client as HttpClient;
use reqwest::Method;
use serde_json::{json, Value};

pub use normalize::normalize_envelope;

/// Header carrying the session token (spec.md §6).
pub const SESSION_HEADER: &str = "arena_session_id";

/// Default request timeout.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Page size for `get_all_items` (spec.md §4.3).
pub const DEFAULT_BATCH_SIZE: u32 = 400;

/// Maximum characters kept from a server error body (spec.md §4.2 step 5).
const ERROR_BODY_TRUNCATE: usize = 500;

/// Authenticates against the Arena `/login` and `/logout` endpoints over HTTP.
///
/// Kept separate from [`ArenaClient`] so [`SessionManager`] can own it without
/// `plm-sync-auth` ever depending on `reqwest` itself.
pub struct ArenaAuthenticator {
    http: HttpClient,
    base_url: String,
}

impl ArenaAuthenticator {
    fn new(http: HttpClient, base_url: String) -> Self {
        Self { http, base_url }
    }
}

impl Authenticator for ArenaAuthenticator {
    fn login(&self, credentials: &Credentials) -> std::result::Result<LoginResponse, PlmError> {
        let url = format!("{}/login", self.base_url.trim_end_matches('/'));
        let body = json!({
            "email": credentials.email,
            "password": credentials.password,
            "workspaceId": credentials.workspace_id,
        });

        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .map_err(|e| PlmError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            return Err(PlmError::Transport(format!("login failed with status {status}")));
        }

        let value: Value = response
            .json()
            .map_err(|e| PlmError::Transport(format!("malformed login response: {e}")))?;
        let normalized = normalize_envelope(value);

        let token = normalized
            .get("session_id")
            .or_else(|| normalized.get("token"))
            .and_then(Value::as_str)
            .ok_or_else(|| PlmError::Transport("login response missing session token".into()))?
            .to_string();
        let workspace_id = normalized
            .get("workspace_id")
            .and_then(Value::as_str)
            .ok_or_else(|| PlmError::Transport("login response missing workspace id".into()))?
            .to_string();

        Ok(LoginResponse { token, workspace_id })
    }

    fn logout(&self, token: &str) -> std::result::Result<(), PlmError> {
        let url = format!("{}/logout", self.base_url.trim_end_matches('/'));
        self.http
            .post(&url)
            .header(SESSION_HEADER, token)
            .send()
            .map_err(|e| PlmError::Transport(e.to_string()))?;
        Ok(())
    }
}

/// The Arena PLM client: session-aware HTTP verbs plus the named domain
/// operations built on them.
pub struct ArenaClient {
    http: HttpClient,
    base_url: String,
    session: SessionManager<ArenaAuthenticator>,
    cache: Mutex<ItemCache>,
    debug: bool,
}

impl ArenaClient {
    /// Build a client from resolved credentials, with a fresh item cache
    /// rooted at `cache_dir`.
    pub fn new(credentials: Credentials, cache_dir: impl Into<PathBuf>) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .map_err(|e| PlmError::Transport(e.to_string()))?;
        let base_url = credentials.api_base.trim_end_matches('/').to_string();
        let authenticator = ArenaAuthenticator::new(http.clone(), base_url.clone());
        let session = SessionManager::new(credentials, authenticator);
        let cache = ItemCache::open(cache_dir.into())?;

        Ok(Self { http, base_url, session, cache: Mutex::new(cache), debug: false })
    }

    pub fn with_debug_logging(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Override the session cache's TTL (default
    /// [`plm_sync_auth::DEFAULT_SESSION_TTL`]).
    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session = self.session.with_ttl(ttl);
        self
    }

    /// Flush the item cache to disk. Callers should do this after a batch of
    /// writes (spec.md §4.4: "manifest is written last").
    pub fn flush_cache(&self) -> Result<()> {
        self.cache.lock().expect("cache poisoned").save()
    }

    // ---- HTTP verbs (spec.md §4.2) -----------------------------------

    pub fn get(&self, path: &str, query: &[(&str, &str)]) -> Result<Value> {
        self.request(Method::GET, path, query, None)
    }

    pub fn post(&self, path: &str, body: Value) -> Result<Value> {
        self.request(Method::POST, path, &[], Some(body))
    }

    pub fn put(&self, path: &str, body: Value) -> Result<Value> {
        self.request(Method::PUT, path, &[], Some(body))
    }

    pub fn patch(&self, path: &str, body: Value) -> Result<Value> {
        self.request(Method::PATCH, path, &[], Some(body))
    }

    pub fn delete(&self, path: &str) -> Result<Value> {
        self.request(Method::DELETE, path, &[], None)
    }

    fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<Value>,
    ) -> Result<Value> {
        let mut retried_auth = false;
        let mut retried_rate_limit = false;

        loop {
            let token = self.session.session()?;
            let url = format!("{}{}", self.base_url, path);
            if self.debug {
                log::debug!("{method} {url}");
            }

            let mut request = self
                .http
                .request(method.clone(), &url)
                .header(SESSION_HEADER, &token)
                .query(query);
            if let Some(body) = &body {
                request = request.json(body);
            }

            let response = request.send().map_err(|e| PlmError::Transport(e.to_string()))?;
            let status = response.status();

            if status.is_success() {
                if status.as_u16() == 204 {
                    return Ok(Value::Null);
                }
                let value: Value = response
                    .json()
                    .map_err(|e| PlmError::Transport(format!("malformed response body: {e}")))?;
                return Ok(normalize_envelope(value));
            }

            if status.as_u16() == 401 {
                if retried_auth {
                    return Err(PlmError::SessionExpired);
                }
                retried_auth = true;
                self.session.reauthenticate()?;
                continue;
            }

            if status.as_u16() == 429 {
                if retried_rate_limit {
                    return Err(PlmError::RateLimited);
                }
                retried_rate_limit = true;
                let retry_after = response
                    .headers()
                    .get("Retry-After")
                    .and_then(|v| v.to_str().ok());
                let wait = parse_retry_after(retry_after);
                std::thread::sleep(wait);
                continue;
            }

            let status_code = status.as_u16();
            let text = response.text().unwrap_or_default();
            let message = extract_error_message(&text);
            log::error!("request failed: {method} {path} -> {status_code}: {message}");

            return Err(match status_code {
                404 => PlmError::NotFound(message),
                409 => PlmError::Conflict(message),
                _ => PlmError::Transport(format!("{status_code}: {message}")),
            });
        }
    }

    // ---- Domain API: items (spec.md §4.3) ----------------------------

    /// `getItem(opaqueId)` — validates the identifier is non-empty.
    pub fn get_item(&self, opaque_id: &str) -> Result<Item> {
        if opaque_id.trim().is_empty() {
            return Err(PlmError::Validation(vec!["opaque id must not be empty".into()]));
        }
        let value = self.get(&format!("/items/{opaque_id}"), &[("responseview", "full")])?;
        parse_item(&value)
    }

    /// `getItemByNumber(number)` — cache-first, triggers one refresh on miss.
    ///
    /// A miss that survives a refresh isn't necessarily a missing item: the
    /// refresh itself may have trimmed it under the cache's safety envelope
    /// (spec.md §4.4, §8). That case falls through to a live, uncached
    /// single-item search before giving up.
    pub fn get_item_by_number(&self, number: &str) -> Result<Item> {
        {
            let cache = self.cache.lock().expect("cache poisoned");
            if let Some(entry) = cache.get(number) {
                return Ok(item_from_cache_entry(entry));
            }
        }

        self.refresh_cache()?;

        {
            let cache = self.cache.lock().expect("cache poisoned");
            if let Some(entry) = cache.get(number) {
                return Ok(item_from_cache_entry(entry));
            }
        }

        match self.find_item_by_number_live(number)? {
            Some(item) => {
                self.cache_insert(&item);
                Ok(item)
            }
            None => Err(PlmError::NotFound(format!("item number {number}"))),
        }
    }

    /// Uncached search for a single item by exact number, used as the
    /// fallback when a cache refresh trimmed the item out of the local
    /// cache rather than it simply not existing.
    fn find_item_by_number_live(&self, number: &str) -> Result<Option<Item>> {
        let matches = self.search_items(number, 1)?;
        Ok(matches.into_iter().find(|item| item.number.eq_ignore_ascii_case(number.trim())))
    }

    /// `createItem(record)` — write-through cache insert.
    pub fn create_item(&self, record: &Item) -> Result<Item> {
        let body = item_to_request_body(record);
        let value = self.post("/items", body)?;
        let created = parse_item(&value)?;
        self.cache_insert(&created);
        Ok(created)
    }

    /// `updateItem(opaqueId, record)` — write-through cache eviction.
    pub fn update_item(&self, opaque_id: &str, record: &Item) -> Result<Item> {
        let body = item_to_request_body(record);
        let value = self.put(&format!("/items/{opaque_id}"), body)?;
        let updated = parse_item(&value)?;
        self.cache.lock().expect("cache poisoned").invalidate(&updated.number)?;
        self.cache_insert(&updated);
        Ok(updated)
    }

    /// `searchItems(query, limit)` — query trimmed and truncated to 200 chars.
    pub fn search_items(&self, query: &str, limit: u32) -> Result<Vec<Item>> {
        let trimmed: String = query.trim().chars().take(200).collect();
        let limit_str = limit.to_string();
        let value = self.get(
            "/items/searches",
            &[("searchQuery", trimmed.as_str()), ("limit", limit_str.as_str())],
        )?;
        parse_item_list(&value)
    }

    /// `getItems(limit, offset, category?)` — one page.
    pub fn get_items(&self, limit: u32, offset: u32, category: Option<&str>) -> Result<Vec<Item>> {
        let limit_str = limit.to_string();
        let offset_str = offset.to_string();
        let mut query = vec![
            ("limit", limit_str.as_str()),
            ("offset", offset_str.as_str()),
            ("responseview", "full"),
        ];
        if let Some(category) = category {
            query.push(("category", category));
        }
        let value = self.get("/items", &query)?;
        parse_item_list(&value)
    }

    /// `getAllItems(batchSize)` — iterates offsets until a short page returns.
    pub fn get_all_items(&self, batch_size: u32) -> Result<Vec<Item>> {
        let mut all = Vec::new();
        let mut offset = 0;
        loop {
            let page = self.get_items(batch_size, offset, None)?;
            let page_len = page.len() as u32;
            all.extend(page);
            if page_len < batch_size {
                break;
            }
            offset += batch_size;
        }
        Ok(all)
    }

    /// Rebuild the item cache from a full paginated pull (spec.md §4.4 `refresh()`).
    pub fn refresh_cache(&self) -> Result<()> {
        let items = self.get_all_items(DEFAULT_BATCH_SIZE)?;
        let entries: Vec<CacheEntry> = items.iter().map(CacheEntry::from).collect();
        let mut cache = self.cache.lock().expect("cache poisoned");
        cache.refresh(entries)?;
        cache.save()
    }

    fn cache_insert(&self, item: &Item) {
        let mut cache = self.cache.lock().expect("cache poisoned");
        let _ = cache.upsert(CacheEntry::from(item));
        let _ = cache.save();
    }

    // ---- Domain API: BOM (spec.md §4.3, §6) --------------------------

    /// `getBOMLines(parentId)`.
    pub fn get_bom_lines(&self, parent_id: &str) -> Result<Vec<BomLineWire>> {
        let value = self.get(&format!("/items/{parent_id}/bom"), &[])?;
        parse_bom_lines(&value)
    }

    pub fn create_bom_line(&self, parent_id: &str, line: &BomLineWire) -> Result<BomLineWire> {
        let value = self.post(&format!("/items/{parent_id}/bom"), bom_line_to_body(line))?;
        parse_bom_line(&value)
    }

    /// Update a BOM line's quantity. Per spec.md §4.5, if the server rejects
    /// this with 405 Method Not Allowed, callers should fall back to
    /// delete-then-create (see [`ArenaClient::is_method_not_allowed`]).
    pub fn update_bom_line(&self, parent_id: &str, line_id: &str, quantity: u32) -> Result<BomLineWire> {
        let value = self.put(
            &format!("/items/{parent_id}/bom/{line_id}"),
            json!({ "quantity": quantity }),
        )?;
        parse_bom_line(&value)
    }

    pub fn delete_bom_line(&self, parent_id: &str, line_id: &str) -> Result<()> {
        self.delete(&format!("/items/{parent_id}/bom/{line_id}"))?;
        Ok(())
    }

    /// `setItemAttribute(opaqueId, attributeId, value)`.
    pub fn set_item_attribute(&self, opaque_id: &str, attribute_id: &str, value: &str) -> Result<()> {
        self.post(
            &format!("/items/{opaque_id}/attributes"),
            json!({ "attributeId": attribute_id, "value": value }),
        )?;
        Ok(())
    }

    /// Delete an item by opaque id. Used by the push pipeline's rollback
    /// (spec.md §4.8.3); a 404 is treated as success by the caller, since a
    /// rolled-back item may already be gone.
    pub fn delete_item(&self, opaque_id: &str) -> Result<()> {
        self.delete(&format!("/items/{opaque_id}"))?;
        Ok(())
    }

    // ---- Catalog readers (spec.md §4.3) ------------------------------

    /// Cheap reachability probe used by pre-flight (spec.md §4.8.1 "Session
    /// reachable: probe a cheap metadata endpoint").
    pub fn get_workspace_settings(&self) -> Result<Value> {
        self.get("/settings/workspace", &[])
    }

    pub fn get_categories(&self) -> Result<Value> {
        self.get("/settings/categories", &[])
    }

    pub fn get_item_attribute_settings(&self) -> Result<Value> {
        self.get("/settings/items/attributes", &[])
    }

    pub fn get_lifecycle_phases(&self) -> Result<Value> {
        self.get("/settings/items/lifecyclephases", &[])
    }

    // ---- Multi-level fast path: bulk export (spec.md §4.9 Path B) ----

    /// Ensure a reusable export definition exists; recreate on 404.
    pub fn ensure_export_definition(&self, persisted_def_id: Option<&str>) -> Result<String> {
        if let Some(def_id) = persisted_def_id {
            match self.get(&format!("/exports/{def_id}"), &[]) {
                Ok(_) => return Ok(def_id.to_string()),
                Err(PlmError::NotFound(_)) => {}
                Err(err) => return Err(err),
            }
        }
        let value = self.post(
            "/exports",
            json!({ "world": "items", "view": "bom", "level": "full", "format": "json" }),
        )?;
        value
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| PlmError::Transport("export definition missing id".into()))
    }

    pub fn run_bom_export(&self, definition_id: &str, root_opaque_id: &str) -> Result<String> {
        let value = self.post(
            &format!("/exports/{definition_id}/runs"),
            json!({ "criteria": { "rootId": root_opaque_id } }),
        )?;
        value
            .get("run_id")
            .or_else(|| value.get("id"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| PlmError::Transport("export run missing id".into()))
    }

    pub fn get_export_run_status(&self, definition_id: &str, run_id: &str) -> Result<ExportRunStatus> {
        let value = self.get(&format!("/exports/{definition_id}/runs/{run_id}"), &[])?;
        let status = value
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or("UNKNOWN")
            .to_string();
        let file_id = value.get("file_id").and_then(Value::as_str).map(str::to_string);
        Ok(ExportRunStatus { status, file_id })
    }

    pub fn download_export_file(&self, definition_id: &str, run_id: &str, file_id: &str) -> Result<Value> {
        self.get(
            &format!("/exports/{definition_id}/runs/{run_id}/files/{file_id}/content"),
            &[],
        )
    }
}

/// Status of a bulk export run (spec.md §4.9 Path B).
#[derive(Debug, Clone)]
pub struct ExportRunStatus {
    pub status: String,
    pub file_id: Option<String>,
}

impl ExportRunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self.status.as_str(), "COMPLETE" | "FAILED" | "ABORTED")
    }
}

/// Wire representation of a BOM line, as returned/accepted by the Arena API
/// (distinct from [`plm_sync_types::BomLine`], which is resolved against the
/// cache and has no raw revision/lifecycle passthrough fields).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct BomLineWire {
    #[serde(default)]
    pub line_id: Option<String>,
    pub child_id: String,
    pub child_number: String,
    pub quantity: u32,
    #[serde(default)]
    pub line_number: Option<u32>,
    #[serde(default)]
    pub revision: Option<String>,
    #[serde(default)]
    pub lifecycle: Option<String>,
    #[serde(default)]
    pub additional_attributes: std::collections::BTreeMap<String, String>,
}

fn extract_error_message(body: &str) -> String {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| {
            let normalized = normalize_envelope(value);
            normalized
                .get("message")
                .or_else(|| normalized.get("error"))
                .or_else(|| normalized.get("errors"))
                .map(|v| v.to_string())
        })
        .unwrap_or_else(|| body.to_string());
    message.chars().take(ERROR_BODY_TRUNCATE).collect()
}

fn parse_item(value: &Value) -> Result<Item> {
    serde_json::from_value(value.clone())
        .map_err(|e| PlmError::Transport(format!("malformed item payload: {e}")))
}

fn parse_item_list(value: &Value) -> Result<Vec<Item>> {
    let results = value.get("results").cloned().unwrap_or_else(|| value.clone());
    serde_json::from_value(results)
        .map_err(|e| PlmError::Transport(format!("malformed item list payload: {e}")))
}

fn parse_bom_line(value: &Value) -> Result<BomLineWire> {
    serde_json::from_value(value.clone())
        .map_err(|e| PlmError::Transport(format!("malformed BOM line payload: {e}")))
}

fn parse_bom_lines(value: &Value) -> Result<Vec<BomLineWire>> {
    let results = value.get("results").cloned().unwrap_or_else(|| value.clone());
    serde_json::from_value(results)
        .map_err(|e| PlmError::Transport(format!("malformed BOM line list payload: {e}")))
}

fn item_to_request_body(item: &Item) -> Value {
    json!({
        "number": item.number,
        "name": item.name,
        "description": item.description,
        "category_id": item.category_id,
        "lifecycle_id": item.lifecycle_id,
        "is_assembly": item.is_assembly,
        "assembly_type": item.assembly_type,
    })
}

fn bom_line_to_body(line: &BomLineWire) -> Value {
    json!({
        "child_id": line.child_id,
        "quantity": line.quantity,
        "additional_attributes": line.additional_attributes,
    })
}

fn item_from_cache_entry(entry: &CacheEntry) -> Item {
    Item {
        id: entry.id.clone(),
        number: entry.number.clone(),
        name: entry.name.clone(),
        description: entry.description.clone(),
        revision: entry.revision.clone(),
        category_name: entry.category_name.clone(),
        category_id: None,
        lifecycle_name: entry.lifecycle_name.clone(),
        lifecycle_id: None,
        is_assembly: entry.is_assembly,
        assembly_type: entry.assembly_type.clone(),
    }
}
