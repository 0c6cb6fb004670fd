//! `DocumentStore` over the Cosmos DB REST gateway.

pub mod auth;
pub mod locations;
pub mod session;

use crate::config::{ConnectionMode, ConsistencyLevel};
use crate::connection::ConnectionOptions;
use crate::error::{ResourceKind, StoreError, StoreResult};
use crate::store::{
    ContainerProperties, ContainerRef, DatabaseProperties, DocumentStore, PageRequest,
    ProvisionOutcome, Provisioned, QueryPage,
};
use async_trait::async_trait;
use auth::MasterKey;
use chrono::Utc;
use locations::{AccountDescriptor, ResolvedEndpoints};
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use session::SessionTokens;
use tokio::sync::OnceCell;

pub const API_VERSION: &str = "2018-12-31";

const HDR_DATE: &str = "x-ms-date";
const HDR_VERSION: &str = "x-ms-version";
const HDR_CONSISTENCY: &str = "x-ms-consistency-level";
const HDR_SESSION: &str = "x-ms-session-token";
const HDR_PARTITION_KEY: &str = "x-ms-documentdb-partitionkey";
const HDR_UPSERT: &str = "x-ms-documentdb-is-upsert";
const HDR_THROUGHPUT: &str = "x-ms-offer-throughput";
const HDR_IS_QUERY: &str = "x-ms-documentdb-isquery";
const HDR_CROSS_PARTITION: &str = "x-ms-documentdb-query-enablecrosspartition";
const HDR_MAX_ITEMS: &str = "x-ms-max-item-count";
const HDR_CONTINUATION: &str = "x-ms-continuation";
const HDR_SUB_STATUS: &str = "x-ms-substatus";

const QUERY_CONTENT_TYPE: &str = "application/query+json";

/// Client for one Cosmos DB account in gateway mode.
///
/// Regional endpoints are resolved from the account descriptor on the first
/// request; reads then go to the first preferred region the account offers.
/// Until the descriptor has been read successfully, every request retries it.
/// No client-side timeouts are set; transport defaults apply.
pub struct CosmosClient {
    http: reqwest::Client,
    endpoint: Url,
    key: MasterKey,
    preferred_regions: Vec<String>,
    consistency: ConsistencyLevel,
    endpoints: OnceCell<ResolvedEndpoints>,
    sessions: SessionTokens,
}

impl CosmosClient {
    pub fn new(options: &ConnectionOptions) -> StoreResult<Self> {
        if options.mode != ConnectionMode::Gateway {
            return Err(StoreError::Config(format!(
                "connection mode `{}` is not supported; use gateway",
                options.mode
            )));
        }

        let endpoint = Url::parse(options.endpoint.trim()).map_err(|err| {
            StoreError::Config(format!("invalid account endpoint `{}`: {err}", options.endpoint))
        })?;
        if !matches!(endpoint.scheme(), "https" | "http") || endpoint.cannot_be_a_base() {
            return Err(StoreError::Config(format!(
                "account endpoint `{endpoint}` must be an http(s) URL"
            )));
        }

        let key = MasterKey::from_base64(options.key.expose())?;

        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(options.accept_invalid_certs)
            .build()?;

        Ok(Self {
            http,
            endpoint,
            key,
            preferred_regions: options.preferred_regions.clone(),
            consistency: options.consistency,
            endpoints: OnceCell::new(),
            sessions: SessionTokens::new(),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Endpoints in use, once the first request has resolved them.
    pub fn resolved_endpoints(&self) -> Option<&ResolvedEndpoints> {
        self.endpoints.get()
    }

    async fn endpoints(&self) -> StoreResult<&ResolvedEndpoints> {
        self.endpoints
            .get_or_try_init(|| async {
                let descriptor = self.read_account().await.inspect_err(|err| {
                    tracing::error!(
                        endpoint = %self.endpoint,
                        error = %err,
                        "cannot read account descriptor"
                    );
                })?;
                let resolved =
                    ResolvedEndpoints::resolve(&self.endpoint, &descriptor, &self.preferred_regions);
                tracing::info!(
                    account = descriptor.id.as_deref().unwrap_or("unknown"),
                    write_endpoint = %resolved.write,
                    read_endpoint = %resolved.read,
                    read_region = resolved.read_region.as_deref().unwrap_or("default"),
                    "resolved account endpoints"
                );
                Ok::<_, StoreError>(resolved)
            })
            .await
    }

    async fn read_account(&self) -> StoreResult<AccountDescriptor> {
        let route = Route::account();
        let response = self
            .send_to(&self.endpoint, Method::GET, &route, None, |request| request)
            .await?;
        let response = check(response, ResourceKind::Account, self.endpoint.as_str()).await?;
        read_json(response).await
    }

    async fn read_database(&self, database: &str) -> StoreResult<DatabaseProperties> {
        let route = Route::resource("dbs", &["dbs", database]);
        let response = self
            .execute(Method::GET, &route, None, |request| request)
            .await?;
        let response = check(response, ResourceKind::Database, database).await?;
        read_json(response).await
    }

    async fn execute(
        &self,
        method: Method,
        route: &Route,
        session_scope: Option<&str>,
        build: impl FnOnce(RequestBuilder) -> RequestBuilder,
    ) -> StoreResult<Response> {
        let endpoints = self.endpoints().await?;
        let base = if route.read {
            &endpoints.read
        } else {
            &endpoints.write
        };
        self.send_to(base, method, route, session_scope, build).await
    }

    async fn send_to(
        &self,
        base: &Url,
        method: Method,
        route: &Route,
        session_scope: Option<&str>,
        build: impl FnOnce(RequestBuilder) -> RequestBuilder,
    ) -> StoreResult<Response> {
        let url = route.url(base)?;
        let date = auth::http_date(Utc::now());
        let authorization =
            self.key
                .authorization(method.as_str(), route.resource_type, &route.link, &date);

        let mut request = self
            .http
            .request(method.clone(), url)
            .header(AUTHORIZATION, authorization)
            .header(HDR_DATE, date)
            .header(HDR_VERSION, API_VERSION)
            .header(ACCEPT, "application/json");

        if route.read {
            request = request.header(HDR_CONSISTENCY, self.consistency.to_string());
        }
        if let Some(scope) = session_scope
            && self.consistency == ConsistencyLevel::Session
            && let Some(token) = self.sessions.header_for(scope)
        {
            request = request.header(HDR_SESSION, token);
        }

        let response = build(request).send().await?;

        if let Some(scope) = session_scope
            && let Some(token) = response
                .headers()
                .get(HDR_SESSION)
                .and_then(|value| value.to_str().ok())
        {
            self.sessions.record(scope, token);
        }

        tracing::trace!(
            method = %method,
            link = %route.link,
            status = response.status().as_u16(),
            "gateway request"
        );
        Ok(response)
    }
}

impl std::fmt::Debug for CosmosClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CosmosClient")
            .field("endpoint", &self.endpoint.as_str())
            .field("preferred_regions", &self.preferred_regions)
            .field("consistency", &self.consistency)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl DocumentStore for CosmosClient {
    fn backend_name(&self) -> &'static str {
        "cosmos"
    }

    async fn create_database_if_not_exists(
        &self,
        database: &str,
    ) -> StoreResult<Provisioned<DatabaseProperties>> {
        let route = Route::feed("dbs", &[]);
        let response = self
            .execute(Method::POST, &route, None, |request| {
                request.json(&json!({ "id": database }))
            })
            .await?;

        if response.status() == StatusCode::CONFLICT {
            let resource = self.read_database(database).await?;
            return Ok(Provisioned {
                resource,
                outcome: ProvisionOutcome::Existing,
            });
        }

        let response = check(response, ResourceKind::Database, database).await?;
        Ok(Provisioned {
            resource: read_json(response).await?,
            outcome: ProvisionOutcome::Created,
        })
    }

    async fn create_container_if_not_exists(
        &self,
        database: &str,
        properties: &ContainerProperties,
        throughput: Option<u32>,
    ) -> StoreResult<Provisioned<ContainerProperties>> {
        let route = Route::feed("colls", &["dbs", database]);
        let response = self
            .execute(Method::POST, &route, None, |request| {
                let request = request.json(properties);
                match throughput {
                    Some(throughput) => request.header(HDR_THROUGHPUT, throughput.to_string()),
                    None => request,
                }
            })
            .await?;

        if response.status() == StatusCode::CONFLICT {
            let resource = self
                .read_container(&ContainerRef::new(database, &properties.id))
                .await?;
            return Ok(Provisioned {
                resource,
                outcome: ProvisionOutcome::Existing,
            });
        }

        // a 404 here means the parent database is missing
        let response = check(response, ResourceKind::Database, database).await?;
        Ok(Provisioned {
            resource: read_json(response).await?,
            outcome: ProvisionOutcome::Created,
        })
    }

    async fn read_container(&self, target: &ContainerRef) -> StoreResult<ContainerProperties> {
        let route = Route::resource("colls", &["dbs", &target.database, "colls", &target.container]);
        let response = self
            .execute(Method::GET, &route, None, |request| request)
            .await?;
        let response = check(response, ResourceKind::Container, &target.to_string()).await?;
        read_json(response).await
    }

    async fn create_item(
        &self,
        target: &ContainerRef,
        partition_key: &str,
        item: Value,
    ) -> StoreResult<Value> {
        self.write_item(target, partition_key, item, false).await
    }

    async fn upsert_item(
        &self,
        target: &ContainerRef,
        partition_key: &str,
        item: Value,
    ) -> StoreResult<Value> {
        self.write_item(target, partition_key, item, true).await
    }

    async fn read_item(
        &self,
        target: &ContainerRef,
        id: &str,
        partition_key: &str,
    ) -> StoreResult<Value> {
        let route = Route::document(target, id).for_read();
        let scope = target.link();
        let pk = partition_key_header(partition_key)?;
        let response = self
            .execute(Method::GET, &route, Some(&scope), |request| {
                request.header(HDR_PARTITION_KEY, pk)
            })
            .await?;
        let response = check(response, ResourceKind::Document, id).await?;
        read_json(response).await
    }

    async fn delete_item(
        &self,
        target: &ContainerRef,
        id: &str,
        partition_key: &str,
    ) -> StoreResult<()> {
        let route = Route::document(target, id);
        let scope = target.link();
        let pk = partition_key_header(partition_key)?;
        let response = self
            .execute(Method::DELETE, &route, Some(&scope), |request| {
                request.header(HDR_PARTITION_KEY, pk)
            })
            .await?;
        check(response, ResourceKind::Document, id).await?;
        Ok(())
    }

    async fn query_items(
        &self,
        target: &ContainerRef,
        query: &str,
        page: &PageRequest,
    ) -> StoreResult<QueryPage> {
        let route = Route::feed("docs", &["dbs", &target.database, "colls", &target.container])
            .for_read();
        let scope = target.link();
        let body = serde_json::to_vec(&json!({ "query": query, "parameters": [] }))?;
        let response = self
            .execute(Method::POST, &route, Some(&scope), |request| {
                let request = request
                    .header(CONTENT_TYPE, QUERY_CONTENT_TYPE)
                    .header(HDR_IS_QUERY, "True")
                    .header(HDR_CROSS_PARTITION, "True")
                    .header(HDR_MAX_ITEMS, page.max_item_count.to_string());
                let request = match page.continuation.as_deref() {
                    Some(token) => request.header(HDR_CONTINUATION, token),
                    None => request,
                };
                request.body(body)
            })
            .await?;
        let response = check(response, ResourceKind::Container, &target.to_string()).await?;

        let continuation = response
            .headers()
            .get(HDR_CONTINUATION)
            .and_then(|value| value.to_str().ok())
            .filter(|token| !token.is_empty())
            .map(str::to_string);
        let feed: QueryFeed = read_json(response).await?;
        Ok(QueryPage {
            documents: feed.documents,
            continuation,
        })
    }

    async fn close(&self) {
        self.sessions.clear();
        tracing::debug!(endpoint = %self.endpoint, "cosmos client closed");
    }
}

impl CosmosClient {
    async fn write_item(
        &self,
        target: &ContainerRef,
        partition_key: &str,
        item: Value,
        upsert: bool,
    ) -> StoreResult<Value> {
        let id = item
            .get("id")
            .and_then(Value::as_str)
            .ok_or(StoreError::MissingId)?
            .to_string();
        let route = Route::feed("docs", &["dbs", &target.database, "colls", &target.container]);
        let scope = target.link();
        let pk = partition_key_header(partition_key)?;
        let response = self
            .execute(Method::POST, &route, Some(&scope), |request| {
                let request = request.header(HDR_PARTITION_KEY, pk).json(&item);
                if upsert {
                    request.header(HDR_UPSERT, "True")
                } else {
                    request
                }
            })
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(StoreError::not_found(ResourceKind::Container, target.to_string()));
        }
        let response = check(response, ResourceKind::Document, &id).await?;
        read_json(response).await
    }
}

#[derive(Debug, Deserialize)]
struct QueryFeed {
    #[serde(rename = "Documents", default)]
    documents: Vec<Value>,
}

/// Addressing for one gateway call: URL path plus the link that gets signed.
#[derive(Debug, Clone)]
struct Route {
    resource_type: &'static str,
    segments: Vec<String>,
    link: String,
    read: bool,
}

impl Route {
    fn account() -> Self {
        Self {
            resource_type: "",
            segments: Vec::new(),
            link: String::new(),
            read: false,
        }
    }

    /// A feed (`POST` create or query) under `parent`; the signed link is the parent's.
    fn feed(resource_type: &'static str, parent: &[&str]) -> Self {
        let mut segments: Vec<String> = parent.iter().map(|s| s.to_string()).collect();
        segments.push(resource_type.to_string());
        Self {
            resource_type,
            link: parent.join("/"),
            segments,
            read: false,
        }
    }

    fn resource(resource_type: &'static str, segments: &[&str]) -> Self {
        Self {
            resource_type,
            segments: segments.iter().map(|s| s.to_string()).collect(),
            link: segments.join("/"),
            read: true,
        }
    }

    fn document(target: &ContainerRef, id: &str) -> Self {
        let mut route = Self::resource(
            "docs",
            &["dbs", &target.database, "colls", &target.container, "docs", id],
        );
        route.read = false;
        route
    }

    fn for_read(mut self) -> Self {
        self.read = true;
        self
    }

    fn url(&self, base: &Url) -> StoreResult<Url> {
        let mut url = base.clone();
        url.path_segments_mut()
            .map_err(|_| StoreError::Config(format!("endpoint `{base}` cannot carry a path")))?
            .clear()
            .extend(&self.segments);
        Ok(url)
    }
}

async fn check(response: Response, resource: ResourceKind, id: &str) -> StoreResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    match status {
        StatusCode::NOT_FOUND => Err(StoreError::not_found(resource, id)),
        StatusCode::CONFLICT => Err(StoreError::conflict(resource, id)),
        _ => {
            let sub_status = response
                .headers()
                .get(HDR_SUB_STATUS)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.parse().ok());
            let body = response.text().await.unwrap_or_default();
            Err(StoreError::Status {
                status: status.as_u16(),
                sub_status,
                message: error_message(&body, status),
            })
        }
    }
}

fn error_message(body: &str, status: StatusCode) -> String {
    let from_body = serde_json::from_str::<Value>(body).ok().and_then(|value| {
        value
            .get("message")
            .and_then(Value::as_str)
            .map(|message| message.lines().next().unwrap_or(message).trim().to_string())
    });
    match from_body {
        Some(message) if !message.is_empty() => message,
        _ if !body.trim().is_empty() => body.trim().to_string(),
        _ => status
            .canonical_reason()
            .unwrap_or("unexpected status")
            .to_string(),
    }
}

async fn read_json<T: DeserializeOwned>(response: Response) -> StoreResult<T> {
    let bytes = response.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// JSON array form of a single partition key value, with non-ASCII escaped so it
/// is a valid header value.
fn partition_key_header(value: &str) -> StoreResult<String> {
    let encoded = serde_json::to_string(&[value])?;
    let mut out = String::with_capacity(encoded.len());
    for ch in encoded.chars() {
        if ch.is_ascii() {
            out.push(ch);
        } else {
            let mut units = [0u16; 2];
            for unit in ch.encode_utf16(&mut units) {
                out.push_str(&format!("\\u{:04x}", unit));
            }
        }
    }
    Ok(out)
}
