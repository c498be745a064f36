use super::{agency_header, build_auth_headers, ApiErrorBody, ClientError};
use crate::config::{AuthConfig, WatchConfig};
use crate::error::RawError;
use crate::mutation::{MutationBackend, MutationKind};
use crate::traits::PullFetch;
use async_trait::async_trait;
use estate_core::{AgencyId, CollectionRecord};
use reqwest::header::HeaderMap;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Display;
use std::marker::PhantomData;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct RestClient {
    client: reqwest::Client,
    base_url: String,
    auth_header: HeaderMap,
}

impl RestClient {
    pub fn new(base_url: &str, auth: &AuthConfig, timeout: Duration) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let auth_header = build_auth_headers(auth)?;
        Ok(Self {
            client,
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            auth_header,
        })
    }

    pub fn from_config(config: &WatchConfig) -> Result<Self, ClientError> {
        Self::new(&config.api_base_url, &config.auth, config.request_timeout())
    }

    /// Whether a base URL and at least one credential are present.
    pub fn is_configured(&self) -> bool {
        !self.base_url.is_empty() && !self.auth_header.is_empty()
    }

    fn preflight(&self) -> Result<(), RawError> {
        if self.base_url.is_empty() {
            return Err(RawError::not_configured("API base URL is not set"));
        }
        if self.auth_header.is_empty() {
            return Err(RawError::not_configured("no API credentials configured"));
        }
        Ok(())
    }

    pub fn collection_path(agency_id: AgencyId, collection: &str) -> String {
        format!("/api/v1/agencies/{}/{}", agency_id, collection)
    }

    pub async fn get_json<T>(&self, agency_id: AgencyId, path: &str) -> Result<T, ClientError>
    where
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        let (name, value) = agency_header(agency_id);
        let response = self
            .client
            .get(url)
            .headers(self.auth_header.clone())
            .header(name, value)
            .send()
            .await?;
        self.parse_response(response).await
    }

    /// Send a request with an optional JSON body. `None` is returned for 204.
    pub async fn send_json<T, B>(
        &self,
        method: Method,
        agency_id: AgencyId,
        path: &str,
        body: Option<&B>,
    ) -> Result<Option<T>, ClientError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let url = format!("{}{}", self.base_url, path);
        let (name, value) = agency_header(agency_id);
        let mut request = self
            .client
            .request(method, url)
            .headers(self.auth_header.clone())
            .header(name, value);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await?;
        if response.status().as_u16() == 204 {
            return Ok(None);
        }
        self.parse_response(response).await.map(Some)
    }

    async fn parse_response<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, ClientError> {
        let status = response.status();
        if status.is_success() {
            Ok(response.json::<T>().await?)
        } else {
            let text = response.text().await?;
            if let Ok(body) = serde_json::from_str::<ApiErrorBody>(&text) {
                return Err(ClientError::Api {
                    status: status.as_u16(),
                    code: body.code,
                    message: body.message,
                });
            }
            Err(ClientError::Api {
                status: status.as_u16(),
                code: None,
                message: format!("HTTP {}: {}", status.as_u16(), text),
            })
        }
    }
}

/// Pulls one agency's collection of `R` over REST.
pub struct RestFetcher<R> {
    client: RestClient,
    _record: PhantomData<fn() -> R>,
}

impl<R> RestFetcher<R> {
    pub fn new(client: RestClient) -> Self {
        Self {
            client,
            _record: PhantomData,
        }
    }
}

#[async_trait]
impl<R> PullFetch<AgencyId, R> for RestFetcher<R>
where
    R: CollectionRecord + DeserializeOwned,
{
    fn preflight(&self) -> Result<(), RawError> {
        self.client.preflight()
    }

    async fn fetch(&self, scope: &AgencyId, cancel: CancellationToken) -> Result<Vec<R>, RawError> {
        let path = RestClient::collection_path(*scope, R::entity_kind().collection());
        let records: Vec<R> = tokio::select! {
            () = cancel.cancelled() => return Err(RawError::new("fetch cancelled")),
            result = self.client.get_json(*scope, &path) => result?,
        };

        let total = records.len();
        let records: Vec<R> = records
            .into_iter()
            .filter(|record| record.agency_id() == *scope)
            .collect();
        if records.len() != total {
            warn!(
                agency_id = %scope,
                dropped = total - records.len(),
                "Dropped records belonging to another agency"
            );
        }
        debug!(agency_id = %scope, count = records.len(), "Fetched collection");
        Ok(records)
    }
}

/// Writes `R` records of one agency over REST.
///
/// Create posts to the collection, update patches and delete removes
/// `{collection}/{id}`. Delete echoes the removed record back.
pub struct RestMutations<R> {
    client: RestClient,
    agency_id: AgencyId,
    _record: PhantomData<fn() -> R>,
}

impl<R> RestMutations<R> {
    pub fn new(client: RestClient, agency_id: AgencyId) -> Self {
        Self {
            client,
            agency_id,
            _record: PhantomData,
        }
    }
}

#[async_trait]
impl<R> MutationBackend<R, R> for RestMutations<R>
where
    R: CollectionRecord + Serialize + DeserializeOwned,
    R::Id: Display,
{
    fn preflight(&self) -> Result<(), RawError> {
        self.client.preflight()
    }

    async fn mutate(&self, kind: MutationKind, input: R) -> Result<R, RawError> {
        let collection = RestClient::collection_path(self.agency_id, R::entity_kind().collection());
        let (method, path) = match kind {
            MutationKind::Create => (Method::POST, collection),
            MutationKind::Update => (Method::PATCH, format!("{}/{}", collection, input.id())),
            MutationKind::Delete => (Method::DELETE, format!("{}/{}", collection, input.id())),
        };
        let body = match kind {
            MutationKind::Delete => None,
            _ => Some(&input),
        };
        let saved: Option<R> = self
            .client
            .send_json(method, self.agency_id, &path, body)
            .await?;
        Ok(saved.unwrap_or(input))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use estate_core::{EntityIdType, Property};

    #[test]
    fn test_collection_path() {
        let agency = AgencyId::nil();
        assert_eq!(
            RestClient::collection_path(agency, "properties"),
            "/api/v1/agencies/00000000-0000-0000-0000-000000000000/properties"
        );
    }

    #[tokio::test]
    async fn test_missing_credentials_fail_preflight() {
        let auth = AuthConfig::default();
        let timeout = Duration::from_secs(1);
        let client = RestClient::new("http://localhost:3000/", &auth, timeout).unwrap();
        assert!(!client.is_configured());
        let fetcher: RestFetcher<Property> = RestFetcher::new(client);
        let err = fetcher.preflight().unwrap_err();
        assert_eq!(crate::error::classify(&err).kind, ErrorKind::ConfigMissing);
    }

    #[tokio::test]
    async fn test_missing_base_url_fails_preflight() {
        let auth = AuthConfig {
            api_key: Some("key".to_string()),
            jwt: None,
        };
        let client = RestClient::new("  ", &auth, Duration::from_secs(1)).unwrap();
        let mutations: RestMutations<Property> = RestMutations::new(client, AgencyId::nil());
        assert!(mutations.preflight().is_err());
    }
}
