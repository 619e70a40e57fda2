use async_trait::async_trait;
use log::debug;
use reqwest::{ Client as HttpClient, header::{ HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION } };
use serde::Deserialize;
use url::Url;

use super::{ Item, ItemQuery, ItemStore, StoreError };

/// Reads items through the hosted backend's PostgREST interface.
pub struct SupabaseItemStore {
    http: HttpClient,
    endpoint: Url,
}

#[derive(Deserialize)]
struct PostgrestError {
    #[serde(default)]
    message: Option<String>,
}

impl SupabaseItemStore {
    pub fn new(base_url: &str, api_key: &str, table: &str) -> Result<Self, StoreError> {
        let base = Url::parse(&format!("{}/", base_url.trim().trim_end_matches('/'))).map_err(|e|
            StoreError::Config(format!("invalid SUPABASE_URL '{}': {}", base_url, e))
        )?;
        let endpoint = base
            .join(&format!("rest/v1/{}", table))
            .map_err(|e| StoreError::Config(format!("invalid table name '{}': {}", table, e)))?;

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let key = HeaderValue::from_str(api_key).map_err(|e|
            StoreError::Config(format!("invalid API key: {}", e))
        )?;
        headers.insert("apikey", key);
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", api_key)).map_err(|e|
                StoreError::Config(format!("invalid API key: {}", e))
            )?
        );

        let http = HttpClient::builder().default_headers(headers).build()?;
        Ok(Self { http, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

/// Quotes a value for use inside a PostgREST `or=(...)` list.
fn quote_filter_value(raw: &str) -> String {
    let escaped = raw.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"*{}*\"", escaped)
}

pub(crate) fn build_query_params(query: &ItemQuery) -> Vec<(String, String)> {
    let mut params = vec![("select".to_string(), "*".to_string())];
    if !query.text.is_empty() {
        let value = quote_filter_value(&query.text);
        params.push((
            "or".to_string(),
            format!("(title.ilike.{},description.ilike.{})", value, value),
        ));
    }
    if let Some(item_type) = query.item_type {
        params.push(("type".to_string(), format!("eq.{}", item_type)));
    }
    params.push(("deleted_at".to_string(), "is.null".to_string()));
    params.push(("order".to_string(), "created_at.desc".to_string()));
    params.push(("limit".to_string(), query.limit.to_string()));
    params
}

#[async_trait]
impl ItemStore for SupabaseItemStore {
    async fn search(&self, query: &ItemQuery) -> Result<Vec<Item>, StoreError> {
        let params = build_query_params(query);
        debug!("Querying {} with {:?}", self.endpoint, params);

        let resp = self.http.get(self.endpoint.clone()).query(&params).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let message = serde_json
                ::from_str::<PostgrestError>(&body)
                .ok()
                .and_then(|e| e.message)
                .unwrap_or(body);
            return Err(StoreError::Backend { status: status.as_u16(), message });
        }

        let mut items: Vec<Item> = resp
            .json()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))?;
        items.truncate(query.limit);
        Ok(items)
    }

    fn name(&self) -> &'static str {
        "supabase"
    }
}
