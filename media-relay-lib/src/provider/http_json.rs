use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::{Provider, ProviderKind, RegisteredProvider};
use crate::error::ProviderError;
use crate::types::{ContainerType, FileSource, MediaRequest, MediaType, ProviderResult, SubtitleTrack};
use crate::upstream;

/// One `[[providers]]` table from the configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,

    #[serde(default)]
    pub kind: ProviderKind,

    /// URL template for movies, e.g. `https://api.example/movie/{tmdb}`
    #[serde(default)]
    pub movie_url: Option<String>,

    /// URL template for episodes, e.g. `https://api.example/tv/{tmdb}/{season}/{episode}`
    #[serde(default)]
    pub tv_url: Option<String>,

    /// Overrides the kind's default timeout
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    /// Extra headers sent with every API call
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

/// A provider backed by a JSON API whose answer looks roughly like
/// `{ files: [...], subtitles: [...] }`.
///
/// The shape varies a lot between sites, so the adapter accepts flat
/// `files[]`, nested `sources[].files` (a list or a single object), a single
/// `file`, and subtitle lists named `subtitles` or `captions`.
#[derive(Debug)]
pub struct HttpJsonProvider {
    config: ProviderConfig,
    client: reqwest::Client,
}

impl HttpJsonProvider {
    pub fn new(config: ProviderConfig, client: reqwest::Client) -> Self {
        Self { config, client }
    }

    /// Wrap into a registration using the configured kind and timeout.
    pub fn into_registered(self) -> RegisteredProvider {
        let kind = self.config.kind;
        let timeout = self.config.timeout_ms.map(Duration::from_millis);
        let registered = RegisteredProvider::new(std::sync::Arc::new(self), kind);
        match timeout {
            Some(t) => registered.with_timeout(t),
            None => registered,
        }
    }

    /// API URL for `request`, or `None` when there is no template for its
    /// media type or the template needs an id the request lacks.
    fn endpoint(&self, request: &MediaRequest) -> Option<String> {
        let template = match request.media_type {
            MediaType::Movie => self.config.movie_url.as_deref(),
            MediaType::Tv => self.config.tv_url.as_deref(),
        }?;
        let imdb = request.imdb_id.as_deref().filter(|id| !id.is_empty());
        if template.contains("{imdb}") && imdb.is_none() {
            return None;
        }
        let url = template
            .replace("{tmdb}", &request.tmdb_id.to_string())
            .replace("{imdb}", imdb.unwrap_or_default())
            .replace("{season}", &request.season.unwrap_or(1).to_string())
            .replace("{episode}", &request.episode.unwrap_or(1).to_string());
        Some(url)
    }
}

#[async_trait]
impl Provider for HttpJsonProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn supports(&self, request: &MediaRequest) -> bool {
        self.endpoint(request).is_some()
    }

    async fn fetch_sources(&self, request: &MediaRequest) -> Result<ProviderResult, ProviderError> {
        let name = self.config.name.as_str();
        let Some(endpoint) = self.endpoint(request) else {
            debug!(provider = name, media_type = %request.media_type, "no endpoint for request");
            return Ok(ProviderResult::new(name));
        };

        let response = self
            .client
            .get(&endpoint)
            .headers(upstream::merge_headers(&self.config.headers))
            .send()
            .await
            .map_err(|e| ProviderError::network(name, e.to_string()))?;

        if !response.status().is_success() {
            return Err(ProviderError::network(
                name,
                format!("HTTP {}", response.status().as_u16()),
            ));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::network(name, e.to_string()))?;
        let value: Value =
            serde_json::from_str(&body).map_err(|e| ProviderError::parse(name, e.to_string()))?;

        let base = Url::parse(&endpoint).map_err(|e| ProviderError::parse(name, e.to_string()))?;
        normalize(name, &base, &value)
    }
}

/// Turn whatever JSON a provider returned into a [`ProviderResult`].
pub(crate) fn normalize(provider: &str, base: &Url, value: &Value) -> Result<ProviderResult, ProviderError> {
    let mut result = ProviderResult::new(provider);

    let root = match value {
        Value::Object(map) => map,
        Value::Array(items) => {
            for item in items {
                push_file(&mut result, base, item, None);
            }
            return Ok(result);
        }
        other => {
            return Err(ProviderError::parse(
                provider,
                format!("expected an object, got {}", type_name(other)),
            ))
        }
    };

    for key in ["files", "file"] {
        match root.get(key) {
            Some(Value::Array(items)) => {
                for item in items {
                    push_file(&mut result, base, item, None);
                }
            }
            Some(item) if item.is_object() || item.is_string() => {
                push_file(&mut result, base, item, None)
            }
            _ => {}
        }
    }

    if let Some(Value::Array(sources)) = root.get("sources") {
        for source in sources {
            let Value::Object(map) = source else {
                continue;
            };
            let tag = str_field(map, &["source", "name", "server"]);
            match map.get("files") {
                Some(Value::Array(items)) => {
                    for item in items {
                        push_file(&mut result, base, item, tag);
                    }
                }
                Some(item) if item.is_object() || item.is_string() => {
                    push_file(&mut result, base, item, tag)
                }
                // A source entry may itself be the file.
                _ => push_file(&mut result, base, source, None),
            }
        }
    }

    for key in ["subtitles", "captions"] {
        if let Some(Value::Array(items)) = root.get(key) {
            for item in items {
                if let Some(track) = subtitle_from(base, item) {
                    result.subtitles.push(track);
                }
            }
        }
    }

    Ok(result)
}

fn push_file(result: &mut ProviderResult, base: &Url, item: &Value, parent_tag: Option<&str>) {
    let (raw_url, map) = match item {
        Value::String(s) => (s.as_str(), None),
        Value::Object(map) => match str_field(map, &["file", "url"]) {
            Some(u) => (u, Some(map)),
            None => return,
        },
        _ => return,
    };
    let Some(url) = absolute(base, raw_url) else {
        return;
    };

    let mut file = FileSource::new(&result.provider_name, url);
    if let Some(map) = map {
        if let Some(ct) = str_field(map, &["type"]).and_then(ContainerType::from_label) {
            file.container_type = ct;
        }
        file.quality = str_field(map, &["quality"]).map(str::to_string);
        if let Some(lang) = str_field(map, &["lang", "language"]) {
            file.lang = lang.to_string();
        }
        if let Some(Value::Object(headers)) = map.get("headers") {
            for (k, v) in headers {
                if let Value::String(v) = v {
                    file.headers.insert(k.clone(), v.clone());
                }
            }
        }
        file.source_tag = str_field(map, &["source"]).map(str::to_string);
    }
    if file.source_tag.is_none() {
        file.source_tag = parent_tag.map(str::to_string);
    }
    result.files.push(file);
}

fn subtitle_from(base: &Url, item: &Value) -> Option<SubtitleTrack> {
    let map = item.as_object()?;
    let url = absolute(base, str_field(map, &["url", "file"])?)?;
    let lang = str_field(map, &["lang", "language", "label"]).unwrap_or("en");
    Some(SubtitleTrack::new(url, lang))
}

fn absolute(base: &Url, raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    base.join(raw).ok().map(String::from)
}

fn str_field<'a>(map: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|k| map.get(*k).and_then(Value::as_str))
        .filter(|s| !s.is_empty())
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
