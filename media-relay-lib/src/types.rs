//! Data model shared by the orchestrator, the providers and the proxies.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::ProviderError;

/// Kind of media being located
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Movie,
    Tv,
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaType::Movie => f.write_str("movie"),
            MediaType::Tv => f.write_str("tv"),
        }
    }
}

/// Identifies the content to locate. Built once per inbound call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaRequest {
    pub tmdb_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imdb_id: Option<String>,
    #[serde(rename = "type")]
    pub media_type: MediaType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_year: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub season: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub episode: Option<u32>,
}

impl MediaRequest {
    pub fn movie(tmdb_id: u64) -> Self {
        Self {
            tmdb_id,
            imdb_id: None,
            media_type: MediaType::Movie,
            title: None,
            release_year: None,
            season: None,
            episode: None,
        }
    }

    pub fn episode(tmdb_id: u64, season: u32, episode: u32) -> Self {
        Self {
            media_type: MediaType::Tv,
            season: Some(season),
            episode: Some(episode),
            ..Self::movie(tmdb_id)
        }
    }

    /// Deterministic cache key built from `(tmdbId, type, season, episode)`.
    pub fn cache_key(&self) -> String {
        match self.media_type {
            MediaType::Movie => format!("movie:{}", self.tmdb_id),
            MediaType::Tv => format!(
                "tv:{}:{}:{}",
                self.tmdb_id,
                self.season.unwrap_or(0),
                self.episode.unwrap_or(0)
            ),
        }
    }
}

/// Delivery format of a playable candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerType {
    Hls,
    Mp4,
    Dash,
    Embed,
}

impl ContainerType {
    /// Guess the container from a URL. Unknown extensions are treated as HLS.
    pub fn infer(url: &str) -> Self {
        let path = strip_query(url).to_ascii_lowercase();
        if path.contains("m3u8") {
            ContainerType::Hls
        } else if path.ends_with(".mpd") {
            ContainerType::Dash
        } else if is_direct_video_path(&path) {
            ContainerType::Mp4
        } else {
            ContainerType::Hls
        }
    }

    /// Parse the loose type labels providers use.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.to_ascii_lowercase().as_str() {
            "hls" | "m3u8" => Some(ContainerType::Hls),
            "mp4" | "mkv" | "webm" | "file" | "video" => Some(ContainerType::Mp4),
            "dash" | "mpd" => Some(ContainerType::Dash),
            "embed" | "iframe" => Some(ContainerType::Embed),
            _ => None,
        }
    }
}

fn strip_query(url: &str) -> &str {
    url.split(|c| c == '?' || c == '#').next().unwrap_or(url)
}

/// Whether a URL path names a direct video file rather than a playlist.
pub fn is_direct_video_path(path: &str) -> bool {
    const DIRECT: [&str; 4] = [".mp4", ".mkv", ".webm", ".avi"];
    let lower = path.to_ascii_lowercase();
    DIRECT.iter().any(|ext| lower.contains(ext))
}

fn default_lang() -> String {
    "en".to_string()
}

/// One playable candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileSource {
    pub url: String,
    pub container_type: ContainerType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<String>,
    #[serde(default = "default_lang")]
    pub lang: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    pub provider_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_tag: Option<String>,
}

impl FileSource {
    pub fn new(provider: &str, url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            container_type: ContainerType::infer(&url),
            url,
            quality: None,
            lang: default_lang(),
            headers: BTreeMap::new(),
            provider_name: provider.to_string(),
            source_tag: None,
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_tag(mut self, tag: &str) -> Self {
        self.source_tag = Some(tag.to_string());
        self
    }

    /// Two candidates with the same key collapse into one. The provider
    /// is not part of the key: the same untagged URL from two providers is
    /// one candidate, and the first-registered provider keeps it.
    pub fn dedup_key(&self) -> (&str, Option<&str>) {
        (&self.url, self.source_tag.as_deref())
    }

    /// Whether the candidate should be probed as a playlist.
    pub fn is_hls(&self) -> bool {
        self.container_type == ContainerType::Hls || self.url.contains("m3u8")
    }
}

/// Subtitle file format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubtitleFormat {
    Vtt,
    Srt,
}

impl SubtitleFormat {
    pub fn infer(url: &str) -> Self {
        let path = strip_query(url);
        if path.to_ascii_lowercase().ends_with(".srt") {
            SubtitleFormat::Srt
        } else {
            SubtitleFormat::Vtt
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtitleTrack {
    pub url: String,
    pub lang: String,
    pub format: SubtitleFormat,
}

impl SubtitleTrack {
    pub fn new(url: impl Into<String>, lang: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            format: SubtitleFormat::infer(&url),
            url,
            lang: lang.into(),
        }
    }
}

/// Normalized output of one provider call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderResult {
    pub provider_name: String,
    #[serde(default)]
    pub files: Vec<FileSource>,
    #[serde(default)]
    pub subtitles: Vec<SubtitleTrack>,
}

impl ProviderResult {
    pub fn new(provider: &str) -> Self {
        Self {
            provider_name: provider.to_string(),
            ..Default::default()
        }
    }
}

/// Finished aggregation. This is the unit stored in the response cache.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregationResult {
    pub files: Vec<FileSource>,
    pub subtitles: Vec<SubtitleTrack>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<Vec<ProviderError>>,
}

impl AggregationResult {
    /// True when no playable file was found. The route layer maps this to
    /// the "no sources" answer.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_ignores_optional_metadata() {
        let mut a = MediaRequest::movie(155);
        let b = MediaRequest::movie(155);
        a.title = Some("The Dark Knight".into());
        a.release_year = Some(2008);
        assert_eq!(a.cache_key(), b.cache_key());
        assert_eq!(a.cache_key(), "movie:155");
    }

    #[test]
    fn test_cache_key_distinguishes_episodes() {
        let e1 = MediaRequest::episode(1399, 1, 1);
        let e2 = MediaRequest::episode(1399, 1, 2);
        assert_ne!(e1.cache_key(), e2.cache_key());
        assert_eq!(e2.cache_key(), "tv:1399:1:2");
    }

    #[test]
    fn test_container_inference() {
        assert_eq!(ContainerType::infer("https://a/x.m3u8"), ContainerType::Hls);
        assert_eq!(ContainerType::infer("https://a/x.MP4?t=1"), ContainerType::Mp4);
        assert_eq!(ContainerType::infer("https://a/manifest.mpd"), ContainerType::Dash);
        assert_eq!(ContainerType::infer("https://a/play/123"), ContainerType::Hls);
        assert_eq!(ContainerType::from_label("M3U8"), Some(ContainerType::Hls));
        assert_eq!(ContainerType::from_label("weird"), None);
    }

    #[test]
    fn test_file_source_json_shape() {
        let file = FileSource::new("alpha", "https://a/x.m3u8")
            .with_header("Referer", "https://a/")
            .with_tag("server-1");
        let json = serde_json::to_value(&file).unwrap();
        assert_eq!(json["url"], "https://a/x.m3u8");
        assert_eq!(json["containerType"], "hls");
        assert_eq!(json["providerName"], "alpha");
        assert_eq!(json["sourceTag"], "server-1");
        assert_eq!(json["headers"]["Referer"], "https://a/");
        assert!(json.get("quality").is_none());
    }

    #[test]
    fn test_subtitle_format_inference() {
        assert_eq!(SubtitleTrack::new("https://s/en.srt", "en").format, SubtitleFormat::Srt);
        assert_eq!(SubtitleTrack::new("https://s/en.vtt?x=1", "en").format, SubtitleFormat::Vtt);
    }

    #[test]
    fn test_empty_result_omits_diagnostics() {
        let json = serde_json::to_string(&AggregationResult::default()).unwrap();
        assert_eq!(json, r#"{"files":[],"subtitles":[]}"#);
    }
}
