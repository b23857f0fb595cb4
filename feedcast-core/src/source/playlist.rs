use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info};
use url::Url;

use crate::config::SourceSection;

use super::{MediaReference, PlaylistContext, PlaylistResolver, SourceError, SourceResult};

/// Playlist expansion through the YouTube Data API v3.
#[derive(Debug, Clone)]
pub struct YoutubeDataApi {
    base: String,
    key: String,
    max_results: u32,
    client: Client,
}

impl YoutubeDataApi {
    pub fn new(config: &SourceSection) -> SourceResult<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|err| SourceError::resolution("http client", err))?;
        Ok(Self {
            base: config.api_base.trim_end_matches('/').to_string(),
            key: config.api_key.clone(),
            max_results: config.max_results.max(1),
            client,
        })
    }

    fn endpoint(&self, resource: &str, params: &[(&str, &str)]) -> SourceResult<Url> {
        let max_results = self.max_results.to_string();
        let mut query = vec![("maxResults", max_results.as_str()), ("part", "snippet")];
        query.extend_from_slice(params);
        query.push(("key", self.key.as_str()));
        Url::parse_with_params(&format!("{}/{resource}", self.base), &query)
            .map_err(|err| SourceError::resolution(resource, err))
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url, target: &str) -> SourceResult<T> {
        self.client
            .get(url)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|err| SourceError::resolution(target, err))?
            .json::<T>()
            .await
            .map_err(|err| SourceError::resolution(target, err))
    }

    async fn playlist_title(&self, playlist_id: &str) -> SourceResult<String> {
        let url = self.endpoint("playlists", &[("id", playlist_id)])?;
        let page: Page<PlaylistSnippet> = self.get_json(url, playlist_id).await?;
        match page.items.as_slice() {
            [only] => Ok(only.snippet.title.clone()),
            [] => Err(SourceError::resolution(
                playlist_id,
                "no playlists found with this id",
            )),
            many => Err(SourceError::resolution(
                playlist_id,
                format!("{} playlists found with this id", many.len()),
            )),
        }
    }
}

#[async_trait]
impl PlaylistResolver for YoutubeDataApi {
    async fn expand(&self, playlist_id: &str) -> SourceResult<Vec<MediaReference>> {
        let title = self.playlist_title(playlist_id).await?;
        info!(playlist_id, title = %title, "expanding playlist");

        let mut entries = Vec::new();
        let mut page_token = String::new();
        loop {
            let url = self.endpoint(
                "playlistItems",
                &[("playlistId", playlist_id), ("pageToken", page_token.as_str())],
            )?;
            let page: Page<ItemSnippet> = self.get_json(url, playlist_id).await?;
            entries.extend(page.items.into_iter().map(|item| item.snippet));
            match page.next_page_token {
                Some(next) if !next.is_empty() && next != page_token => page_token = next,
                _ => break,
            }
        }
        debug!(playlist_id, entries = entries.len(), "playlist drained");
        Ok(into_references(playlist_id, &title, entries))
    }
}

fn into_references(
    playlist_id: &str,
    title: &str,
    entries: Vec<ItemFields>,
) -> Vec<MediaReference> {
    let size = entries.len() as i64;
    entries
        .into_iter()
        .map(|entry| MediaReference {
            id: entry.resource_id.video_id,
            playlist: Some(PlaylistContext {
                playlist_id: if entry.playlist_id.is_empty() {
                    playlist_id.to_string()
                } else {
                    entry.playlist_id
                },
                position: entry.position,
                size,
                title: title.to_string(),
            }),
        })
        .collect()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Page<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PlaylistSnippet {
    snippet: PlaylistFields,
}

#[derive(Debug, Deserialize)]
struct PlaylistFields {
    #[serde(default)]
    title: String,
}

#[derive(Debug, Deserialize)]
struct ItemSnippet {
    snippet: ItemFields,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemFields {
    #[serde(default)]
    playlist_id: String,
    #[serde(default)]
    position: i64,
    resource_id: ResourceId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResourceId {
    video_id: String,
}
