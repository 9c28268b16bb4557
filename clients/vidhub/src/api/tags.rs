//! Video tags, used for search suggestions when tagging uploads.

use crate::api::client::ApiClient;
use crate::api::error::ApiError;
use crate::api::types::{PagedStream, Paginated};
use http::Method;
use serde::{Deserialize, Serialize};
use tokio_stream::Stream;
use tracing::instrument;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: String,
    pub name: String,
    pub slug: String,
    /// Number of videos carrying the tag, when the backend includes it.
    #[serde(default)]
    pub count: Option<u64>,
}

pub type TagListResponse = Paginated<Tag>;

impl ApiClient {
    /// Returns a paginated stream over all tags, optionally filtered by `search`.
    #[instrument(skip(self))]
    pub fn list_tags(
        &self,
        search: Option<&str>,
        page_size: u32,
    ) -> impl Stream<Item = Result<Tag, ApiError>> + use<'_> {
        let search = search.filter(|s| !s.is_empty()).map(str::to_string);
        PagedStream::new(move |page| {
            let search = search.clone();
            async move {
                let response = self
                    .list_tags_page(page, page_size, search.as_deref())
                    .await?;
                Ok(response.into_page())
            }
        })
    }

    #[instrument(skip(self), level = tracing::Level::DEBUG)]
    pub async fn list_tags_page(
        &self,
        page: u32,
        limit: u32,
        search: Option<&str>,
    ) -> Result<TagListResponse, ApiError> {
        let page = page.to_string();
        let limit = limit.to_string();
        let mut query_params = vec![("page", page.as_str()), ("limit", limit.as_str())];
        if let Some(search) = search {
            query_params.push(("search", search));
        }
        self.request_json(
            Method::GET,
            "/tags",
            Some(&query_params),
            None::<&()>,
            "tag list",
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::client::tests::build_client;
    use mockito::{Matcher, Server};
    use pretty_assertions::assert_eq;
    use tokio_stream::StreamExt;

    #[tokio::test]
    async fn search_is_forwarded() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/tags")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("page".into(), "1".into()),
                Matcher::UrlEncoded("limit".into(), "20".into()),
                Matcher::UrlEncoded("search".into(), "rust".into()),
            ]))
            .with_body(
                serde_json::json!({
                    "data": [
                        { "id": "1", "name": "Rust", "slug": "rust", "count": 4 },
                        { "id": "2", "name": "Rustacean", "slug": "rustacean" }
                    ],
                    "meta": { "total": 2, "page": 1, "limit": 20, "totalPages": 1 }
                })
                .to_string(),
            )
            .expect(1)
            .create_async()
            .await;

        let client = build_client(&server);
        let tags: Vec<Tag> = client
            .list_tags(Some("rust"), 20)
            .map(|t| t.unwrap())
            .collect()
            .await;

        mock.assert_async().await;
        assert_eq!(tags.len(), 2);
        assert_eq!(tags[0].count, Some(4));
        assert_eq!(tags[1].count, None);
    }
}
