use std::path::PathBuf;

use serde::Deserialize;
use url::Url;

use crate::error::FetchError;
use crate::model::RewardOffer;

#[derive(Debug, Deserialize)]
struct CatalogDocument {
    #[serde(default)]
    rewards: Option<Vec<RewardOffer>>,
}

/// Where a catalog reference points after resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogSource {
    Remote(Url),
    File(PathBuf),
}

impl CatalogSource {
    /// Absolute `http(s)` and `file` URLs are taken as-is. Relative
    /// references are joined onto `base`; without a base they name a file
    /// under the current directory, a leading `/` standing for its root.
    pub fn resolve(reference: &str, base: Option<&Url>) -> Result<Self, FetchError> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(FetchError::InvalidSource(reference.to_string()));
        }
        match Url::parse(reference) {
            Ok(url) => match url.scheme() {
                "http" | "https" => Ok(Self::Remote(url)),
                "file" => url
                    .to_file_path()
                    .map(Self::File)
                    .map_err(|_| FetchError::InvalidSource(reference.to_string())),
                _ => Err(FetchError::InvalidSource(reference.to_string())),
            },
            Err(url::ParseError::RelativeUrlWithoutBase) => match base {
                Some(base) => base
                    .join(reference)
                    .map(Self::Remote)
                    .map_err(|_| FetchError::InvalidSource(reference.to_string())),
                None => Ok(Self::File(PathBuf::from(reference.trim_start_matches('/')))),
            },
            Err(_) => Err(FetchError::InvalidSource(reference.to_string())),
        }
    }

    pub fn location(&self) -> String {
        match self {
            Self::Remote(url) => url.to_string(),
            Self::File(path) => path.display().to_string(),
        }
    }
}

/// Reads the reward catalog. Every call is a full re-read.
#[derive(Debug, Clone)]
pub struct CatalogFetcher {
    client: reqwest::Client,
    base_url: Option<Url>,
}

impl CatalogFetcher {
    pub fn new(client: reqwest::Client, base_url: Option<Url>) -> Self {
        Self { client, base_url }
    }

    pub fn resolve(&self, reference: &str) -> Result<CatalogSource, FetchError> {
        CatalogSource::resolve(reference, self.base_url.as_ref())
    }

    pub async fn fetch(&self, reference: &str) -> Result<Vec<RewardOffer>, FetchError> {
        match self.resolve(reference)? {
            CatalogSource::Remote(url) => self.fetch_remote(url).await,
            CatalogSource::File(path) => fetch_file(path).await,
        }
    }

    async fn fetch_remote(&self, url: Url) -> Result<Vec<RewardOffer>, FetchError> {
        let location = url.to_string();
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Transport {
                location: location.clone(),
                message: e.to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                status_text: status.canonical_reason().unwrap_or_default().to_string(),
            });
        }

        let body = resp.bytes().await.map_err(|e| FetchError::Transport {
            location,
            message: e.to_string(),
        })?;
        parse_catalog(&body)
    }
}

async fn fetch_file(path: PathBuf) -> Result<Vec<RewardOffer>, FetchError> {
    let body = tokio::fs::read(&path).await.map_err(|e| FetchError::Io {
        location: path.display().to_string(),
        message: e.to_string(),
    })?;
    parse_catalog(&body)
}

/// A document without `rewards` is an empty catalog.
pub fn parse_catalog(body: &[u8]) -> Result<Vec<RewardOffer>, FetchError> {
    let doc: CatalogDocument =
        serde_json::from_slice(body).map_err(|e| FetchError::Decode(e.to_string()))?;
    Ok(doc.rewards.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn catalog_body() -> serde_json::Value {
        json!({
            "rewards": [
                {
                    "id": "r1",
                    "title": "Studio tour",
                    "description": "Backstage visit",
                    "type": "experience",
                    "value": "1 ticket",
                    "requirements": {"contractAddress": "0xf8d6e0586b0a20c7"}
                },
                {
                    "id": "r2",
                    "title": "Artbook",
                    "description": "Signed copy",
                    "type": "physical_item",
                    "value": "1 book",
                    "requirements": {"contractAddress": "0xf8d6e0586b0a20c7", "minBalance": 3}
                }
            ]
        })
    }

    #[test]
    fn relative_reference_joins_base() {
        let base = Url::parse("https://app.example/shop/").unwrap();
        let source = CatalogSource::resolve("/rewards.json", Some(&base)).unwrap();
        assert_eq!(
            source,
            CatalogSource::Remote(Url::parse("https://app.example/rewards.json").unwrap())
        );
    }

    #[test]
    fn relative_reference_without_base_is_a_local_file() {
        let source = CatalogSource::resolve("/rewards.json", None).unwrap();
        assert_eq!(source, CatalogSource::File(PathBuf::from("rewards.json")));
    }

    #[test]
    fn unsupported_scheme_is_rejected() {
        let err = CatalogSource::resolve("ftp://host/rewards.json", None).unwrap_err();
        assert!(matches!(err, FetchError::InvalidSource(_)));
        assert!(CatalogSource::resolve("   ", None).is_err());
    }

    #[test]
    fn missing_rewards_field_is_empty() {
        assert!(parse_catalog(br#"{"version": 2}"#).unwrap().is_empty());
        assert!(parse_catalog(br#"{"rewards": null}"#).unwrap().is_empty());
        assert!(matches!(
            parse_catalog(b"<html>").unwrap_err(),
            FetchError::Decode(_)
        ));
    }

    #[tokio::test]
    async fn fetches_remote_catalog() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rewards.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(catalog_body()))
            .expect(2)
            .mount(&server)
            .await;

        let base = Url::parse(&server.uri()).unwrap();
        let fetcher = CatalogFetcher::new(reqwest::Client::new(), Some(base));
        let offers = fetcher.fetch("/rewards.json").await.unwrap();
        assert_eq!(offers.len(), 2);
        assert_eq!(offers[1].requirements.min_balance, Some(3));

        // no caching: a second call reads again
        fetcher.fetch("/rewards.json").await.unwrap();
    }

    #[tokio::test]
    async fn error_status_is_fetch_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rewards.json"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = CatalogFetcher::new(reqwest::Client::new(), None);
        let err = fetcher
            .fetch(&format!("{}/rewards.json", server.uri()))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "failed to fetch rewards: Not Found");
        match err {
            FetchError::Status {
                status,
                status_text,
            } => {
                assert_eq!(status, 404);
                assert_eq!(status_text, "Not Found");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn reads_catalog_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("rewards.json");
        std::fs::write(&file, catalog_body().to_string()).unwrap();

        let fetcher = CatalogFetcher::new(reqwest::Client::new(), None);
        let reference = Url::from_file_path(&file).unwrap().to_string();
        let offers = fetcher.fetch(&reference).await.unwrap();
        assert_eq!(offers[0].id, "r1");

        let err = fetcher
            .fetch(&Url::from_file_path(dir.path().join("missing.json")).unwrap().to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Io { .. }));
    }
}
