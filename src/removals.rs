//! Upstream removal feed (`removals.822`).

use crate::{Error, Result};
use apt_repository::IndexReader;
use serde::Serialize;
use tracing::{debug, info, warn};
use url::Url;

/// One source package removed upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemovalNotice {
    pub suite: String,
    pub package_name: String,
    pub version: String,
    pub reason: String,
}

/// Split a `name_version` identifier at its last underscore.
fn split_source_id(id: &str) -> Option<(&str, &str)> {
    match id.rsplit_once('_') {
        Some((name, version)) if !name.is_empty() && !version.is_empty() => {
            let name = name.split('_').next().unwrap_or(name);
            Some((name, version))
        }
        _ => None,
    }
}

/// Parse the removal feed. Records without a suite or without sources are
/// skipped, as are source identifiers without a version.
pub fn parse_removals(text: &str) -> Vec<RemovalNotice> {
    let mut reader = IndexReader::from_reader(std::io::Cursor::new(text.as_bytes().to_vec()));
    let mut notices = Vec::new();

    for paragraph in reader.paragraphs() {
        let suite = paragraph.get("Suite").unwrap_or_default().trim();
        let sources = paragraph.get("Sources").unwrap_or_default();
        if suite.is_empty() || sources.trim().is_empty() {
            continue;
        }
        let reason = paragraph.get("Reason").unwrap_or_default().trim();

        for id in sources.split_whitespace() {
            match split_source_id(id) {
                Some((name, version)) => notices.push(RemovalNotice {
                    suite: suite.to_string(),
                    package_name: name.to_string(),
                    version: version.to_string(),
                    reason: reason.to_string(),
                }),
                None => debug!("Ignoring source identifier without version: {}", id),
            }
        }
    }

    if reader.skipped() > 0 {
        warn!("Skipped {} malformed removal records", reader.skipped());
    }
    notices
}

/// Load the feed from an HTTP(S) URL, a `file://` URL or a local path.
pub async fn fetch_removals(client: &reqwest::Client, location: &str) -> Result<Vec<RemovalNotice>> {
    let text = match Url::parse(location) {
        Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {
            info!("Fetching removal feed from {}", url);
            client
                .get(url)
                .send()
                .await?
                .error_for_status()?
                .text()
                .await?
        }
        Ok(url) if url.scheme() == "file" => {
            let path = url
                .to_file_path()
                .map_err(|_| Error::config(format!("Invalid file URL: {}", location)))?;
            tokio::fs::read_to_string(path).await?
        }
        _ => tokio::fs::read_to_string(location).await?,
    };

    let notices = parse_removals(&text);
    debug!("Removal feed lists {} source removals", notices.len());
    Ok(notices)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = "Date: Mon, 01 Jan 2024 10:00:00 +0000
Ftpmaster: Someone
Suite: unstable
Sources:
 foo_1.2-1
 libbar_2:3.0-1
Reason: RoQA; orphaned, dead upstream

Date: Mon, 01 Jan 2024 11:00:00 +0000
Sources:
 nosuite_1.0-1
Reason: missing suite

Date: Mon, 01 Jan 2024 12:00:00 +0000
Suite: experimental
Binaries:
 only-binaries_1.0-1 [amd64]
Reason: ROM; binaries only

Suite: unstable
Sources:
 noversion
 baz_0.9
Reason: RoM; request of maintainer
";

    #[test]
    fn test_parse_removals() {
        let notices = parse_removals(FEED);
        assert_eq!(
            notices,
            vec![
                RemovalNotice {
                    suite: "unstable".to_string(),
                    package_name: "foo".to_string(),
                    version: "1.2-1".to_string(),
                    reason: "RoQA; orphaned, dead upstream".to_string(),
                },
                RemovalNotice {
                    suite: "unstable".to_string(),
                    package_name: "libbar".to_string(),
                    version: "2:3.0-1".to_string(),
                    reason: "RoQA; orphaned, dead upstream".to_string(),
                },
                RemovalNotice {
                    suite: "unstable".to_string(),
                    package_name: "baz".to_string(),
                    version: "0.9".to_string(),
                    reason: "RoM; request of maintainer".to_string(),
                },
            ]
        );
    }

    #[test]
    fn test_split_source_id() {
        assert_eq!(split_source_id("foo_1.0"), Some(("foo", "1.0")));
        assert_eq!(split_source_id("foo"), None);
        assert_eq!(split_source_id("foo_"), None);
    }

    #[tokio::test]
    async fn test_fetch_from_path_and_file_url() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("removals.822");
        std::fs::write(&path, FEED).unwrap();
        let client = reqwest::Client::new();

        let from_path = fetch_removals(&client, path.to_str().unwrap()).await.unwrap();
        assert_eq!(from_path.len(), 3);

        let url = Url::from_file_path(&path).unwrap();
        let from_url = fetch_removals(&client, url.as_str()).await.unwrap();
        assert_eq!(from_path, from_url);
    }

    #[tokio::test]
    async fn test_fetch_missing_file() {
        let client = reqwest::Client::new();
        let err = fetch_removals(&client, "/nonexistent/removals.822")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
