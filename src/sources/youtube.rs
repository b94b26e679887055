use anyhow::{Context, Result};
use async_process::Command;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use super::{is_url, ResolvedTrack, SourceKind, StreamLocator, TrackMetadata, TrackRequest, TrackResolver};

/// Concurrent yt-dlp processes allowed at once.
const MAX_CONCURRENT_LOOKUPS: usize = 3;

/// Resolves page URLs and free-text searches through the `yt-dlp` binary.
pub struct YtDlpResolver {
    permits: Semaphore,
}

/// Subset of yt-dlp's `--dump-json` output that we use.
#[derive(Debug, Deserialize)]
struct YtDlpInfo {
    title: String,
    duration: Option<f64>,
    uploader: Option<String>,
    thumbnail: Option<String>,
    webpage_url: String,
    #[serde(default)]
    is_live: Option<bool>,
}

impl Default for YtDlpResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl YtDlpResolver {
    pub fn new() -> Self {
        Self {
            permits: Semaphore::new(MAX_CONCURRENT_LOOKUPS),
        }
    }

    /// Looks up a URL, or the best search match for free text.
    pub async fn lookup(&self, query: &str) -> Result<TrackMetadata> {
        let _permit = self.permits.acquire().await?;

        let target = if is_url(query) {
            debug!("📊 Fetching info for {}", query);
            query.to_string()
        } else {
            info!("🔍 Searching YouTube: {}", query);
            format!("ytsearch1:{}", query)
        };

        let output = Command::new("yt-dlp")
            .args([
                "--no-playlist",
                "--dump-json",
                "--skip-download",
                "--no-warnings",
                &target,
            ])
            .output()
            .await
            .context("failed to run yt-dlp")?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("yt-dlp error: {}", error.trim());
        }

        parse_first_result(&String::from_utf8_lossy(&output.stdout))
    }

    /// Returns the installed yt-dlp version, used by `--health-check`.
    pub async fn version() -> Result<String> {
        let output = Command::new("yt-dlp")
            .arg("--version")
            .output()
            .await
            .context("yt-dlp is not installed or not on PATH")?;

        if !output.status.success() {
            warn!(
                "⚠️ yt-dlp --version failed: {}",
                String::from_utf8_lossy(&output.stderr)
            );
            anyhow::bail!("yt-dlp exited with {}", output.status);
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// Takes the first JSON line of yt-dlp output. Searches print one line per
/// entry; a plain URL prints exactly one.
fn parse_first_result(stdout: &str) -> Result<TrackMetadata> {
    let line = stdout
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .context("no results found")?;

    let info: YtDlpInfo =
        serde_json::from_str(line).context("could not parse yt-dlp output")?;

    if info.is_live.unwrap_or(false) {
        debug!("🔴 {} is a live stream", info.title);
    }

    Ok(TrackMetadata {
        title: info.title,
        artist: info.uploader,
        duration: info
            .duration
            .filter(|secs| secs.is_finite() && *secs > 0.0)
            .map(Duration::from_secs_f64),
        thumbnail: info.thumbnail,
        url: info.webpage_url,
        source: SourceKind::YouTube,
    })
}

#[async_trait]
impl TrackResolver for YtDlpResolver {
    async fn resolve(&self, request: &TrackRequest) -> Result<ResolvedTrack> {
        let metadata = self.lookup(&request.query).await?;
        Ok(ResolvedTrack {
            stream: StreamLocator::YoutubeDl(metadata.url.clone()),
            metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parses_first_search_entry() {
        let stdout = r#"
{"title": "Lofi Beats", "duration": 183.0, "uploader": "Lofi Girl", "thumbnail": "https://i.ytimg.com/a.jpg", "webpage_url": "https://www.youtube.com/watch?v=abc"}
{"title": "Other", "duration": 10.0, "webpage_url": "https://www.youtube.com/watch?v=def"}
"#;
        let meta = parse_first_result(stdout).unwrap();

        assert_eq!(meta.title, "Lofi Beats");
        assert_eq!(meta.artist.as_deref(), Some("Lofi Girl"));
        assert_eq!(meta.duration, Some(Duration::from_secs(183)));
        assert_eq!(meta.url, "https://www.youtube.com/watch?v=abc");
    }

    #[test]
    fn test_live_streams_have_no_duration() {
        let stdout = r#"{"title": "Radio", "duration": null, "is_live": true, "webpage_url": "https://www.youtube.com/watch?v=live"}"#;
        let meta = parse_first_result(stdout).unwrap();
        assert_eq!(meta.duration, None);
    }

    #[test]
    fn test_empty_output_is_an_error() {
        let err = parse_first_result("\n").unwrap_err();
        assert_eq!(err.to_string(), "no results found");
    }
}
