use anyhow::{Context, Result};
use futures::StreamExt;
use image::ImageFormat;
use log::{debug, info};
use rand::Rng;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::time::sleep;

/// One image to fetch and where to put it.
#[derive(Debug)]
pub struct ImageJob {
    pub url: String,
    pub path: PathBuf,
}

/// Two-digit page file name, 1-indexed by discovery order.
pub fn page_file_name(page: usize) -> String {
    format!("{:02}.png", page)
}

/// Downloads images over plain HTTP with transient-error retries and
/// normalizes everything to RGBA png on disk.
pub struct ImageDownloader {
    client: ClientWithMiddleware,
    workers: usize,
}

impl ImageDownloader {
    pub fn new(workers: usize, max_retries: u32) -> Result<Self> {
        // Retry transient failures with increasing intervals between
        // attempts; permanent HTTP errors surface immediately.
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(max_retries);
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        let client = ClientBuilder::new(client)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();
        Ok(Self { client, workers })
    }

    /// Fetch `url` into `path`. Idempotent: an existing destination is
    /// skipped without touching the network. The body is written to a
    /// temporary path and only renamed into place after a successful
    /// decode, so an interrupted run never leaves a file that would be
    /// mistaken for a finished download.
    pub async fn download(&self, url: &str, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        if path.exists() {
            debug!("{} exists, skipping", path.display());
            return Ok(());
        }

        // Politeness jitter so a chapter's worth of pages does not
        // burst at the CDN all at once.
        let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..1000));
        sleep(jitter).await;

        info!("Downloading {} to {}", url, path.display());
        let tmp = path.with_extension("part");
        if let Err(e) = self.fetch_to(url, &tmp).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.context(format!("failed to download {}", url)));
        }
        fs::rename(&tmp, path).await?;
        Ok(())
    }

    async fn fetch_to(&self, url: &str, tmp: &Path) -> Result<()> {
        let response = self.client.get(url).send().await?.error_for_status()?;

        let mut file = fs::File::create(tmp).await?;
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            file.write_all(&chunk?).await?;
        }
        file.flush().await?;
        drop(file);

        // Normalize whatever the CDN served (webp, jpeg, ...) to RGBA
        // png. Decoding a full-size page is CPU-bound, so it runs off
        // the runtime threads.
        let tmp = tmp.to_path_buf();
        let url = url.to_string();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let decoded = image::open(&tmp)
                .with_context(|| format!("{} is not a decodable image", url))?;
            decoded.to_rgba8().save_with_format(&tmp, ImageFormat::Png)?;
            Ok(())
        })
        .await??;
        Ok(())
    }

    /// Run all jobs through a bounded pool of `workers` concurrent
    /// downloads and wait for every one before returning. Every job
    /// runs to completion even when a sibling fails, so no in-flight
    /// download gets cancelled with its temporary file still on disk;
    /// the first error is surfaced once the pool drains.
    pub async fn download_all(&self, jobs: Vec<ImageJob>) -> Result<()> {
        let results: Vec<Result<()>> = futures::stream::iter(jobs)
            .map(|job| async move { self.download(&job.url, &job.path).await })
            .buffer_unordered(self.workers)
            .collect()
            .await;
        results.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_file_names_are_zero_padded() {
        assert_eq!("01.png", page_file_name(1));
        assert_eq!("09.png", page_file_name(9));
        assert_eq!("10.png", page_file_name(10));
    }

    #[tokio::test]
    async fn existing_destination_skips_the_network() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cover.png");
        std::fs::write(&path, b"already here").unwrap();

        let downloader = ImageDownloader::new(4, 0).unwrap();
        // The URL points at a closed port; reaching the network at
        // all would fail the call.
        downloader
            .download("http://127.0.0.1:9/cover.png", &path)
            .await
            .unwrap();

        assert_eq!(b"already here".as_slice(), std::fs::read(&path).unwrap());
    }

    #[tokio::test]
    async fn failed_download_leaves_no_file_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Chapter 1").join("01.png");

        let downloader = ImageDownloader::new(4, 0).unwrap();
        let result = downloader.download("http://127.0.0.1:9/01.png", &path).await;

        assert!(result.is_err());
        assert!(!path.exists());
        assert!(!path.with_extension("part").exists());
    }

    #[tokio::test]
    async fn pool_drains_all_jobs_and_leaves_no_partial_files() {
        let dir = tempfile::tempdir().unwrap();
        let chapter_dir = dir.path().join("Chapter 1");
        let jobs = (1..=3)
            .map(|page| ImageJob {
                url: format!("http://127.0.0.1:9/{}", page_file_name(page)),
                path: chapter_dir.join(page_file_name(page)),
            })
            .collect();

        let downloader = ImageDownloader::new(4, 0).unwrap();
        let result = downloader.download_all(jobs).await;

        assert!(result.is_err());
        // Every failed job cleaned up after itself; nothing was
        // cancelled mid-write.
        let leftovers: Vec<_> = std::fs::read_dir(&chapter_dir)
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert!(leftovers.is_empty(), "stray files: {:?}", leftovers);
    }

    #[tokio::test]
    async fn no_jobs_is_a_no_op() {
        let downloader = ImageDownloader::new(4, 0).unwrap();
        downloader.download_all(Vec::new()).await.unwrap();
    }
}
