use anyhow::{Context, Result, bail};
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, HeaderValue, RANGE};
use std::fs::OpenOptions;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::thread;

use crate::client::{Client, RemoteFile};
use crate::util::guess_filename_from_url;

impl Client {
    /// Downloads `file` to `target`, resuming a partial file if one exists.
    ///
    /// An empty `target` is replaced by the last path segment of the URL.
    pub fn download(&self, file: &RemoteFile, target: &Path) -> Result<PathBuf> {
        let target = resolve_target(file, target);

        if let Some(parent) = target.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create directory {}", parent.display()))?;
            }
        }

        let mut downloaded = existing_len(&target)?;
        let mut range_from = resume_offset(downloaded, file.content_length);
        if range_from.is_none() {
            downloaded = 0;
        }

        log::info!(
            "Downloading {} ({} bytes) to {}",
            file.location,
            file.content_length,
            target.display()
        );
        let pb = self.progress_bar(file.content_length, downloaded)?;

        let mut tries = 0usize;
        'download_attempt: while tries < self.retry_max {
            let mut headers = HeaderMap::new();
            if let Some(from) = range_from {
                headers.insert(RANGE, HeaderValue::from_str(&format!("bytes={}-", from))?);
            }

            let resp = self.robust_request(|| {
                let req = self.http.get(&file.location).headers(headers.clone());
                self.apply_auth(req).send()
            })?;

            let mut resp = resp.error_for_status().context("download request failed")?;

            // Only a 206 continues the existing bytes; anything else is the whole file again.
            let append = range_from.is_some() && resp.status() == StatusCode::PARTIAL_CONTENT;
            if range_from.is_some() && !append {
                log::warn!(
                    "server answered {} to a range request, restarting from byte 0",
                    resp.status()
                );
            }
            if !append {
                downloaded = 0;
                if let Some(pb) = &pb {
                    pb.set_position(0);
                }
            }

            let mut out = OpenOptions::new()
                .create(true)
                .write(true)
                .append(append)
                .truncate(!append)
                .open(&target)
                .with_context(|| format!("failed to open {}", target.display()))?;

            let mut buf = [0u8; 64 * 1024];
            loop {
                let n = match resp.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(e) => {
                        tries += 1;
                        if tries >= self.retry_max {
                            return Err(e).context("download interrupted");
                        }
                        log::warn!("download interrupted ({}), resuming", e);

                        out.flush().ok();
                        downloaded = existing_len(&target)?;
                        range_from = Some(downloaded);
                        if let Some(pb) = &pb {
                            pb.set_position(downloaded);
                        }
                        thread::sleep(self.sleep_max);
                        continue 'download_attempt;
                    }
                };

                out.write_all(&buf[..n])?;
                downloaded += n as u64;
                if let Some(pb) = &pb {
                    pb.inc(n as u64);
                }
            }

            out.flush()?;

            if downloaded > file.content_length {
                bail!(
                    "download of {} produced {} byte(s), expected {}",
                    file.location,
                    downloaded,
                    file.content_length
                );
            }
            if downloaded == file.content_length {
                if let Some(pb) = &pb {
                    pb.finish_and_clear();
                }
                log::info!("Download complete: {}", target.display());
                return Ok(target);
            }

            tries += 1;
            log::warn!(
                "short download: {} of {} bytes, resuming",
                downloaded,
                file.content_length
            );
            range_from = Some(downloaded);
            if let Some(pb) = &pb {
                pb.set_position(downloaded);
            }
            thread::sleep(self.sleep_max);
        }

        bail!(
            "download failed: downloaded {} byte(s) out of {}",
            downloaded,
            file.content_length
        )
    }

    fn progress_bar(&self, total: u64, position: u64) -> Result<Option<ProgressBar>> {
        if !self.progress {
            return Ok(None);
        }
        let pb = ProgressBar::new(total);
        pb.set_style(
            ProgressStyle::with_template(
                "{spinner:.green} {bytes}/{total_bytes} ({bytes_per_sec}) {wide_bar} {eta}",
            )?
            .progress_chars("=>-"),
        );
        pb.set_position(position);
        Ok(Some(pb))
    }
}

fn resolve_target(file: &RemoteFile, target: &Path) -> PathBuf {
    if target.as_os_str().is_empty() {
        guess_filename_from_url(&file.location)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("download"))
    } else {
        target.to_path_buf()
    }
}

fn existing_len(path: &Path) -> Result<u64> {
    if !path.exists() {
        return Ok(0);
    }
    Ok(std::fs::metadata(path)
        .with_context(|| format!("failed to stat {}", path.display()))?
        .len())
}

/// Byte offset to resume from, or `None` to start over.
fn resume_offset(existing: u64, expected: u64) -> Option<u64> {
    if existing > 0 && existing < expected {
        Some(existing)
    } else {
        None
    }
}
