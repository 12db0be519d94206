//! Response shapes of the CDS Retrieve API (OGC API - Processes).

use anyhow::{Result, anyhow, bail};

use crate::client::RemoteFile;
use crate::util::urljoin;

#[derive(Debug, serde::Deserialize)]
pub(crate) struct ProcessingLink {
    #[serde(default)]
    rel: Option<String>,
    href: String,
}

fn find_link(links: &[ProcessingLink], rel: &str) -> Option<String> {
    links
        .iter()
        .find(|l| l.rel.as_deref() == Some(rel))
        .map(|l| l.href.clone())
}

/// Reply to `POST /processes/{dataset}/execution`.
#[derive(Debug, serde::Deserialize)]
pub(crate) struct ProcessingJob {
    #[serde(default, alias = "jobID")]
    pub(crate) job_id: Option<String>,
    #[serde(default)]
    links: Vec<ProcessingLink>,
}

impl ProcessingJob {
    pub(crate) fn monitor_url(&self) -> Option<String> {
        find_link(&self.links, "monitor")
    }
}

#[derive(Debug, serde::Deserialize)]
pub(crate) struct ProcessingJobStatus {
    pub(crate) status: String,
    #[serde(default)]
    links: Vec<ProcessingLink>,
}

impl ProcessingJobStatus {
    pub(crate) fn results_url(&self) -> Option<String> {
        find_link(&self.links, "results")
    }

    /// The results URL once `successful`, `None` while `accepted`/`running`.
    pub(crate) fn outcome(&self, monitor_url: &str) -> Result<Option<String>> {
        match self.status.as_str() {
            "successful" => Ok(Some(self.results_url().unwrap_or_else(|| {
                format!("{}/results", monitor_url.trim_end_matches('/'))
            }))),
            "accepted" | "running" => Ok(None),
            "failed" | "rejected" | "dismissed" | "deleted" => {
                bail!("processing failed with status {}", self.status)
            }
            other => bail!("unknown processing status [{}]", other),
        }
    }
}

#[derive(Debug, serde::Deserialize)]
pub(crate) struct ProcessingResults {
    asset: ProcessingAsset,
}

#[derive(Debug, serde::Deserialize)]
struct ProcessingAsset {
    value: ProcessingAssetValue,
}

#[derive(Debug, serde::Deserialize)]
struct ProcessingAssetValue {
    href: String,
    #[serde(rename = "file:size")]
    file_size: u64,
    #[serde(rename = "type", default)]
    content_type: Option<String>,
}

impl ProcessingResults {
    pub(crate) fn to_remote_file(&self, results_url: &str) -> Result<RemoteFile> {
        let value = &self.asset.value;
        let href = value.href.trim();
        if href.is_empty() {
            return Err(anyhow!("missing results asset href"));
        }

        Ok(RemoteFile {
            location: urljoin(results_url, href),
            content_length: value.file_size,
            content_type: value.content_type.clone(),
        })
    }
}
