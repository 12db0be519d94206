//! Replies of the legacy `/resources` + `/tasks` API used with `<UID>:<APIKEY>` keys.

use anyhow::{Result, bail};
use serde_json::Value;

use crate::client::RemoteFile;
use crate::util::urljoin;

#[derive(Debug, serde::Deserialize)]
pub(crate) struct ApiReply {
    pub(crate) state: String,
    #[serde(default)]
    pub(crate) request_id: Option<String>,

    #[serde(default)]
    pub(crate) location: Option<String>,
    #[serde(default, alias = "contentLength")]
    pub(crate) content_length: Option<u64>,
    #[serde(default, alias = "contentType")]
    pub(crate) content_type: Option<String>,

    #[serde(default)]
    pub(crate) result: Option<Value>,

    #[serde(default)]
    pub(crate) error: Option<ReplyError>,
}

#[derive(Debug, serde::Deserialize)]
pub(crate) struct ReplyError {
    #[serde(default)]
    pub(crate) message: Option<String>,
    #[serde(default)]
    pub(crate) reason: Option<String>,
}

impl ApiReply {
    /// The download once `completed`, `None` while `queued`/`running`.
    pub(crate) fn outcome(&self, base_url: &str) -> Result<Option<RemoteFile>> {
        match self.state.as_str() {
            "completed" => remote_file_from_reply(self, base_url).map(Some),
            "queued" | "running" => {
                if self.request_id.is_none() {
                    bail!("missing request_id while state={}", self.state);
                }
                Ok(None)
            }
            "failed" => bail!("{}", self.failure_message()),
            other => bail!("unknown API state [{}]", other),
        }
    }

    /// `"<message>. <reason>"` for a failed request.
    pub(crate) fn failure_message(&self) -> String {
        let msg = self
            .error
            .as_ref()
            .and_then(|e| e.message.as_deref())
            .unwrap_or("request failed");
        match self.error.as_ref().and_then(|e| e.reason.as_deref()) {
            Some(reason) if !reason.is_empty() => format!("{}. {}", msg, reason),
            _ => msg.to_string(),
        }
    }
}

#[derive(Debug, serde::Deserialize)]
struct ApiResultLocation {
    location: String,
    #[serde(alias = "contentLength")]
    content_length: u64,
    #[serde(default, alias = "contentType")]
    content_type: Option<String>,
}

pub(crate) fn remote_file_from_reply(reply: &ApiReply, base_url: &str) -> Result<RemoteFile> {
    // {"result": {"location": ..., "contentLength": ...}}
    if let Some(result) = &reply.result {
        if let Ok(r) = serde_json::from_value::<ApiResultLocation>(result.clone()) {
            return Ok(RemoteFile {
                location: urljoin(base_url, &r.location),
                content_length: r.content_length,
                content_type: r.content_type,
            });
        }
    }

    // or location/contentLength at the top level
    if let (Some(location), Some(content_length)) = (&reply.location, reply.content_length) {
        return Ok(RemoteFile {
            location: urljoin(base_url, location),
            content_length,
            content_type: reply.content_type.clone(),
        });
    }

    bail!("missing download info in API reply")
}
