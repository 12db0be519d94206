use reqwest::StatusCode;
use thiserror::Error;

/// A non-2xx API response. The status survives `anyhow` via `downcast_ref`.
#[derive(Debug, Error)]
#[error("{message}")]
pub(crate) struct ApiError {
    pub(crate) status: StatusCode,
    message: String,
}

impl ApiError {
    /// Uses the CDS problem details when `text` parses as one.
    pub(crate) fn from_body(status: StatusCode, url: &str, text: &str) -> Self {
        let message = match serde_json::from_str::<CdsErrorResponse>(text) {
            Ok(body) => format_cds_error(status, url, &body),
            Err(_) => format!("API request failed: HTTP {} for url ({})\n{}", status, url, text),
        };
        Self { status, message }
    }

    pub(crate) fn status_of(err: &anyhow::Error) -> Option<StatusCode> {
        err.downcast_ref::<ApiError>().map(|e| e.status)
    }
}

/// Problem-details body returned by CDS on non-2xx responses.
#[derive(Debug, serde::Deserialize)]
pub(crate) struct CdsErrorResponse {
    #[serde(default, rename = "type")]
    pub(crate) kind: Option<String>,
    #[serde(default)]
    pub(crate) title: Option<String>,
    #[serde(default)]
    pub(crate) status: Option<u16>,
    #[serde(default)]
    pub(crate) detail: Option<String>,
    #[serde(default)]
    pub(crate) instance: Option<String>,
    #[serde(default)]
    pub(crate) trace_id: Option<String>,
    // older endpoints: {"message": ..., "detail": ...}
    #[serde(default)]
    pub(crate) message: Option<String>,
}

const HOW_TO_API: &str = "https://cds.climate.copernicus.eu/how-to-api";

impl CdsErrorResponse {
    fn title(&self) -> &str {
        self.title
            .as_deref()
            .or(self.message.as_deref())
            .unwrap_or("")
    }

    fn detail(&self) -> &str {
        self.detail.as_deref().unwrap_or("")
    }

    fn trace(&self) -> &str {
        match self.trace_id.as_deref() {
            Some(t) if !t.is_empty() => t,
            _ => "(none)",
        }
    }

    fn is_licence_error(&self, status: StatusCode) -> bool {
        let title = self.title().to_lowercase();
        let detail = self.detail().to_lowercase();
        status == StatusCode::FORBIDDEN
            && (title.contains("required licences")
                || detail.contains("required licence")
                || detail.contains("manage-licences"))
    }

    /// First URL mentioned in `detail`, usually the dataset licence page.
    fn licence_link(&self) -> &str {
        let detail = self.detail();
        detail
            .find("https://")
            .and_then(|idx| detail[idx..].split_whitespace().next())
            .unwrap_or(HOW_TO_API)
    }
}

pub(crate) fn format_cds_error(
    status: StatusCode,
    url: &str,
    e: &CdsErrorResponse,
) -> String {
    let title = e.title();
    let detail = e.detail();
    let status_in_body = e.status.unwrap_or(status.as_u16());

    if e.is_licence_error(status) {
        return format!(
            "CDS returned 403: required dataset licence(s) have not been accepted.\n\nHow to fix:\n1) Open and sign in: {}\n2) Accept the required licence(s) at the bottom of the dataset page (Manage licences)\n3) Run era5-download again\n\nServer message: {}\ntrace_id: {}",
            e.licence_link(),
            title,
            e.trace()
        );
    }

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return format!(
            "CDS authentication/authorization failed (HTTP {}).\n- Check that the key in .cdsapirc or CDSAPI_KEY is a valid Personal Access Token (usually WITHOUT the old '<UID>:' prefix)\n- Ensure the token is not expired\n\nServer message: {}\n{}\nkind: {}\ninstance: {}\ntrace_id: {}\nrequest: {}",
            status_in_body,
            title,
            detail,
            e.kind.as_deref().unwrap_or(""),
            e.instance.as_deref().unwrap_or(""),
            e.trace(),
            url
        );
    }

    if status == StatusCode::NOT_FOUND {
        return format!(
            "CDS API endpoint not found (HTTP 404).\n- The dataset name or the configured base URL is likely wrong\n- Recommended url: https://cds.climate.copernicus.eu/api\n\nServer message: {}\n{}\nrequest: {}",
            title,
            detail,
            url
        );
    }

    format!(
        "API request failed: HTTP {} for url ({})\n{}\n{}",
        status_in_body,
        url,
        title,
        detail
    )
}
