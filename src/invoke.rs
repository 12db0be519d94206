use anyhow::Result;
use std::path::Path;

use crate::request::{DatasetRequest, RequestFields};

/// Something that can fetch a dataset request into a local file.
///
/// Equivalent to Python: `client.retrieve(dataset, request, target)`.
pub trait Retrieve {
    fn retrieve(&self, dataset: &str, request: &RequestFields, target: &Path) -> Result<()>;
}

/// Hands `request` to `client` once and returns whatever it returned.
pub fn run<C: Retrieve + ?Sized>(client: &C, request: &DatasetRequest) -> Result<()> {
    log::info!(
        "retrieving {} into {}",
        request.dataset_identifier(),
        request.output_path().display()
    );
    client.retrieve(
        request.dataset_identifier(),
        request.fields(),
        request.output_path(),
    )
}
