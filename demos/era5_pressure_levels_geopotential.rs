use anyhow::Result;
use era5_download::Client;
use serde_json::json;
use std::path::Path;

fn main() -> Result<()> {
    env_logger::init();

    // Any serializable body works with the client directly, including
    // keywords that `DatasetRequest` does not model such as `pressure_level`.
    let client = Client::from_env()?;

    let dataset = "reanalysis-era5-pressure-levels";
    let request = json!({
        "product_type": ["reanalysis"],
        "variable": ["geopotential"],
        "year": ["2024"],
        "month": ["03"],
        "day": ["01"],
        "time": ["13:00"],
        "pressure_level": ["1000"],
        "data_format": "grib"
    });

    let file = client.retrieve(dataset, &request, Some(Path::new("download.grib")))?;
    log::info!("{} bytes from {}", file.content_length, file.location);
    Ok(())
}
