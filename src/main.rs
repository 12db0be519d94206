use anyhow::Result;
use era5_download::{Client, DatasetRequest, run};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let client = Client::from_env()?;
    run(&client, &DatasetRequest::era5_single_levels_sample())
}
