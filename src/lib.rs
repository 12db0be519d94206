//! Downloads ERA5 reanalysis fields from the Copernicus Climate Data Store (CDS).
//!
//! A [`DatasetRequest`] describes what to fetch and where to write it; [`run`]
//! hands it once to anything implementing [`Retrieve`]. [`Client`] is the CDS
//! implementation: it submits the request, polls until the job is done, then
//! downloads the result file.
//!
//! ## Quick start
//! - Configure authentication via environment variables (`CDSAPI_URL`, `CDSAPI_KEY`) or a
//!   `.cdsapirc` file (current directory or home directory, or the path in `CDSAPI_RC`).
//! - Build a request and call [`run`].
//!
//! ```no_run
//! use anyhow::Result;
//! use era5_download::{Client, DatasetRequest, run};
//!
//! fn main() -> Result<()> {
//!     let client = Client::from_env()?;
//!     let request = DatasetRequest::new("reanalysis-era5-single-levels", "t2m.nc")
//!         .product_type("reanalysis")
//!         .format("netcdf")
//!         .variable("2m_temperature")
//!         .year("2020")
//!         .month("01")
//!         .days(["01", "02"])
//!         .time("12:00");
//!     run(&client, &request)
//! }
//! ```

#![forbid(unsafe_code)]

mod client;
mod config;
mod download;
mod error;
mod invoke;
mod legacy;
mod processing;
mod request;
#[cfg(test)]
mod testing;
mod util;

pub use client::{Client, ClientConfig, RemoteFile};
pub use invoke::{Retrieve, run};
pub use request::{DatasetRequest, ERA5_SINGLE_LEVELS, RequestFields};
