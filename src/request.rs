use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Dataset queried by the sample download.
pub const ERA5_SINGLE_LEVELS: &str = "reanalysis-era5-single-levels";

/// The request body sent to the CDS for one dataset.
///
/// Field order matches what the CDS web form generates. `variable`, `day` and
/// `time` are always sequences, even with a single element.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RequestFields {
    pub product_type: String,
    pub format: String,
    pub variable: Vec<String>,
    pub year: String,
    pub month: String,
    pub day: Vec<String>,
    pub time: Vec<String>,
}

/// A dataset request plus where its result should be written.
///
/// Values are passed through as given; the remote service is the only place
/// where a bad variable name or date gets rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetRequest {
    dataset: String,
    fields: RequestFields,
    output: PathBuf,
}

impl DatasetRequest {
    pub fn new(dataset: impl Into<String>, output: impl Into<PathBuf>) -> Self {
        Self {
            dataset: dataset.into(),
            fields: RequestFields::default(),
            output: output.into(),
        }
    }

    /// ERA5 hourly sea surface temperature, surface pressure and total
    /// precipitation for 1994-09-01/02 at 00:00 and 01:00, as NetCDF.
    pub fn era5_single_levels_sample() -> Self {
        Self::new(ERA5_SINGLE_LEVELS, "download.nc")
            .product_type("reanalysis")
            .format("netcdf")
            .variables([
                "sea_surface_temperature",
                "surface_pressure",
                "total_precipitation",
            ])
            .year("1994")
            .month("09")
            .days(["01", "02"])
            .times(["00:00", "01:00"])
    }

    pub fn product_type(mut self, v: impl Into<String>) -> Self {
        self.fields.product_type = v.into();
        self
    }

    pub fn format(mut self, v: impl Into<String>) -> Self {
        self.fields.format = v.into();
        self
    }

    /// Appends one variable.
    pub fn variable(mut self, v: impl Into<String>) -> Self {
        self.fields.variable.push(v.into());
        self
    }

    /// Replaces the variable list.
    pub fn variables<I, S>(mut self, vs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields.variable = vs.into_iter().map(Into::into).collect();
        self
    }

    pub fn year(mut self, v: impl Into<String>) -> Self {
        self.fields.year = v.into();
        self
    }

    pub fn month(mut self, v: impl Into<String>) -> Self {
        self.fields.month = v.into();
        self
    }

    pub fn day(mut self, v: impl Into<String>) -> Self {
        self.fields.day.push(v.into());
        self
    }

    pub fn days<I, S>(mut self, vs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields.day = vs.into_iter().map(Into::into).collect();
        self
    }

    pub fn time(mut self, v: impl Into<String>) -> Self {
        self.fields.time.push(v.into());
        self
    }

    pub fn times<I, S>(mut self, vs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields.time = vs.into_iter().map(Into::into).collect();
        self
    }

    pub fn dataset_identifier(&self) -> &str {
        &self.dataset
    }

    pub fn output_path(&self) -> &Path {
        &self.output
    }

    pub fn fields(&self) -> &RequestFields {
        &self.fields
    }

    /// The request body as a JSON object.
    pub fn to_value(&self) -> serde_json::Result<Value> {
        serde_json::to_value(&self.fields)
    }
}
