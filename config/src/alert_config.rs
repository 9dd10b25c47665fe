//! Per-agent alert definitions.
//!
//! Alerts are replaced whole rather than patched, so there is no overlay; the
//! version still identifies an alert for deletion and conflict checks.

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidateEmail, ValidationError};

use crate::versioned::Versioned;

/// Settings of one alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AlertConfigData {
    #[validate(length(min = 1))]
    pub transaction_type: String,

    #[validate(range(exclusive_min = 0.0, max = 100.0))]
    pub percentile: f64,

    #[validate(range(min = 1))]
    pub threshold_millis: u32,

    #[validate(range(min = 1))]
    pub time_period_minutes: u32,

    pub min_transaction_count: u32,

    #[validate(length(min = 1), custom(function = "validate_email_addresses"))]
    pub email_addresses: Vec<String>
}

fn validate_email_addresses(addresses: &[String]) -> Result<(), ValidationError> {
    if addresses.iter().all(|address| address.validate_email()) {
        Ok(())
    } else {
        Err(ValidationError::new("email"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "AlertConfigData")]
pub struct AlertConfig {
    #[serde(flatten)]
    data: AlertConfigData,

    #[serde(skip_serializing)]
    version: String
}

impl AlertConfig {
    pub fn new(data: AlertConfigData) -> Self {
        let version = utils::compute_version_hash(&(
            &data.transaction_type,
            data.percentile,
            data.threshold_millis,
            data.time_period_minutes,
            data.min_transaction_count,
            &data.email_addresses
        ));
        Self { data, version }
    }

    pub fn data(&self) -> &AlertConfigData {
        &self.data
    }
}

impl From<AlertConfigData> for AlertConfig {
    fn from(data: AlertConfigData) -> Self {
        Self::new(data)
    }
}

impl Versioned for AlertConfig {
    fn version(&self) -> &str {
        &self.version
    }
}
