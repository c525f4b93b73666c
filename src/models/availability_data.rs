use crate::models::{
    LimitedLenString1024, LimitedLenString64, LimitedLenString8192, Measurements, Properties,
};
use serde::{Deserialize, Serialize};

/// Instances of AvailabilityData represent the result of executing an availability test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AvailabilityData {
    pub(crate) ver: i32,
    pub(crate) id: LimitedLenString64,
    pub(crate) name: LimitedLenString1024,
    pub(crate) duration: String,
    pub(crate) success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) run_location: Option<LimitedLenString1024>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) message: Option<LimitedLenString8192>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) properties: Option<Properties>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) measurements: Option<Measurements>,
}
