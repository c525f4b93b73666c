use crate::models::{
    LimitedLenString1024, LimitedLenString128, LimitedLenString2048, Measurements, Properties,
};
use serde::{Deserialize, Serialize};

/// An instance of Request represents completion of an external request to the application to do
/// work and contains a summary of that request execution and the results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RequestData {
    pub(crate) ver: i32,
    pub(crate) id: LimitedLenString128,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) source: Option<LimitedLenString1024>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) name: Option<LimitedLenString1024>,
    pub(crate) duration: String,
    pub(crate) response_code: LimitedLenString1024,
    pub(crate) success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) url: Option<LimitedLenString2048>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) properties: Option<Properties>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) measurements: Option<Measurements>,
}
