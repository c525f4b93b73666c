use crate::models::{
    LimitedLenString1024, LimitedLenString128, LimitedLenString8192, Measurements, Properties,
};
use serde::{Deserialize, Serialize};

/// An instance of Remote Dependency represents an interaction of the monitored component with a
/// remote component/service like SQL or an HTTP endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RemoteDependencyData {
    pub(crate) ver: i32,
    pub(crate) name: LimitedLenString1024,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) id: Option<LimitedLenString128>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) result_code: Option<LimitedLenString1024>,
    pub(crate) duration: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) success: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) data: Option<LimitedLenString8192>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) target: Option<LimitedLenString1024>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub(crate) type_: Option<LimitedLenString1024>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) properties: Option<Properties>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) measurements: Option<Measurements>,
}
