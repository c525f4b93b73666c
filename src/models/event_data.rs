use crate::models::{LimitedLenString512, Measurements, Properties};
use serde::{Deserialize, Serialize};

/// Instances of Event represent structured event records that can be grouped and searched by
/// their properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct EventData {
    pub(crate) ver: i32,
    pub(crate) name: LimitedLenString512,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) properties: Option<Properties>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) measurements: Option<Measurements>,
}
