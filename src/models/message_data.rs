use crate::models::{LimitedLenString32768, Measurements, Properties, SeverityLevel};
use serde::{Deserialize, Serialize};

/// Instances of Message represent printf-like trace statements that are text-searched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MessageData {
    pub(crate) ver: i32,
    pub(crate) message: LimitedLenString32768,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) severity_level: Option<SeverityLevel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) properties: Option<Properties>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) measurements: Option<Measurements>,
}
