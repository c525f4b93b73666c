use crate::models::{
    LimitedLenString128, LimitedLenString2048, LimitedLenString512, Measurements, Properties,
};
use serde::{Deserialize, Serialize};

/// An instance of PageView represents a generic action on a page like a button click.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PageViewData {
    pub(crate) ver: i32,
    pub(crate) name: LimitedLenString512,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) url: Option<LimitedLenString2048>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) duration: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) id: Option<LimitedLenString128>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) properties: Option<Properties>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) measurements: Option<Measurements>,
}
