pub mod context_tag_keys;
mod availability_data;
mod data;
mod data_point;
mod envelope;
mod event_data;
mod exception_data;
mod exception_details;
mod message_data;
mod metric_data;
mod page_view_data;
mod remote_dependency_data;
mod request_data;
mod sanitize;
mod severity_level;

pub(crate) use availability_data::*;
pub(crate) use context_tag_keys::Tags;
pub(crate) use data::*;
pub(crate) use data_point::*;
pub use envelope::Envelope;
pub(crate) use event_data::*;
pub(crate) use exception_data::*;
pub(crate) use exception_details::*;
pub(crate) use message_data::*;
pub(crate) use metric_data::*;
pub(crate) use page_view_data::*;
pub(crate) use remote_dependency_data::*;
pub(crate) use request_data::*;
pub(crate) use sanitize::*;
pub use severity_level::SeverityLevel;

use std::collections::BTreeMap;

pub(crate) type Properties = BTreeMap<LimitedLenString150, LimitedLenString8192>;
pub(crate) type Measurements = BTreeMap<LimitedLenString150, f64>;
