//! Well-known envelope context tag keys.
//!
//! Tags set on an item with one of these keys override the values the client fills in. Values are
//! truncated to the length the ingestion endpoint accepts for each key.

use crate::models::{sanitize::truncate_to, Sanitize};
use std::collections::BTreeMap;

/// Envelope context tags.
pub(crate) type Tags = BTreeMap<String, String>;

/// Application version. Information in the application context fields is always about the
/// application that is sending the telemetry.
pub const APPLICATION_VERSION: &str = "ai.application.ver";

/// Unique client device id. Computer name in most cases.
pub const DEVICE_ID: &str = "ai.device.id";

/// Device locale using <language>-<REGION> pattern, following RFC 5646. Example 'en-US'.
pub const DEVICE_LOCALE: &str = "ai.device.locale";

/// Model of the device the end user of the application is using.
pub const DEVICE_MODEL: &str = "ai.device.model";

/// Operating system name and version of the device. Example 'Windows 10 Pro 10.0.10586.0'
pub const DEVICE_OS_VERSION: &str = "ai.device.osVersion";

/// The type of the device. Examples: 'PC', 'Phone', 'Browser'. 'PC' is the default value.
pub const DEVICE_TYPE: &str = "ai.device.type";

/// The IP address of the client device. IPv4 and IPv6 are supported.
pub const LOCATION_IP: &str = "ai.location.ip";

/// A unique identifier for the operation instance. All telemetry of one logical operation shares
/// it. This is the 32-hex trace id when the item is correlated.
pub const OPERATION_ID: &str = "ai.operation.id";

/// The name (group) of the operation, e.g. 'GET Home/Index'.
pub const OPERATION_NAME: &str = "ai.operation.name";

/// The unique identifier of the telemetry item's immediate parent.
pub const OPERATION_PARENT_ID: &str = "ai.operation.parentId";

/// Name of synthetic source. Some telemetry from the application may represent a synthetic
/// traffic, like web crawlers or availability tests.
pub const OPERATION_SYNTHETIC_SOURCE: &str = "ai.operation.syntheticSource";

/// Session ID, the instance of the user's interaction with the app.
pub const SESSION_ID: &str = "ai.session.id";

/// In multi-tenant applications this is the account ID or name which the user is acting with.
pub const USER_ACCOUNT_ID: &str = "ai.user.accountId";

/// Anonymous user id. Represents the end user of the application.
pub const USER_ID: &str = "ai.user.id";

/// Authenticated user id.
pub const USER_AUTH_USER_ID: &str = "ai.user.authUserId";

/// Name of the role the application is a part of. Maps directly to the role name in azure.
pub const CLOUD_ROLE: &str = "ai.cloud.role";

/// Name of the instance where the application is running. Computer name for on-premisis, instance
/// name for Azure.
pub const CLOUD_ROLE_INSTANCE: &str = "ai.cloud.roleInstance";

/// SDK version, `<sdk name>:<version>`.
pub const INTERNAL_SDK_VERSION: &str = "ai.internal.sdkVersion";

/// This is the node name used for billing purposes.
pub const INTERNAL_NODE_NAME: &str = "ai.internal.nodeName";

pub(crate) fn max_len(key: &str) -> usize {
    match key {
        APPLICATION_VERSION => 1024,
        DEVICE_ID => 1024,
        DEVICE_LOCALE => 64,
        DEVICE_MODEL => 256,
        DEVICE_OS_VERSION => 256,
        DEVICE_TYPE => 64,
        LOCATION_IP => 46,
        OPERATION_ID => 128,
        OPERATION_NAME => 1024,
        OPERATION_PARENT_ID => 128,
        OPERATION_SYNTHETIC_SOURCE => 1024,
        SESSION_ID => 64,
        USER_ACCOUNT_ID => 1024,
        USER_ID => 128,
        USER_AUTH_USER_ID => 1024,
        CLOUD_ROLE => 256,
        CLOUD_ROLE_INSTANCE => 256,
        INTERNAL_SDK_VERSION => 64,
        INTERNAL_NODE_NAME => 256,
        _ => 1024,
    }
}

impl Sanitize for Tags {
    fn sanitize(&mut self) {
        for (key, value) in self.iter_mut() {
            truncate_to(value, max_len(key));
        }
    }
}
