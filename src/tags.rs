use crate::{
    config::TelemetryConfig,
    models::{context_tag_keys as tags, Tags},
};
use once_cell::sync::Lazy;
use sysinfo::System;

/// Host facts, read once per process.
#[derive(Debug)]
struct ProcessContext {
    host_name: Option<String>,
    os_version: Option<String>,
}

static PROCESS_CONTEXT: Lazy<ProcessContext> = Lazy::new(|| ProcessContext {
    host_name: System::host_name(),
    os_version: System::long_os_version().or_else(System::name),
});

pub(crate) fn sdk_version() -> String {
    format!("rust:{}", env!("CARGO_PKG_VERSION"))
}

/// Tags stamped on every envelope before correlation and item tags are applied.
pub(crate) fn common_tags(config: &TelemetryConfig) -> Tags {
    let context = &*PROCESS_CONTEXT;
    let mut tags = Tags::new();
    tags.insert(tags::INTERNAL_SDK_VERSION.into(), sdk_version());
    if let Some(os_version) = &context.os_version {
        tags.insert(tags::DEVICE_OS_VERSION.into(), os_version.clone());
    }
    if let Some(host_name) = &context.host_name {
        tags.insert(tags::DEVICE_ID.into(), host_name.clone());
        tags.insert(tags::INTERNAL_NODE_NAME.into(), host_name.clone());
    }

    let role_instance = config
        .cloud_role_instance
        .clone()
        .or_else(|| context.host_name.clone());
    if let Some(role_instance) = role_instance {
        tags.insert(tags::CLOUD_ROLE_INSTANCE.into(), role_instance);
    }
    if let Some(cloud_role) = &config.cloud_role {
        tags.insert(tags::CLOUD_ROLE.into(), cloud_role.clone());
    }
    if let Some(version) = &config.application_version {
        tags.insert(tags::APPLICATION_VERSION.into(), version.clone());
    }
    tags
}
