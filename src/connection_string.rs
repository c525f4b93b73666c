use std::{borrow::Cow, collections::HashMap, convert::TryInto, str::FromStr};

pub(crate) const DEFAULT_INGESTION_ENDPOINT: &str = "https://in.applicationinsights.azure.com";
const FIELDS_SEPARATOR: char = ';';
const FIELD_KEY_VALUE_SEPARATOR: char = '=';

/// Parsed Application Insights connection string.
///
/// A connection string looks like
/// `InstrumentationKey=00000000-0000-0000-0000-000000000000;IngestionEndpoint=https://westeurope-5.in.applicationinsights.azure.com/`.
/// Keys are case-insensitive. Unknown keys are ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionString {
    pub(crate) ingestion_endpoint: http::Uri,
    pub(crate) instrumentation_key: String,
    pub(crate) application_id: Option<String>,
}

impl ConnectionString {
    /// The instrumentation key telemetry is attributed to.
    pub fn instrumentation_key(&self) -> &str {
        &self.instrumentation_key
    }

    /// Base URL of the ingestion endpoint, without trailing slash.
    pub fn ingestion_endpoint(&self) -> &http::Uri {
        &self.ingestion_endpoint
    }

    /// The optional application id.
    pub fn application_id(&self) -> Option<&str> {
        self.application_id.as_deref()
    }
}

/// Errors while parsing a connection string.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum ParseError {
    /// A field is not of the form `key=value`.
    #[error("invalid format")]
    InvalidFormat,
    /// No `InstrumentationKey` field, or an empty one.
    #[error("missing instrumentation key")]
    MissingInstrumentationKey,
    /// `Authorization` is set to something other than `ikey`.
    #[error("unsupported authorization; only \"ikey\" is supported")]
    UnsupportedAuthorization,
    /// The ingestion endpoint is not a valid URI.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(http::uri::InvalidUri),
}

impl FromStr for ConnectionString {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut result: HashMap<String, String> = s
            .split(FIELDS_SEPARATOR)
            .filter(|kv| !kv.trim().is_empty())
            .map(|kv| {
                let parts: Vec<&str> = kv.split(FIELD_KEY_VALUE_SEPARATOR).collect();
                if parts.len() == 2 {
                    Ok((parts[0].trim().to_lowercase(), parts[1].to_string()))
                } else {
                    Err(ParseError::InvalidFormat)
                }
            })
            .collect::<Result<_, _>>()?;

        let prefix_suffix = result.remove("endpointsuffix").map(|endpoint_suffix| {
            let location_prefix = result
                .remove("location")
                .map(|x| format!("{}.", x))
                .unwrap_or_default();
            (location_prefix, endpoint_suffix)
        });

        let ingestion_endpoint =
            if let Some(ingestion_endpoint) = result.remove("ingestionendpoint") {
                sanitize_url(ingestion_endpoint)?
            } else if let Some((location_prefix, endpoint_suffix)) = prefix_suffix.as_ref() {
                sanitize_url(format!("https://{}dc.{}", location_prefix, endpoint_suffix))?
            } else {
                http::Uri::from_static(DEFAULT_INGESTION_ENDPOINT)
            };

        if let Some(authorization) = result.remove("authorization") {
            if !authorization.eq_ignore_ascii_case("ikey") {
                return Err(ParseError::UnsupportedAuthorization);
            }
        }
        let instrumentation_key = result
            .remove("instrumentationkey")
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
            .ok_or(ParseError::MissingInstrumentationKey)?;
        let application_id = result
            .remove("applicationid")
            .filter(|id| !id.trim().is_empty());

        Ok(ConnectionString {
            ingestion_endpoint,
            instrumentation_key,
            application_id,
        })
    }
}

fn sanitize_url(url: String) -> Result<http::Uri, ParseError> {
    let mut new_url: Cow<str> = url.trim().into();
    if !new_url.starts_with("https://") {
        new_url = new_url.replace("http://", "https://").into();
    }

    new_url
        .trim_end_matches('/')
        .try_into()
        .map_err(ParseError::InvalidEndpoint)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::TryFrom;
    use test_case::test_case;

    #[test_case(
        "Authorization=ikey;InstrumentationKey=instr_key;IngestionEndpoint=ingest",
        "ingest",
        "instr_key" ; "default")]
    #[test_case(
        "Authorization=ikey;InstrumentationKey=instr_key;IngestionEndpoint= http://ingest/  ",
        "https://ingest",
        "instr_key" ; "sanitize url")]
    #[test_case(
        "Foo=1;InstrumentationKey=instr_key;Bar=2;IngestionEndpoint=ingest;Baz=3",
        "ingest",
        "instr_key" ; "ignore unknown fields")]
    #[test_case(
        "InstrumentationKey=instr_key",
        DEFAULT_INGESTION_ENDPOINT,
        "instr_key" ; "default endpoint")]
    #[test_case(
        "instrumentationkey=instr_key;",
        DEFAULT_INGESTION_ENDPOINT,
        "instr_key" ; "lowercase key and trailing separator")]
    #[test_case(
        "InstrumentationKey=instr_key;EndpointSuffix=ai.contoso.com",
        "https://dc.ai.contoso.com",
        "instr_key" ; "endpoint suffix")]
    #[test_case(
        "InstrumentationKey=instr_key;EndpointSuffix=ai.contoso.com;Location=westus2",
        "https://westus2.dc.ai.contoso.com",
        "instr_key" ; "endpoint suffix & location")]
    #[test_case(
        "InstrumentationKey=instr_key;EndpointSuffix=ai.contoso.com;IngestionEndpoint=ingest",
        "ingest",
        "instr_key" ; "endpoint suffix & override")]
    fn parse_succeeds(
        connection_string: &'static str,
        expected_ingestion_endpoint: &'static str,
        expected_instrumentation_key: &'static str,
    ) {
        let result: ConnectionString = connection_string.parse().unwrap();
        assert_eq!(
            http::Uri::try_from(expected_ingestion_endpoint).unwrap(),
            result.ingestion_endpoint
        );
        assert_eq!(
            expected_instrumentation_key.to_string(),
            result.instrumentation_key
        );
    }

    #[test]
    fn application_id() {
        let result: ConnectionString = "InstrumentationKey=k;ApplicationId=app"
            .parse()
            .unwrap();
        assert_eq!(Some("app"), result.application_id());
    }

    #[test_case("Authorization=foo;InstrumentationKey=instr_key" ; "authorization != ikey")]
    #[test_case("InstrumentationKey=instr_key;NoValue" ; "field without value")]
    #[test_case("InstrumentationKey=instr_key;InvalidValue=foo=bar" ; "2 equals signs")]
    #[test_case("IngestionEndpoint=ingest" ; "no instrumentation key")]
    #[test_case("InstrumentationKey= " ; "empty instrumentation key")]
    #[test_case("InstrumentationKey=instr_key;IngestionEndpoint=ftp:/foo" ; "invalid endpoint uri")]
    fn parse_fails(connection_string: &'static str) {
        connection_string.parse::<ConnectionString>().unwrap_err();
    }
}
