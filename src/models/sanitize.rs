use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::{borrow::Borrow, fmt};

/// String that is truncated to at most `N` bytes on construction, cutting on a char boundary.
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct LimitedLenString<const N: usize>(String);

pub(crate) type LimitedLenString64 = LimitedLenString<64>;
pub(crate) type LimitedLenString128 = LimitedLenString<128>;
pub(crate) type LimitedLenString150 = LimitedLenString<150>;
pub(crate) type LimitedLenString256 = LimitedLenString<256>;
pub(crate) type LimitedLenString512 = LimitedLenString<512>;
pub(crate) type LimitedLenString1024 = LimitedLenString<1024>;
pub(crate) type LimitedLenString2048 = LimitedLenString<2048>;
pub(crate) type LimitedLenString8192 = LimitedLenString<8192>;
pub(crate) type LimitedLenString32768 = LimitedLenString<32768>;

impl<const N: usize> LimitedLenString<N> {
    pub(crate) fn as_str(&self) -> &str {
        &self.0
    }
}

pub(crate) fn truncate_to(value: &mut String, max_len: usize) {
    if value.len() <= max_len {
        return;
    }
    let mut end = max_len;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    value.truncate(end);
}

impl<const N: usize> From<String> for LimitedLenString<N> {
    fn from(mut value: String) -> Self {
        truncate_to(&mut value, N);
        Self(value)
    }
}

impl<const N: usize> From<&str> for LimitedLenString<N> {
    fn from(value: &str) -> Self {
        value.to_string().into()
    }
}

impl<const N: usize> AsRef<str> for LimitedLenString<N> {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl<const N: usize> Borrow<str> for LimitedLenString<N> {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl<const N: usize> fmt::Debug for LimitedLenString<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl<const N: usize> fmt::Display for LimitedLenString<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl<const N: usize> Serialize for LimitedLenString<N> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de, const N: usize> Deserialize<'de> for LimitedLenString<N> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Into::into)
    }
}

/// Applies field length caps that can't be expressed in the type of a field.
pub(crate) trait Sanitize {
    fn sanitize(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Properties;

    #[test]
    fn truncates_on_char_boundary() {
        let value: LimitedLenString<4> = "aé€".into();
        assert_eq!("aé", value.as_str());
    }

    #[test]
    fn sanitize_properties() {
        let properties: Properties = vec![
            // Long value
            ("1".repeat(1), "v".repeat(8200)),
            // Long key and long value
            ("2".repeat(160), "v".repeat(8200)),
            // Long key
            ("3".repeat(160), "v".repeat(1)),
            // Long key collides with and replaces other key
            ("4".repeat(150), "x".repeat(1)),
            ("4".repeat(160), "y".repeat(1)),
        ]
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect();
        assert_eq!(4, properties.len());
        assert_eq!(8192, properties.get("1").unwrap().as_str().len());
        assert_eq!(8192, properties.get(&*"2".repeat(150)).unwrap().as_str().len());
        assert_eq!(1, properties.get(&*"3".repeat(150)).unwrap().as_str().len());
        assert_eq!("y", properties.get(&*"4".repeat(150)).unwrap().as_str());
    }
}
