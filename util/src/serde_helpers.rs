use std::marker::PhantomData;
use std::str::FromStr;

use serde::de::{Error, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub struct StrVisitor<S>(PhantomData<S>);

impl<S> StrVisitor<S> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<S> Default for StrVisitor<S> {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl<S: FromStr> Visitor<'_> for StrVisitor<S>
where
    S::Err: std::fmt::Display,
{
    type Value = S;

    fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("a string")
    }

    fn visit_str<E: Error>(self, value: &str) -> Result<Self::Value, E> {
        value.parse::<S>().map_err(Error::custom)
    }
}

pub mod humantime {
    use std::time::Duration;

    use super::*;

    pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if serializer.is_human_readable() {
            serializer.collect_str(&::humantime::format_duration(*value))
        } else {
            value.serialize(serializer)
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        if deserializer.is_human_readable() {
            struct HumantimeVisitor;

            impl Visitor<'_> for HumantimeVisitor {
                type Value = Duration;

                fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                    f.write_str("a duration string")
                }

                fn visit_str<E: Error>(self, value: &str) -> Result<Self::Value, E> {
                    ::humantime::parse_duration(value).map_err(Error::custom)
                }
            }

            deserializer.deserialize_str(HumantimeVisitor)
        } else {
            Duration::deserialize(deserializer)
        }
    }
}
