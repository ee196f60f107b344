use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use uuid7::{Uuid, uuid7};

use crate::error::ValidationError;

/// Stable identity shared by every revision of one logical update.
///
/// Generated once on create and never accepted from a caller for a new update.
/// Stored as raw uuid7 bytes; `Display` gives the canonical hyphenated string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LogicalId([u8; 16]);

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash)]
pub struct TimeStamp(DateTime<Utc>);

impl LogicalId {
    pub fn new() -> Self {
        Self(*uuid7().as_bytes())
    }
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl Default for LogicalId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<[u8; 16]> for LogicalId {
    fn from(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for LogicalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&Uuid::from(self.0), f)
    }
}

impl FromStr for LogicalId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uuid: Uuid = s
            .parse()
            .map_err(|_| ValidationError::MalformedLogicalId(s.to_string()))?;
        Ok(Self(*uuid.as_bytes()))
    }
}

impl TimeStamp {
    pub fn now() -> Self {
        Self(Utc::now())
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
    pub fn from_nanos(nanos: i64) -> Self {
        Self(DateTime::from_timestamp_nanos(nanos))
    }
    /// Nanoseconds since the epoch, `None` outside the representable range.
    pub fn nanos(&self) -> Option<i64> {
        self.0.timestamp_nanos_opt()
    }
}

impl Default for TimeStamp {
    fn default() -> Self {
        Self::now()
    }
}

impl From<DateTime<Utc>> for TimeStamp {
    fn from(value: DateTime<Utc>) -> Self {
        TimeStamp(value)
    }
}

impl<C> minicbor::Encode<C> for TimeStamp {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.nanos() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp::from_nanos(nsecs))
    }
}

impl<C> minicbor::Encode<C> for LogicalId {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        e.bytes(&self.0)?.ok()
    }
}

impl<'b, C> minicbor::Decode<'b, C> for LogicalId {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let bytes: [u8; 16] = d
            .bytes()?
            .try_into()
            .map_err(|_| minicbor::decode::Error::message("update id must be 16 bytes"))?;

        Ok(LogicalId(bytes))
    }
}
