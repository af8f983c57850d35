use crate::{
    Result,
    constants::{LLRP_DEFAULT_PORT, MAX_TAG_ID_LEN, MIN_TAG_ID_LEN},
    error::Error,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Tag identifier (EPC or TID bytes, 1-62 bytes).
///
/// Ordered by raw bytes so that snapshots are deterministic. Displays and
/// serializes as uppercase hex.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TagId(Vec<u8>);

impl TagId {
    /// Create a tag identifier with length validation.
    ///
    /// # Errors
    /// Returns `Error::InvalidTagId` if the length is outside 1-62 bytes.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Result<Self> {
        let bytes = bytes.into();
        let len = bytes.len();
        if !(MIN_TAG_ID_LEN..=MAX_TAG_ID_LEN).contains(&len) {
            return Err(Error::InvalidTagId(format!(
                "Tag id must be {MIN_TAG_ID_LEN}-{MAX_TAG_ID_LEN} bytes, got {len}"
            )));
        }
        Ok(TagId(bytes))
    }

    /// Parse an uppercase or lowercase hex string.
    ///
    /// # Errors
    /// Returns `Error::InvalidTagId` on odd length or non-hex characters.
    pub fn from_hex(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.len() % 2 != 0 {
            return Err(Error::InvalidTagId(format!("Odd-length hex: {s}")));
        }

        let bytes = (0..s.len())
            .step_by(2)
            .map(|i| {
                s.get(i..i + 2)
                    .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                    .ok_or_else(|| Error::InvalidTagId(format!("Invalid hex: {s}")))
            })
            .collect::<Result<Vec<u8>>>()?;

        TagId::new(bytes)
    }

    /// Raw identifier bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Uppercase hex representation.
    #[must_use]
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02X}")).collect()
    }

    /// Number of identifier bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false; an identifier has at least one byte.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for TagId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl std::str::FromStr for TagId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        TagId::from_hex(s)
    }
}

impl Serialize for TagId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for TagId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        TagId::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Reader antenna port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AntennaId(u16);

impl AntennaId {
    #[must_use]
    pub fn new(id: u16) -> Self {
        AntennaId(id)
    }

    #[must_use]
    pub fn as_u16(&self) -> u16 {
        self.0
    }
}

impl fmt::Display for AntennaId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One observed tag read.
///
/// Immutable once built: fields are only reachable through accessors.
///
/// # Examples
///
/// ```
/// use readerd_core::{AntennaId, TagEvent, TagId};
/// use chrono::Utc;
///
/// let tag = TagId::from_hex("E2801160600002").unwrap();
/// let event = TagEvent::new(tag, AntennaId::new(1), Utc::now())
///     .with_rssi(-61)
///     .with_channel(7);
///
/// assert_eq!(event.rssi(), Some(-61));
/// assert_eq!(event.seen_count(), 1);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagEvent {
    tag_id: TagId,
    antenna: AntennaId,
    rssi: Option<i16>,
    channel: Option<u16>,
    seen_count: u16,
    timestamp: DateTime<Utc>,
}

impl TagEvent {
    /// Create a read with no RSSI or channel and a seen count of one.
    #[must_use]
    pub fn new(tag_id: TagId, antenna: AntennaId, timestamp: DateTime<Utc>) -> Self {
        Self {
            tag_id,
            antenna,
            rssi: None,
            channel: None,
            seen_count: 1,
            timestamp,
        }
    }

    /// Set the received signal strength (dBm).
    #[must_use]
    pub fn with_rssi(mut self, rssi: i16) -> Self {
        self.rssi = Some(rssi);
        self
    }

    /// Set the RF channel index the tag was seen on.
    #[must_use]
    pub fn with_channel(mut self, channel: u16) -> Self {
        self.channel = Some(channel);
        self
    }

    /// Set how many times the reader saw the tag within this report.
    #[must_use]
    pub fn with_seen_count(mut self, seen_count: u16) -> Self {
        self.seen_count = seen_count.max(1);
        self
    }

    #[must_use]
    pub fn tag_id(&self) -> &TagId {
        &self.tag_id
    }

    #[must_use]
    pub fn antenna(&self) -> AntennaId {
        self.antenna
    }

    #[must_use]
    pub fn rssi(&self) -> Option<i16> {
        self.rssi
    }

    #[must_use]
    pub fn channel(&self) -> Option<u16> {
        self.channel
    }

    #[must_use]
    pub fn seen_count(&self) -> u16 {
        self.seen_count
    }

    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Reader network endpoint (`host:port`).
///
/// The port defaults to 5084 when omitted. IPv6 hosts must be bracketed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    /// Create an endpoint.
    ///
    /// # Errors
    /// Returns `Error::InvalidEndpoint` if the host is empty.
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self> {
        let host = host.into();
        let host = host.trim();
        if host.is_empty() {
            return Err(Error::InvalidEndpoint("Host must not be empty".to_string()));
        }
        Ok(Endpoint {
            host: host.to_string(),
            port,
        })
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Endpoint {
            host: "localhost".to_string(),
            port: LLRP_DEFAULT_PORT,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl std::str::FromStr for Endpoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let invalid = || Error::InvalidEndpoint(format!("Invalid endpoint: {s}"));

        // [v6]:port or [v6]
        if let Some(rest) = s.strip_prefix('[') {
            let (host, tail) = rest.split_once(']').ok_or_else(invalid)?;
            let port = match tail.strip_prefix(':') {
                Some(port) => port.parse().map_err(|_| invalid())?,
                None if tail.is_empty() => LLRP_DEFAULT_PORT,
                None => return Err(invalid()),
            };
            return Endpoint::new(host, port);
        }

        match s.rsplit_once(':') {
            Some((host, _)) if host.contains(':') => Err(invalid()),
            Some((host, port)) => Endpoint::new(host, port.parse().map_err(|_| invalid())?),
            None => Endpoint::new(s, LLRP_DEFAULT_PORT),
        }
    }
}

impl Serialize for Endpoint {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Endpoint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
