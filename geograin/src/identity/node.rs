//! Node identity: one incarnation of a silo.
//!
//! A [`NodeIdentity`] is an endpoint, a generation and an optional cluster
//! tag. Instances are interned through an
//! [`IdentityInterner`](super::IdentityInterner), so structurally equal
//! identities share one allocation.
//!
//! # Semantics
//!
//! - Equality and hashing use endpoint and generation. The cluster tag is
//!   only consulted by [`NodeIdentity::is_same_cluster`].
//! - Ordering is primarily by generation: a higher generation is a newer
//!   incarnation. Endpoint breaks ties so the order stays total.
//! - Generation `0` is a wildcard for [`NodeIdentity::matches`].
//! - Negative generations denote clients rather than silos.
//!
//! # Parsable form
//!
//! ```text
//! 10.0.0.7:11111@412345678#eu-west
//! [::1]:11111@412345678#
//! ```
//!
//! An empty cluster segment means "no cluster tag". Inside the tag, `@`,
//! `#`, `%` and whitespace are written as `%XX` escapes of their UTF-8
//! bytes, so `eu#west` appears as `eu%23west`.

use std::borrow::Cow;
use std::cmp::Ordering;
use std::fmt;
use std::fmt::Write as _;
use std::hash::{Hash, Hasher};
use std::net::{IpAddr, SocketAddr};
use std::rc::Rc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use super::hash::jenkins_hash;
use super::interner::IdentityInterner;
use crate::error::IdentityParseError;

/// Seconds between the Unix epoch and 2010-01-01T00:00:00Z, the origin of
/// generation numbers.
const GENERATION_EPOCH_SECS: u64 = 1_262_304_000;

/// Generation that matches any other generation.
pub const WILDCARD_GENERATION: i32 = 0;

/// The interned tuple behind a [`NodeIdentity`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct NodeKey {
    pub(crate) endpoint: SocketAddr,
    pub(crate) generation: i32,
    pub(crate) cluster: Option<String>,
}

impl NodeKey {
    pub(crate) fn new(endpoint: SocketAddr, generation: i32, cluster: Option<&str>) -> Self {
        Self {
            // Drops IPv6 flow info and scope id so the parsable form
            // round-trips.
            endpoint: SocketAddr::new(endpoint.ip(), endpoint.port()),
            generation,
            cluster: cluster.filter(|tag| !tag.is_empty()).map(str::to_owned),
        }
    }

    pub(crate) fn parse(input: &str) -> Result<Self, IdentityParseError> {
        let missing = |separator| IdentityParseError::MissingSeparator {
            separator,
            input: input.to_owned(),
        };
        let (endpoint, rest) = input.split_once('@').ok_or_else(|| missing('@'))?;
        let (generation, cluster) = rest.split_once('#').ok_or_else(|| missing('#'))?;

        let (host, port) = endpoint
            .rsplit_once(':')
            .ok_or_else(|| IdentityParseError::Endpoint {
                fragment: endpoint.to_owned(),
            })?;
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        let ip: IpAddr = host.parse().map_err(|_| IdentityParseError::Endpoint {
            fragment: host.to_owned(),
        })?;
        let port: u16 = port.parse().map_err(|_| IdentityParseError::Port {
            fragment: port.to_owned(),
        })?;
        let generation: i32 = generation
            .parse()
            .map_err(|_| IdentityParseError::Generation {
                fragment: generation.to_owned(),
            })?;
        let cluster = unescape_cluster(cluster)?;

        Ok(Self::new(
            SocketAddr::new(ip, port),
            generation,
            Some(cluster.as_str()),
        ))
    }
}

fn is_reserved(c: char) -> bool {
    matches!(c, '@' | '#' | '%') || c.is_whitespace()
}

fn escape_cluster(tag: &str) -> Cow<'_, str> {
    if !tag.chars().any(is_reserved) {
        return Cow::Borrowed(tag);
    }
    let mut escaped = String::with_capacity(tag.len() + 8);
    for c in tag.chars() {
        if is_reserved(c) {
            let mut buf = [0u8; 4];
            for byte in c.encode_utf8(&mut buf).bytes() {
                let _ = write!(escaped, "%{byte:02X}");
            }
        } else {
            escaped.push(c);
        }
    }
    Cow::Owned(escaped)
}

fn unescape_cluster(fragment: &str) -> Result<String, IdentityParseError> {
    let invalid = || IdentityParseError::Cluster {
        fragment: fragment.to_owned(),
    };
    let mut bytes = Vec::with_capacity(fragment.len());
    let mut chars = fragment.chars();
    while let Some(c) = chars.next() {
        match c {
            '%' => {
                let hex: String = chars.by_ref().take(2).collect();
                if hex.len() != 2 || !hex.chars().all(|h| h.is_ascii_hexdigit()) {
                    return Err(invalid());
                }
                let byte = u8::from_str_radix(&hex, 16).map_err(|_| invalid())?;
                bytes.push(byte);
            }
            c if is_reserved(c) => return Err(invalid()),
            c => {
                let mut buf = [0u8; 4];
                bytes.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            }
        }
    }
    String::from_utf8(bytes).map_err(|_| invalid())
}

/// Interned identity of one silo incarnation.
///
/// Cheap to clone. Create through [`IdentityInterner::intern`] or
/// [`NodeIdentity::new`].
#[derive(Clone)]
pub struct NodeIdentity {
    key: Rc<NodeKey>,
}

impl NodeIdentity {
    /// Intern an identity in `interner`.
    ///
    /// Two calls with structurally equal arguments return handles on the
    /// same allocation while either is alive.
    pub fn new(
        interner: &IdentityInterner,
        endpoint: SocketAddr,
        generation: i32,
        cluster: Option<&str>,
    ) -> Self {
        interner.intern(endpoint, generation, cluster)
    }

    /// Parse `address:port@generation#cluster` and intern the result.
    pub fn from_parsable_string(
        interner: &IdentityInterner,
        input: &str,
    ) -> Result<Self, IdentityParseError> {
        interner.parse(input)
    }

    pub(crate) fn from_shared(key: Rc<NodeKey>) -> Self {
        Self { key }
    }

    /// Lossless textual form, inverse of [`NodeIdentity::from_parsable_string`].
    pub fn to_parsable_string(&self) -> String {
        format!(
            "{}@{}#{}",
            self.key.endpoint,
            self.key.generation,
            escape_cluster(self.key.cluster.as_deref().unwrap_or(""))
        )
    }

    /// Network endpoint of the silo.
    pub fn endpoint(&self) -> SocketAddr {
        self.key.endpoint
    }

    /// Incarnation number.
    pub fn generation(&self) -> i32 {
        self.key.generation
    }

    /// Cluster the silo belongs to, if tagged.
    pub fn cluster(&self) -> Option<&str> {
        self.key.cluster.as_deref()
    }

    /// Negative generations identify clients.
    pub fn is_client(&self) -> bool {
        self.key.generation < 0
    }

    /// Same endpoint, and same generation unless either side is the
    /// wildcard generation.
    pub fn matches(&self, other: &NodeIdentity) -> bool {
        self.key.endpoint == other.key.endpoint
            && (self.key.generation == other.key.generation
                || self.key.generation == WILDCARD_GENERATION
                || other.key.generation == WILDCARD_GENERATION)
    }

    /// True when either side is untagged or both tags are equal.
    pub fn is_same_cluster(&self, other: &NodeIdentity) -> bool {
        match (self.cluster(), other.cluster()) {
            (Some(mine), Some(theirs)) => mine == theirs,
            _ => true,
        }
    }

    /// Hash over endpoint and generation, stable across processes.
    pub fn consistent_hash_code(&self) -> u32 {
        let text = format!("{}{}", self.key.endpoint, self.key.generation);
        jenkins_hash(text.as_bytes())
    }

    /// `count` stable hashes for placing this node on a ring.
    pub fn uniform_hash_codes(&self, count: usize) -> Vec<u32> {
        (0..count)
            .map(|bucket| {
                let text = format!("{}{}#{}", self.key.endpoint, self.key.generation, bucket);
                jenkins_hash(text.as_bytes())
            })
            .collect()
    }

    /// Whether both handles share one interned allocation.
    pub fn ptr_eq(this: &NodeIdentity, other: &NodeIdentity) -> bool {
        Rc::ptr_eq(&this.key, &other.key)
    }
}

/// A fresh generation: whole seconds since 2010-01-01 UTC.
///
/// Never returns the wildcard generation.
pub fn allocate_generation() -> i32 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs();
    let generation = now.saturating_sub(GENERATION_EPOCH_SECS) as i32;
    if generation == WILDCARD_GENERATION {
        1
    } else {
        generation
    }
}

impl PartialEq for NodeIdentity {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.key, &other.key)
            || (self.key.endpoint == other.key.endpoint
                && self.key.generation == other.key.generation)
    }
}

impl Eq for NodeIdentity {}

impl Hash for NodeIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.endpoint.hash(state);
        self.key.generation.hash(state);
    }
}

impl Ord for NodeIdentity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key
            .generation
            .cmp(&other.key.generation)
            .then_with(|| self.key.endpoint.cmp(&other.key.endpoint))
    }
}

impl PartialOrd for NodeIdentity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.is_client() { 'C' } else { 'S' };
        write!(f, "{}{}:{}", kind, self.key.endpoint, self.key.generation)
    }
}

impl fmt::Debug for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_parsable_string())
    }
}
