//! Static path catalog.
//!
//! Maps each [`NetworkPathCapability`] to the [`PathGroup`] that carries it and
//! each group to the filter patterns a chain returns on. Interface naming is
//! device-specific, so the vendor aliases live here as data rather than in the
//! compiler.

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ModelError;

// ============================================================================
// Capabilities
// ============================================================================

/// A network path an application may be granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NetworkPathCapability {
    #[serde(rename = "local")]
    Local,
    #[serde(rename = "wifi")]
    WiFi,
    #[serde(rename = "cellular")]
    Cellular,
    #[serde(rename = "roaming")]
    Roaming,
    #[serde(rename = "vpn")]
    Vpn,
    #[serde(rename = "bluetooth")]
    BluetoothTethering,
    #[serde(rename = "tor")]
    Tor,
}

impl NetworkPathCapability {
    /// Every capability, in signature order.
    pub const ALL: [Self; 7] = [
        Self::Local,
        Self::WiFi,
        Self::Cellular,
        Self::Roaming,
        Self::Vpn,
        Self::BluetoothTethering,
        Self::Tor,
    ];

    /// Group whose patterns this capability opens.
    #[must_use]
    pub const fn group(self) -> PathGroup {
        match self {
            Self::Local => PathGroup::Loopback,
            Self::WiFi => PathGroup::Wlan,
            Self::Cellular | Self::Roaming => PathGroup::Mobile,
            Self::Vpn => PathGroup::Tunnel,
            Self::BluetoothTethering => PathGroup::Bluetooth,
            Self::Tor => PathGroup::Tor,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::WiFi => "wifi",
            Self::Cellular => "cellular",
            Self::Roaming => "roaming",
            Self::Vpn => "vpn",
            Self::BluetoothTethering => "bluetooth",
            Self::Tor => "tor",
        }
    }
}

impl fmt::Display for NetworkPathCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NetworkPathCapability {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|cap| cap.as_str() == needle)
            .ok_or_else(|| ModelError::UnknownCapability(s.to_string()))
    }
}

// ============================================================================
// Patterns
// ============================================================================

/// What a single return directive matches.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PathPattern {
    /// Egress interface glob (`wlan+`).
    Interface { glob: Cow<'static, str> },
    /// Destination network, optionally narrowed to one TCP port.
    Destination {
        cidr: Cow<'static, str>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tcp_port: Option<u16>,
    },
}

impl PathPattern {
    #[must_use]
    pub const fn interface(glob: &'static str) -> Self {
        Self::Interface {
            glob: Cow::Borrowed(glob),
        }
    }

    #[must_use]
    pub const fn destination(cidr: &'static str, tcp_port: Option<u16>) -> Self {
        Self::Destination {
            cidr: Cow::Borrowed(cidr),
            tcp_port,
        }
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interface { glob } => write!(f, "out:{glob}"),
            Self::Destination {
                cidr,
                tcp_port: Some(port),
            } => write!(f, "dst:{cidr}:tcp/{port}"),
            Self::Destination {
                cidr,
                tcp_port: None,
            } => write!(f, "dst:{cidr}"),
        }
    }
}

static LOOPBACK: [PathPattern; 2] = [
    PathPattern::interface("lo"),
    PathPattern::destination("127.0.0.0/8", None),
];

static WLAN: [PathPattern; 1] = [PathPattern::interface("wlan+")];

static MOBILE: [PathPattern; 4] = [
    PathPattern::interface("rmnet+"),
    PathPattern::interface("ccmni+"),
    PathPattern::interface("pdp+"),
    PathPattern::interface("clat+"),
];

static TUNNEL: [PathPattern; 3] = [
    PathPattern::interface("tun+"),
    PathPattern::interface("ppp+"),
    PathPattern::interface("wg+"),
];

static BLUETOOTH: [PathPattern; 1] = [PathPattern::interface("bnep+")];

static TOR: [PathPattern; 2] = [
    PathPattern::destination("127.0.0.1/32", Some(9040)),
    PathPattern::destination("127.0.0.1/32", Some(9050)),
];

// ============================================================================
// Groups
// ============================================================================

/// Physical path shared by one or more capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathGroup {
    Loopback,
    Wlan,
    Mobile,
    Tunnel,
    Bluetooth,
    Tor,
}

impl PathGroup {
    /// Canonical emission order.
    pub const ORDER: [Self; 6] = [
        Self::Loopback,
        Self::Wlan,
        Self::Mobile,
        Self::Tunnel,
        Self::Bluetooth,
        Self::Tor,
    ];

    #[must_use]
    pub fn patterns(self) -> &'static [PathPattern] {
        match self {
            Self::Loopback => &LOOPBACK,
            Self::Wlan => &WLAN,
            Self::Mobile => &MOBILE,
            Self::Tunnel => &TUNNEL,
            Self::Bluetooth => &BLUETOOTH,
            Self::Tor => &TOR,
        }
    }

    /// Whether the group's patterns are vendor names for one physical link.
    ///
    /// Devices rename the active mobile interface at runtime, so a chain that
    /// returns on any mobile alias must return on all of them.
    #[must_use]
    pub const fn is_vendor_aliased(self) -> bool {
        matches!(self, Self::Mobile)
    }

    /// Group a pattern belongs to, if it is in the catalog.
    #[must_use]
    pub fn of_pattern(pattern: &PathPattern) -> Option<Self> {
        Self::ORDER
            .into_iter()
            .find(|group| group.patterns().contains(pattern))
    }
}
