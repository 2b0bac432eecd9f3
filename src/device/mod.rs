//! Static device metadata and the IRI naming scheme
//!
//! Both are built once at startup from the [`Config`](crate::config::Config)
//! and shared read-only afterwards.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};

use tracing::debug;

use crate::rdf::DEFAULT_BASE_IRI;

/// Builds the IRIs and paths for one device and its sensor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorNaming {
    base_iri: String,
    device_id: String,
    group_id: String,
    sensor: String,
}

impl SensorNaming {
    pub fn new<B, D, G, S>(base_iri: B, device_id: D, group_id: G, sensor: S) -> Self
    where
        B: Into<String>,
        D: Into<String>,
        G: Into<String>,
        S: Into<String>,
    {
        let mut base_iri = base_iri.into();
        if !base_iri.ends_with('/') && !base_iri.ends_with('#') {
            base_iri.push('/');
        }
        Self {
            base_iri,
            device_id: device_id.into(),
            group_id: group_id.into(),
            sensor: sensor.into(),
        }
    }

    pub fn base_iri(&self) -> &str {
        &self.base_iri
    }

    pub fn sensor_name(&self) -> &str {
        &self.sensor
    }

    /// `<base>device05`
    pub fn device_iri(&self) -> String {
        format!("{}{}", self.base_iri, self.device_id)
    }

    /// `<base>groups/5/sensors/temperature`
    pub fn sensor_iri(&self) -> String {
        format!(
            "{}groups/{}/sensors/{}",
            self.base_iri, self.group_id, self.sensor
        )
    }

    /// `<base>groups/5/sensors/temperatureStatus`
    pub fn status_iri(&self) -> String {
        format!("{}Status", self.sensor_iri())
    }

    /// Vocabulary term in the base namespace, e.g. `hasValue`
    pub fn predicate(&self, name: &str) -> String {
        format!("{}{}", self.base_iri, name)
    }

    /// Request path of the observable sensor resource
    pub fn sensor_path(&self) -> String {
        format!("/{}", self.sensor)
    }
}

impl Default for SensorNaming {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_IRI, "device05", "5", "temperature")
    }
}

/// Descriptive data published on `/device`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    label: String,
    group: String,
    addresses: Vec<IpAddr>,
}

impl DeviceDescriptor {
    pub fn new<L: Into<String>, G: Into<String>>(
        label: L,
        group: G,
        addresses: Vec<IpAddr>,
    ) -> Self {
        Self {
            label: label.into(),
            group: group.into(),
            addresses,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn addresses(&self) -> &[IpAddr] {
        &self.addresses
    }
}

/// Addresses this host would use to reach other networks.
///
/// Connecting a UDP socket picks the outbound interface without sending
/// anything. Families without a route are skipped.
pub fn local_addresses() -> Vec<IpAddr> {
    let candidates = [
        (
            SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            SocketAddr::new(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)), 5683),
        ),
        (
            SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
            SocketAddr::new(
                IpAddr::V6(Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 1)),
                5683,
            ),
        ),
    ];

    let mut addresses = Vec::new();
    for (bind, target) in candidates {
        let local = UdpSocket::bind(bind).and_then(|socket| {
            socket.connect(target)?;
            socket.local_addr()
        });
        match local {
            Ok(local) if !local.ip().is_unspecified() && !local.ip().is_loopback() => {
                addresses.push(local.ip())
            }
            Ok(_) => {}
            Err(e) => debug!(%target, error = %e, "No route for address family"),
        }
    }
    addresses
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_naming() {
        let naming = SensorNaming::default();
        assert_eq!(naming.device_iri(), "http://itm.uni-luebeck.de/device05");
        assert_eq!(
            naming.sensor_iri(),
            "http://itm.uni-luebeck.de/groups/5/sensors/temperature"
        );
        assert_eq!(
            naming.status_iri(),
            "http://itm.uni-luebeck.de/groups/5/sensors/temperatureStatus"
        );
        assert_eq!(naming.sensor_path(), "/temperature");
        assert_eq!(
            naming.predicate("hasValue"),
            "http://itm.uni-luebeck.de/hasValue"
        );
    }

    #[test]
    fn test_base_iri_gets_trailing_slash() {
        let naming = SensorNaming::new("http://example.org/things", "d1", "2", "weather");
        assert_eq!(naming.device_iri(), "http://example.org/things/d1");
        assert_eq!(naming.sensor_path(), "/weather");
    }

    #[test]
    fn test_local_addresses_are_routable() {
        for address in local_addresses() {
            assert!(!address.is_loopback());
            assert!(!address.is_unspecified());
        }
    }
}
