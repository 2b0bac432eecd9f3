//! Command-line configuration

use std::{
    net::{IpAddr, SocketAddr},
    time::Duration,
};

use clap::Parser;

use crate::{
    device::{DeviceDescriptor, SensorNaming, local_addresses},
    error::{Error, Result},
    rdf::{DEFAULT_BASE_IRI, Prefixes},
    registry::RegistryTarget,
    representation::RepresentationBuilder,
};

/// Sensor name used with the simulated source
pub const SIMULATED_SENSOR: &str = "temperature";
/// Sensor name used when readings come from a feed
pub const FEED_SENSOR: &str = "weather";

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Semantic sensor provider over CoAP")]
pub struct Config {
    /// UDP port to listen on
    #[arg(short, long, default_value_t = 5683)]
    pub port: u16,

    /// Address to bind
    #[arg(long, default_value = "0.0.0.0")]
    pub bind: IpAddr,

    /// Registry to announce to, e.g. coap://141.83.151.196:5683/registry
    #[arg(short, long)]
    pub registry: Option<String>,

    /// Exit once registration has completed or failed
    #[arg(long)]
    pub exit_after_registration: bool,

    /// Read values from this JSON-lines feed ("-" for stdin) instead of simulating
    #[arg(long)]
    pub feed: Option<String>,

    /// Field of each feed record holding the value
    #[arg(long, default_value = crate::source::feed::DEFAULT_FIELD)]
    pub feed_field: String,

    /// Simulated sensor tick period in milliseconds
    #[arg(long, default_value_t = 1000)]
    pub interval_ms: u64,

    /// Sensor name, also the resource path
    #[arg(long)]
    pub sensor: Option<String>,

    #[arg(long, default_value = "device05")]
    pub device_id: String,

    #[arg(long, default_value = "5")]
    pub group_id: String,

    /// Human-readable device label
    #[arg(long, default_value = "Weather station")]
    pub label: String,

    /// Device group name
    #[arg(long, default_value = "SVA_05-SS15")]
    pub group: String,

    /// Namespace for device and sensor IRIs
    #[arg(long, default_value = DEFAULT_BASE_IRI)]
    pub base_iri: String,

    /// Address to publish on /device (repeatable); discovered when absent
    #[arg(long = "address")]
    pub addresses: Vec<IpAddr>,
}

impl Default for Config {
    fn default() -> Self {
        Self::parse_from(["coap-ssp"])
    }
}

impl Config {
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    pub fn sensor_name(&self) -> &str {
        match (&self.sensor, &self.feed) {
            (Some(sensor), _) => sensor,
            (None, Some(_)) => FEED_SENSOR,
            (None, None) => SIMULATED_SENSOR,
        }
    }

    pub fn naming(&self) -> SensorNaming {
        SensorNaming::new(
            self.base_iri.as_str(),
            self.device_id.as_str(),
            self.group_id.as_str(),
            self.sensor_name(),
        )
    }

    pub fn builder(&self) -> RepresentationBuilder {
        let naming = self.naming();
        RepresentationBuilder::new(Prefixes::standard(naming.base_iri()), naming)
    }

    pub fn device(&self) -> DeviceDescriptor {
        let addresses = if self.addresses.is_empty() {
            local_addresses()
        } else {
            self.addresses.clone()
        };
        DeviceDescriptor::new(self.label.as_str(), self.group.as_str(), addresses)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn registry_target(&self) -> Result<Option<RegistryTarget>> {
        self.registry
            .as_deref()
            .map(RegistryTarget::parse)
            .transpose()
    }

    /// Rejects settings the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.interval_ms == 0 {
            return Err(Error::config("--interval-ms must be positive"));
        }
        let sensor = self.sensor_name();
        // ':' and '*' would turn the route into a pattern
        if sensor.is_empty() || sensor.contains(['/', ':', '*']) {
            return Err(Error::config(format!("invalid sensor name '{sensor}'")));
        }
        if matches!(sensor, "device" | ".well-known") {
            return Err(Error::config(format!(
                "sensor name '{sensor}' clashes with a built-in resource"
            )));
        }
        self.registry_target()?;
        Ok(())
    }
}
