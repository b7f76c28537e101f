//! Service container and toolchain domain models

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Port mapping for a service container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortMapping {
    /// Port published on the host
    pub host: u16,
    /// Port the service listens on inside the container
    pub container: u16,
}

impl FromStr for PortMapping {
    type Err = String;

    /// Accepts `"6379"` (same port on both sides) or `"16379:6379"` (host:container)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse = |p: &str| {
            p.trim()
                .parse::<u16>()
                .ok()
                .filter(|port| *port != 0)
                .ok_or_else(|| format!("Invalid port in mapping '{}'", s))
        };

        match s.split_once(':') {
            Some((host, container)) => Ok(PortMapping {
                host: parse(host)?,
                container: parse(container)?,
            }),
            None => {
                let port = parse(s)?;
                Ok(PortMapping {
                    host: port,
                    container: port,
                })
            }
        }
    }
}

impl fmt::Display for PortMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.container)
    }
}

/// An auxiliary container started alongside a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceContainer {
    /// Service name, also used to derive the container name
    pub name: String,

    /// Image reference (e.g. `redis:5.0`)
    pub image: String,

    /// Published ports
    pub ports: Vec<PortMapping>,

    /// Overrides the image entrypoint
    pub entrypoint: Option<String>,

    /// Extra `docker run` options, split on whitespace
    pub options: Vec<String>,

    /// Environment passed into the container
    pub env: BTreeMap<String, String>,
}

impl ServiceContainer {
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            ports: Vec::new(),
            entrypoint: None,
            options: Vec::new(),
            env: BTreeMap::new(),
        }
    }

    pub fn with_port(mut self, port: PortMapping) -> Self {
        self.ports.push(port);
        self
    }

    pub fn with_entrypoint(mut self, entrypoint: impl Into<String>) -> Self {
        self.entrypoint = Some(entrypoint.into());
        self
    }
}

/// A toolchain or binary installed at a pinned version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolchain {
    pub name: String,

    /// Pinned version, or a channel name for rustup toolchains
    pub version: String,

    /// Extra components (rustup components for `rust`)
    pub components: Vec<String>,

    /// Install command overriding the built-in recipe
    pub install: Option<String>,

    /// Command whose output must contain the pinned version
    pub check: Option<String>,

    /// Directory appended to PATH after installation
    pub bin_dir: Option<String>,
}

/// Release channels that are not exact versions
const CHANNELS: &[&str] = &["stable", "beta", "nightly"];

impl Toolchain {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            components: Vec::new(),
            install: None,
            check: None,
            bin_dir: None,
        }
    }

    /// Whether the version is a moving channel rather than a pin
    pub fn is_channel(&self) -> bool {
        CHANNELS.iter().any(|c| self.version == *c || self.version.starts_with(&format!("{}-", c)))
    }

    /// Version string expected in the check command output
    ///
    /// Wildcard pins like `3.x` only require the leading part (`3.`).
    pub fn expected_version(&self) -> &str {
        self.version
            .strip_suffix('x')
            .or_else(|| self.version.strip_suffix('*'))
            .unwrap_or(&self.version)
    }
}
