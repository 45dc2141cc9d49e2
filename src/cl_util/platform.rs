use crate::error::{Error, Result};
use std::fmt;

#[cfg(feature = "opencl")]
use ocl::{enums::DeviceInfo, enums::DeviceInfoResult, flags, Device, Platform};

/// A capability a compute platform may expose.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Capability {
    /// Single-precision floating-point kernels
    FloatCompute,
    Gpu,
    Cpu,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DevicePreference {
    /// Run on the host executor
    Host,
    /// Use a GPU if one is available, fall back to anything that fits otherwise
    PreferGpu,
    RequireGpu,
    RequireCpu,
}

/// What `select_platform` looks for.
#[derive(Clone, Debug)]
pub struct PlatformCriteria {
    pub preference: DevicePreference,
    pub capabilities: Vec<Capability>,
}

impl PlatformCriteria {
    pub fn new(preference: DevicePreference) -> PlatformCriteria {
        PlatformCriteria {
            preference,
            capabilities: vec![Capability::FloatCompute],
        }
    }
    pub fn with_capability(mut self, capability: Capability) -> PlatformCriteria {
        if !self.capabilities.contains(&capability) {
            self.capabilities.push(capability);
        }
        self
    }
    fn accepts(&self, platform: &PlatformHandle) -> bool {
        let preferred = match self.preference {
            DevicePreference::Host => platform.is_host(),
            DevicePreference::RequireGpu => platform.has(Capability::Gpu),
            DevicePreference::RequireCpu => platform.has(Capability::Cpu),
            DevicePreference::PreferGpu => true,
        };
        preferred && self.capabilities.iter().all(|&c| platform.has(c))
    }
}

#[derive(Clone, Debug)]
pub(crate) enum Backend {
    Host,
    #[cfg(feature = "opencl")]
    OpenCl { platform: Platform, device: Device },
}

/// A selected platform + device pair.
#[derive(Clone, Debug)]
pub struct PlatformHandle {
    name: String,
    backend: Backend,
    capabilities: Vec<Capability>,
}

impl PlatformHandle {
    /// The host executor, which is always available.
    pub fn host() -> PlatformHandle {
        PlatformHandle {
            name: "host".to_owned(),
            backend: Backend::Host,
            capabilities: vec![Capability::FloatCompute],
        }
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn capabilities(&self) -> &[Capability] {
        &self.capabilities
    }
    pub fn has(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
    pub fn is_host(&self) -> bool {
        match self.backend {
            Backend::Host => true,
            #[cfg(feature = "opencl")]
            _ => false,
        }
    }
    pub(crate) fn backend(&self) -> &Backend {
        &self.backend
    }
}

impl fmt::Display for PlatformHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {:?}", self.name, self.capabilities)
    }
}

/// Lists every platform/device pair known to this build. OpenCL devices, if any, come first in
/// driver order; the host executor is always last.
pub fn available_platforms() -> Vec<PlatformHandle> {
    let mut platforms = Vec::new();
    #[cfg(feature = "opencl")]
    platforms.extend(opencl_platforms());
    platforms.push(PlatformHandle::host());
    platforms
}

/// Picks the first platform that satisfies `criteria`, preferring GPUs for `PreferGpu`.
pub fn select_platform(criteria: &PlatformCriteria) -> Result<PlatformHandle> {
    let candidates = available_platforms()
        .into_iter()
        .filter(|p| criteria.accepts(p))
        .collect::<Vec<PlatformHandle>>();

    let selected = match criteria.preference {
        DevicePreference::PreferGpu => candidates
            .iter()
            .find(|p| p.has(Capability::Gpu))
            .or_else(|| candidates.first())
            .cloned(),
        _ => candidates.first().cloned(),
    };

    match selected {
        Some(platform) => {
            info!("Using platform \"{}\".", platform);
            Ok(platform)
        }
        None => Err(Error::NoCompatibleDevice(format!(
            "no platform satisfies {:?} with {:?}",
            criteria.preference, criteria.capabilities
        ))),
    }
}

#[cfg(feature = "opencl")]
fn opencl_platforms() -> Vec<PlatformHandle> {
    let mut handles = Vec::new();
    for platform in Platform::list() {
        let devices = match Device::list_all(platform) {
            Ok(devices) => devices,
            Err(e) => {
                warn!("skipping OpenCL platform: {}", e);
                continue;
            }
        };
        for device in devices {
            let mut capabilities = vec![Capability::FloatCompute];
            if let Ok(DeviceInfoResult::Type(t)) = device.info(DeviceInfo::Type) {
                if t.contains(flags::DeviceType::GPU) {
                    capabilities.push(Capability::Gpu);
                }
                if t.contains(flags::DeviceType::CPU) {
                    capabilities.push(Capability::Cpu);
                }
            }
            let name = format!(
                "{} / {}",
                platform.name().unwrap_or_default(),
                device.name().unwrap_or_default()
            );
            handles.push(PlatformHandle {
                name,
                backend: Backend::OpenCl { platform, device },
                capabilities,
            });
        }
    }
    handles
}
