//! Shared types used across stevedore crates.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Label whose value groups hosts into zones for pool balancing.
pub const ZONE_LABEL: &str = "zone";

/// Identifier of a host in the pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HostId(pub String);

/// Identifier of a container placed on a host.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContainerId(pub String);

/// Name under which an image is requested, e.g. `"app:v1"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageName(pub String);

/// Identifier of a built image, as reported by the runtime driver.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageId(pub String);

/// Opaque handle to a running container, as reported by the runtime driver.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerHandle(pub String);

macro_rules! impl_id_display {
    ($($ty:ident),*) => {
        $(
            impl fmt::Display for $ty {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.write_str(&self.0)
                }
            }

            impl From<&str> for $ty {
                fn from(s: &str) -> Self {
                    Self(s.to_string())
                }
            }

            impl From<String> for $ty {
                fn from(s: String) -> Self {
                    Self(s)
                }
            }
        )*
    };
}

impl_id_display!(HostId, ContainerId, ImageName, ImageId, ContainerHandle);

/// Lifecycle state of a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HostState {
    Provisioning,
    Running,
    Stopping,
    Stopped,
}

impl HostState {
    pub fn is_running(self) -> bool {
        self == HostState::Running
    }
}

/// Lifecycle state of a container.
///
/// Transitions: `Creating → Running → Stopping → Removed`, or
/// `Creating → Removed` directly when creation fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContainerState {
    Creating,
    Running,
    Stopping,
    Removed,
}

/// A host as reported by the elastic pool: identity, labels used for
/// placement affinity, and creation time (Unix epoch seconds).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostInfo {
    pub id: HostId,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    pub created_at: u64,
}

/// What the runtime driver needs to produce an image.
///
/// The build itself is an opaque external operation; this spec only
/// names the image and carries whatever the driver needs to run it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildSpec {
    pub image_name: ImageName,
    #[serde(default)]
    pub dockerfile_url: Option<String>,
    #[serde(default)]
    pub build_args: HashMap<String, String>,
}

impl BuildSpec {
    pub fn for_image(name: impl Into<ImageName>) -> Self {
        Self {
            image_name: name.into(),
            dockerfile_url: None,
            build_args: HashMap::new(),
        }
    }
}

/// Resources requested for a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSpec {
    pub memory_bytes: u64,
    pub cpu_weight: u32,
    /// Ports the container must be able to bind.
    #[serde(default)]
    pub ports: Vec<u16>,
}

impl Default for ResourceSpec {
    fn default() -> Self {
        Self {
            memory_bytes: 256 * 1024 * 1024,
            cpu_weight: 100,
            ports: Vec::new(),
        }
    }
}

/// A placed container, as returned by `ClusterScheduler::obtain`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerRecord {
    pub id: ContainerId,
    /// Owning host; immutable once created.
    pub host: HostId,
    /// The application/request context this container was placed for.
    pub app_id: String,
    pub image_name: ImageName,
    pub image_id: ImageId,
    pub handle: ContainerHandle,
    pub state: ContainerState,
}
