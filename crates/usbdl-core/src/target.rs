//! Known download-mode targets.
//!
//! The boot ROM reports the SoC name as its USB product string. Matching it
//! against this catalog tells the operator which memory map the payload will
//! run in. Identification is advisory: an unknown product string never stops
//! a download.

use std::fmt;
use std::str::FromStr;

/// A supported SoC variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    Exynos8890,
    Exynos8895,
}

/// Memory addresses associated with a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetInfo {
    /// Exact USB product string reported by the boot ROM.
    pub name: &'static str,
    /// Where the boot ROM stores the received payload.
    pub transfer_buffer_address: u32,
    /// Location of the return address slot used by payloads.
    pub return_address_pointer: u32,
}

const EXYNOS8890: TargetInfo = TargetInfo {
    name: "Exynos8890",
    transfer_buffer_address: 0x0202_1800,
    return_address_pointer: 0x0202_0F08,
};

const EXYNOS8895: TargetInfo = TargetInfo {
    name: "Exynos8895",
    transfer_buffer_address: 0x0202_1800,
    return_address_pointer: 0x0202_0F18,
};

impl Target {
    /// Catalog order, used for matching and listing.
    pub const ALL: [Target; 2] = [Target::Exynos8890, Target::Exynos8895];

    pub fn info(self) -> &'static TargetInfo {
        match self {
            Target::Exynos8890 => &EXYNOS8890,
            Target::Exynos8895 => &EXYNOS8895,
        }
    }

    pub fn name(self) -> &'static str {
        self.info().name
    }

    pub fn transfer_buffer_address(self) -> u32 {
        self.info().transfer_buffer_address
    }

    pub fn return_address_pointer(self) -> u32 {
        self.info().return_address_pointer
    }

    /// Resolve a USB product string to a target (exact, case-sensitive).
    pub fn identify(product: &str) -> Option<Target> {
        Self::ALL.into_iter().find(|t| t.name() == product)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Target {
    type Err = UnknownTarget;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Target::identify(s).ok_or_else(|| UnknownTarget(s.to_string()))
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[error("Unknown target: {0:?}")]
pub struct UnknownTarget(pub String);
