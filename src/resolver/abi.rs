// src/resolver/abi.rs

//! Architecture (ABI) tags and the platform's preference order.

use std::fmt;
use std::str::FromStr;

/// ABI tag naming a per-architecture install directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Abi {
    Arm64V8a,
    ArmeabiV7a,
    X86_64,
    X86,
}

impl Abi {
    pub const ALL: [Abi; 4] = [Abi::Arm64V8a, Abi::ArmeabiV7a, Abi::X86_64, Abi::X86];

    pub fn tag(self) -> &'static str {
        match self {
            Abi::Arm64V8a => "arm64-v8a",
            Abi::ArmeabiV7a => "armeabi-v7a",
            Abi::X86_64 => "x86_64",
            Abi::X86 => "x86",
        }
    }

    /// ABI of the running process, if it is one we ship binaries for.
    pub fn native() -> Option<Abi> {
        Self::from_target_arch(std::env::consts::ARCH)
    }

    pub fn from_target_arch(arch: &str) -> Option<Abi> {
        match arch {
            "aarch64" => Some(Abi::Arm64V8a),
            "arm" => Some(Abi::ArmeabiV7a),
            "x86_64" => Some(Abi::X86_64),
            "x86" => Some(Abi::X86),
            _ => None,
        }
    }

    /// ABIs this platform can execute, most preferred first.
    ///
    /// 64-bit hosts can usually run their 32-bit sibling, so that one is
    /// listed second.
    pub fn supported() -> Vec<Abi> {
        Self::supported_for(std::env::consts::ARCH)
    }

    pub fn supported_for(arch: &str) -> Vec<Abi> {
        match Self::from_target_arch(arch) {
            Some(Abi::Arm64V8a) => vec![Abi::Arm64V8a, Abi::ArmeabiV7a],
            Some(Abi::X86_64) => vec![Abi::X86_64, Abi::X86],
            Some(abi) => vec![abi],
            None => Vec::new(),
        }
    }
}

impl fmt::Display for Abi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for Abi {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Abi::ALL
            .into_iter()
            .find(|abi| abi.tag() == wanted)
            .ok_or_else(|| {
                format!(
                    "unknown ABI tag: {wanted} (expected one of arm64-v8a, armeabi-v7a, x86_64, x86)"
                )
            })
    }
}
