//! Vendor profiles: how to pull a configuration out of one device family.
//!
//! Vendor keys are canonically lowercase. [`ProfileRegistry::lookup`] trims and
//! lowercases its argument, so inventories may spell vendors in any case.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{BackupError, ProfileError};

/// How the session executor decides a command's output is complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStrategy {
    /// One command, completion by prompt detection.
    Standard,
    /// One command, completion after a fixed inactivity delay.
    TimingBased,
    /// Privilege escalation first, then a timing-based capture.
    EnableThenTiming,
    /// Every command in order on one session; the last output is kept.
    MultiCommandSequential,
}

impl ExecutionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::TimingBased => "timing_based",
            Self::EnableThenTiming => "enable_then_timing",
            Self::MultiCommandSequential => "multi_command_sequential",
        }
    }

    fn single_command(&self) -> bool {
        !matches!(self, Self::MultiCommandSequential)
    }
}

impl fmt::Display for ExecutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendorProfile {
    /// Transport/platform name handed to the session collaborator.
    pub protocol: String,
    pub strategy: ExecutionStrategy,
    pub commands: Vec<String>,
}

impl VendorProfile {
    pub fn new(
        protocol: impl Into<String>,
        strategy: ExecutionStrategy,
        commands: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            protocol: protocol.into(),
            strategy,
            commands: commands.into_iter().map(Into::into).collect(),
        }
    }

    pub fn validate(&self, vendor: &str) -> Result<(), ProfileError> {
        if self.commands.is_empty() {
            return Err(ProfileError::NoCommands(vendor.to_string()));
        }
        if self.commands.iter().any(|c| c.trim().is_empty()) {
            return Err(ProfileError::EmptyCommand(vendor.to_string()));
        }
        if self.strategy.single_command() && self.commands.len() > 1 {
            return Err(ProfileError::TooManyCommands {
                vendor: vendor.to_string(),
                strategy: self.strategy.as_str(),
                count: self.commands.len(),
            });
        }
        Ok(())
    }
}

fn canonical(vendor: &str) -> String {
    vendor.trim().to_lowercase()
}

/// Vendor id to profile table. Built once at startup and passed around
/// explicitly, so tests can inject their own profiles.
#[derive(Debug, Clone, Default)]
pub struct ProfileRegistry {
    profiles: BTreeMap<String, VendorProfile>,
    aliases: BTreeMap<String, String>,
}

impl ProfileRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// The profiles observed in the field, plus aliases for
    /// the vendor keys used by existing inventories.
    pub fn builtin() -> Self {
        use ExecutionStrategy::*;

        let mut registry = Self::empty();
        let builtins = [
            (
                "generic-router",
                VendorProfile::new("huawei", Standard, ["display current-configuration | no-more"]),
            ),
            (
                "optical-line-terminal",
                VendorProfile::new(
                    "huawei_smartax",
                    EnableThenTiming,
                    ["display current-configuration | no-more"],
                ),
            ),
            (
                "layer2-switch",
                VendorProfile::new(
                    "huawei",
                    MultiCommandSequential,
                    ["screen-length 0 temporary", "display current-configuration"],
                ),
            ),
            (
                "router-os",
                VendorProfile::new("mikrotik_routeros", Standard, ["export terse"]),
            ),
            (
                "ios-like",
                VendorProfile::new("cisco_ios", Standard, ["show running-config"]),
            ),
            (
                "datacom-like",
                VendorProfile::new("datacom", TimingBased, ["show running-config | nomore"]),
            ),
        ];
        for (vendor, profile) in builtins {
            registry.profiles.insert(vendor.to_string(), profile);
        }

        for (alias, target) in [
            ("huawei-rt", "generic-router"),
            ("huawei-olt", "optical-line-terminal"),
            ("huawei-sw", "layer2-switch"),
            ("mikrotik", "router-os"),
            ("cisco", "ios-like"),
            ("datacom", "datacom-like"),
        ] {
            registry.aliases.insert(alias.to_string(), target.to_string());
        }

        registry
    }

    /// Adds or replaces a profile. A profile registered under an alias name
    /// shadows the alias.
    pub fn insert(&mut self, vendor: &str, profile: VendorProfile) -> Result<(), ProfileError> {
        let key = canonical(vendor);
        profile.validate(&key)?;
        self.aliases.remove(&key);
        self.profiles.insert(key, profile);
        Ok(())
    }

    pub fn alias(&mut self, alias: &str, target: &str) {
        self.aliases.insert(canonical(alias), canonical(target));
    }

    /// Builtins overlaid with `extra`, validating every extra profile.
    pub fn with_overrides<'a>(
        extra: impl IntoIterator<Item = (&'a String, &'a VendorProfile)>,
    ) -> Result<Self, ProfileError> {
        let mut registry = Self::builtin();
        for (vendor, profile) in extra {
            registry.insert(vendor, profile.clone())?;
        }
        Ok(registry)
    }

    pub fn lookup(&self, vendor: &str) -> Result<&VendorProfile, BackupError> {
        let key = canonical(vendor);
        let resolved = self.aliases.get(&key).unwrap_or(&key);
        self.profiles
            .get(resolved)
            .ok_or_else(|| BackupError::UnknownVendor(vendor.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &VendorProfile)> {
        self.profiles.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn aliases(&self) -> impl Iterator<Item = (&str, &str)> {
        self.aliases.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}
