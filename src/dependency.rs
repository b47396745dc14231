//! Declared dependencies and the per-service dependency registry.

use std::collections::HashMap;

use crate::event::const_fnv1a_hash;
use crate::id::ServiceId;
use crate::properties::Properties;

/// A stable, collision-resistant 64-bit digest of an interface's canonical
/// name, computed the same way everywhere in one build (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InterfaceHash(pub u64);

impl InterfaceHash {
    /// Derive the hash from an interface's canonical name.
    pub const fn of(name: &str) -> Self {
        Self(const_fnv1a_hash(name))
    }
}

/// A declared need for an interface, required or optional.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Dependency {
    pub interface: InterfaceHash,
    pub interface_version: u32,
    pub required: bool,
}

impl Dependency {
    pub const fn required(interface: InterfaceHash, version: u32) -> Self {
        Self {
            interface,
            interface_version: version,
            required: true,
        }
    }

    pub const fn optional(interface: InterfaceHash, version: u32) -> Self {
        Self {
            interface,
            interface_version: version,
            required: false,
        }
    }
}

/// One provider currently injected into a dependency slot, in arrival order.
#[derive(Debug, Clone, Copy)]
struct Injected {
    provider: ServiceId,
}

/// The declared dependency list and currently-injected providers for one
/// service. Fixed at construction: declarations never grow or shrink after
/// the registry is built, per spec §3/§4.2.
#[derive(Debug, Clone)]
pub struct DependencyRegistry {
    declared: Vec<Dependency>,
    injected: HashMap<InterfaceHash, Vec<Injected>>,
}

impl DependencyRegistry {
    pub fn new() -> Self {
        Self {
            declared: Vec::new(),
            injected: HashMap::new(),
        }
    }

    /// Declare one dependency slot. Only meaningful before the owning
    /// service is constructed — the list is fixed afterward.
    pub fn declare(&mut self, interface: InterfaceHash, version: u32, required: bool) {
        self.declared.push(Dependency {
            interface,
            interface_version: version,
            required,
        });
        self.injected.entry(interface).or_default();
    }

    pub fn declared(&self) -> &[Dependency] {
        &self.declared
    }

    /// Offer a provider for `interface`. Returns whether it was accepted:
    /// the service must have declared that interface, and any property
    /// filter on the declaring service's properties must pass the
    /// candidate.
    pub fn offer(
        &mut self,
        interface: InterfaceHash,
        provider: ServiceId,
        provider_properties: &Properties,
        owner_properties: &Properties,
    ) -> bool {
        let declared = self.declared.iter().any(|d| d.interface == interface);
        if !declared {
            return false;
        }

        if let Some(filter) = owner_properties.filter()
            && !filter.matches(provider, provider_properties)
        {
            return false;
        }

        let slot = self.injected.entry(interface).or_default();
        if slot.iter().any(|i| i.provider == provider) {
            return false;
        }
        slot.push(Injected { provider });
        true
    }

    /// Withdraw a provider. Returns whether this withdrawal leaves a
    /// *required* slot empty, which demands the owning service stop.
    pub fn withdraw(&mut self, interface: InterfaceHash, provider: ServiceId) -> bool {
        let Some(slot) = self.injected.get_mut(&interface) else {
            return false;
        };
        slot.retain(|i| i.provider != provider);

        let is_required = self
            .declared
            .iter()
            .any(|d| d.interface == interface && d.required);
        is_required && slot.is_empty()
    }

    /// Providers currently injected for `interface`, in arrival order.
    pub fn providers(&self, interface: InterfaceHash) -> impl Iterator<Item = ServiceId> + '_ {
        self.injected
            .get(&interface)
            .into_iter()
            .flatten()
            .map(|i| i.provider)
    }

    pub fn has_provider(&self, interface: InterfaceHash) -> bool {
        self.injected.get(&interface).is_some_and(|v| !v.is_empty())
    }

    /// A service is satisfied once every required slot has at least one
    /// provider.
    pub fn is_satisfied(&self) -> bool {
        self.declared
            .iter()
            .filter(|d| d.required)
            .all(|d| self.has_provider(d.interface))
    }

    /// The declared interfaces still missing a provider.
    pub fn outstanding_required(&self) -> impl Iterator<Item = InterfaceHash> + '_ {
        self.declared
            .iter()
            .filter(|d| d.required && !self.has_provider(d.interface))
            .map(|d| d.interface)
    }
}

impl Default for DependencyRegistry {
    fn default() -> Self {
        Self::new()
    }
}
