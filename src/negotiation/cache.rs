//! Confirmed protocol variants.
//!
//! One entry per command family, written only after the backend accepted a
//! command in that variant. The cache is an explicit object owned by the
//! link, so tests and callers can inspect and reset it.

// ============================================================================
// Imports
// ============================================================================

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::protocol::{CommandFamily, ProtocolVariant};

// ============================================================================
// VariantCache
// ============================================================================

/// Command family → last variant the backend accepted.
#[derive(Debug, Default)]
pub struct VariantCache {
    confirmed: RwLock<FxHashMap<CommandFamily, ProtocolVariant>>,
}

impl VariantCache {
    /// Creates an empty cache.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the confirmed variant for `family`.
    #[inline]
    #[must_use]
    pub fn get(&self, family: CommandFamily) -> Option<ProtocolVariant> {
        self.confirmed.read().get(&family).copied()
    }

    /// Records an accepted variant, returning the one it replaced.
    pub fn confirm(
        &self,
        family: CommandFamily,
        variant: ProtocolVariant,
    ) -> Option<ProtocolVariant> {
        let previous = self.confirmed.write().insert(family, variant);
        if previous != Some(variant) {
            debug!(%family, %variant, ?previous, "Protocol variant confirmed");
        }
        previous
    }

    /// Forgets every confirmed variant.
    pub fn reset(&self) {
        self.confirmed.write().clear();
        debug!("Protocol variant cache reset");
    }

    /// Number of families with a confirmed variant.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.confirmed.read().len()
    }

    /// Returns `true` if nothing is confirmed.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of all entries, in [`CommandFamily::ALL`] order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(CommandFamily, ProtocolVariant)> {
        let confirmed = self.confirmed.read();
        CommandFamily::ALL
            .iter()
            .filter_map(|family| confirmed.get(family).map(|v| (*family, *v)))
            .collect()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confirm_and_overwrite() {
        let cache = VariantCache::new();
        assert!(cache.get(CommandFamily::Lift).is_none());

        assert_eq!(cache.confirm(CommandFamily::Lift, ProtocolVariant::TaskArgs), None);
        assert_eq!(
            cache.confirm(CommandFamily::Lift, ProtocolVariant::Structured),
            Some(ProtocolVariant::TaskArgs)
        );
        assert_eq!(cache.get(CommandFamily::Lift), Some(ProtocolVariant::Structured));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_families_are_independent() {
        let cache = VariantCache::new();
        cache.confirm(CommandFamily::Stop, ProtocolVariant::TaskArgs);
        cache.confirm(CommandFamily::Move, ProtocolVariant::Structured);

        assert_eq!(
            cache.snapshot(),
            vec![
                (CommandFamily::Move, ProtocolVariant::Structured),
                (CommandFamily::Stop, ProtocolVariant::TaskArgs),
            ]
        );
    }

    #[test]
    fn test_reset() {
        let cache = VariantCache::new();
        cache.confirm(CommandFamily::Mode, ProtocolVariant::TaskOnly);
        cache.reset();
        assert!(cache.is_empty());
    }
}
