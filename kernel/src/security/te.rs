//! Type enforcement
//!
//! A bounded rule base mapping `(source domain, target domain, class)` to an
//! allowed access vector. Anything without a matching rule is denied.

use alloc::vec::Vec;

use spin::RwLock;

use crate::error::{KernelResult, MacError};

use super::audit::{self, AuditKind};
use super::avc::{Avc, AvcEntry};
use super::context::{AccessVector, Name32, ObjectClass};

/// Maximum number of type-enforcement rules.
pub const MAX_TE_RULES: usize = 1024;

/// One allow rule.
#[derive(Debug, Clone, Copy)]
pub struct TeRule {
    /// Source (subject) domain.
    pub source: Name32,
    /// Target (object) domain.
    pub target: Name32,
    /// Object class the rule applies to.
    pub class: ObjectClass,
    /// Access vector the rule allows.
    pub allowed: AccessVector,
}

/// The rule base plus its access vector cache.
pub struct TypeEnforcement {
    rules: RwLock<Vec<TeRule>>,
    avc: Avc,
}

impl TypeEnforcement {
    /// An empty (deny-everything) rule base.
    pub const fn new() -> Self {
        Self {
            rules: RwLock::new(Vec::new()),
            avc: Avc::new(),
        }
    }

    /// Install a rule. Fails with `TooManyRules` once the base is full.
    pub fn add_rule(&self, rule: TeRule) -> KernelResult<()> {
        let mut rules = self.rules.write();
        if rules.len() >= MAX_TE_RULES {
            return Err(MacError::TooManyRules.into());
        }
        rules.push(rule);
        self.avc.flush();
        Ok(())
    }

    /// Number of installed rules.
    pub fn rule_count(&self) -> usize {
        self.rules.read().len()
    }

    /// Decide whether `source` may perform `requested` on `target` of
    /// `class`. Default-deny: absent a matching rule, or if the rule's
    /// vector does not cover every requested bit, the access is refused and
    /// audited.
    pub fn check_access(
        &self,
        source: Name32,
        target: Name32,
        class: ObjectClass,
        requested: AccessVector,
    ) -> bool {
        let allowed = match self.avc.lookup(source, target, class) {
            Some(allowed) => Some(allowed),
            None => {
                let rules = self.rules.read();
                let found = rules
                    .iter()
                    .find(|r| r.source == source && r.target == target && r.class == class)
                    .map(|r| r.allowed);
                if let Some(allowed) = found {
                    self.avc.insert(AvcEntry {
                        source,
                        target,
                        class,
                        allowed,
                    });
                }
                found
            }
        };

        let granted = matches!(allowed, Some(a) if a.contains(requested));
        if !granted {
            audit::record(AuditKind::MacDenial, requested.bits() as i64, 0);
        }
        granted
    }

    /// (hits, misses) of the embedded cache.
    pub fn avc_stats(&self) -> (u64, u64) {
        self.avc.stats()
    }
}

impl Default for TypeEnforcement {
    fn default() -> Self {
        Self::new()
    }
}
