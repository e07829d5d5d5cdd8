//! Path-based security profiles
//!
//! Each profile names a confined program and lists `(path, access)` rules;
//! matching is exact-string. In enforce mode an unmatched access is denied;
//! in complain mode it is audited and allowed; disabled profiles allow
//! everything.

use alloc::string::String;
use alloc::vec::Vec;

use spin::RwLock;

use crate::error::{KernelResult, MacError};

use super::audit::{self, AuditKind};
use super::context::{AccessVector, Name32};

/// Maximum rules per profile.
pub const MAX_PROFILE_RULES: usize = 128;

/// Length bound of a profile description.
pub const MAX_PROFILE_DESCRIPTION: usize = 64;

/// Enforcement mode of a profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileMode {
    /// Deny unmatched accesses.
    Enforce,
    /// Audit unmatched accesses but allow them.
    Complain,
    /// Profile is inert.
    Disabled,
}

/// One `(path, access)` rule.
#[derive(Debug, Clone)]
pub struct ProfileRule {
    /// Exact path the rule covers.
    pub path: String,
    /// Access vector the rule allows.
    pub access: AccessVector,
}

/// A named profile with a bounded rule list.
pub struct Profile {
    /// Profile name (the confined program).
    pub name: Name32,
    mode: ProfileMode,
    description: String,
    rules: Vec<ProfileRule>,
}

impl Profile {
    /// Create a profile in the given mode.
    pub fn new(name: &str, mode: ProfileMode) -> KernelResult<Self> {
        Ok(Self {
            name: Name32::new(name)?,
            mode,
            description: String::new(),
            rules: Vec::new(),
        })
    }

    /// Attach a human-readable description.
    pub fn set_description(&mut self, description: &str) -> KernelResult<()> {
        if description.len() > MAX_PROFILE_DESCRIPTION {
            return Err(MacError::DescriptionTooLong.into());
        }
        self.description = String::from(description);
        Ok(())
    }

    /// The description, if set.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Current mode.
    pub fn mode(&self) -> ProfileMode {
        self.mode
    }

    /// Switch enforcement mode.
    pub fn set_mode(&mut self, mode: ProfileMode) {
        self.mode = mode;
    }

    /// Append a rule. Fails with `TooManyRules` at capacity.
    pub fn add_rule(&mut self, path: &str, access: AccessVector) -> KernelResult<()> {
        if self.rules.len() >= MAX_PROFILE_RULES {
            return Err(MacError::TooManyRules.into());
        }
        self.rules.push(ProfileRule {
            path: String::from(path),
            access,
        });
        Ok(())
    }

    /// Decide whether `requested` access to `path` is allowed under this
    /// profile.
    pub fn check_access(&self, path: &str, requested: AccessVector) -> bool {
        if self.mode == ProfileMode::Disabled {
            return true;
        }
        let matched = self
            .rules
            .iter()
            .find(|r| r.path == path)
            .map(|r| r.access.contains(requested))
            .unwrap_or(false);
        if matched {
            return true;
        }
        match self.mode {
            ProfileMode::Enforce => {
                audit::record(AuditKind::MacDenial, requested.bits() as i64, 0);
                false
            }
            ProfileMode::Complain => {
                audit::record(AuditKind::MacComplain, requested.bits() as i64, 0);
                true
            }
            ProfileMode::Disabled => true,
        }
    }
}

/// Registry of loaded profiles.
pub struct ProfileSet {
    profiles: RwLock<Vec<Profile>>,
}

impl ProfileSet {
    /// An empty registry.
    pub const fn new() -> Self {
        Self {
            profiles: RwLock::new(Vec::new()),
        }
    }

    /// Load a profile.
    pub fn load(&self, profile: Profile) {
        self.profiles.write().push(profile);
    }

    /// Number of loaded profiles.
    pub fn count(&self) -> usize {
        self.profiles.read().len()
    }

    /// Check `path`/`requested` against the named profile. Unconfined
    /// programs (no profile) are allowed.
    pub fn check(&self, program: &str, path: &str, requested: AccessVector) -> bool {
        let profiles = self.profiles.read();
        match profiles.iter().find(|p| p.name.as_str() == program) {
            Some(profile) => profile.check_access(path, requested),
            None => true,
        }
    }
}

impl Default for ProfileSet {
    fn default() -> Self {
        Self::new()
    }
}
