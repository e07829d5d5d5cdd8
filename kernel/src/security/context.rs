//! Security contexts and access vectors

use bitflags::bitflags;

use crate::error::{KernelResult, MacError};

/// Length of the fixed string fields in a [`SecurityContext`].
pub const CONTEXT_FIELD_LEN: usize = 32;

/// A fixed-capacity, NUL-padded name field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Name32 {
    bytes: [u8; CONTEXT_FIELD_LEN],
    len: u8,
}

impl Name32 {
    /// An empty name.
    pub const fn empty() -> Self {
        Self {
            bytes: [0; CONTEXT_FIELD_LEN],
            len: 0,
        }
    }

    /// Build from a string; fails with `NameTooLong` past the field size.
    pub fn new(s: &str) -> KernelResult<Self> {
        if s.len() > CONTEXT_FIELD_LEN {
            return Err(MacError::NameTooLong.into());
        }
        let mut bytes = [0; CONTEXT_FIELD_LEN];
        bytes[..s.len()].copy_from_slice(s.as_bytes());
        Ok(Self {
            bytes,
            len: s.len() as u8,
        })
    }

    /// The name as a string slice.
    pub fn as_str(&self) -> &str {
        core::str::from_utf8(&self.bytes[..self.len as usize]).unwrap_or("")
    }
}

bitflags! {
    /// Packed access-vector bits checked by type enforcement.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AccessVector: u32 {
        const READ        = 1 << 0;
        const WRITE       = 1 << 1;
        const EXECUTE     = 1 << 2;
        const APPEND      = 1 << 3;
        const CREATE      = 1 << 4;
        const DELETE      = 1 << 5;
        const GETATTR     = 1 << 6;
        const SETATTR     = 1 << 7;
        const LOCK        = 1 << 8;
        const RELABELFROM = 1 << 9;
        const RELABELTO   = 1 << 10;
        const TRANSITION  = 1 << 11;
    }
}

/// Object classes access decisions are keyed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectClass {
    /// Regular file.
    File,
    /// Directory.
    Dir,
    /// Process.
    Process,
    /// Socket.
    Socket,
    /// Capability grant.
    Capability,
}

/// A subject or object label: `user:role:domain` plus MLS level bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecurityContext {
    user: Name32,
    role: Name32,
    domain: Name32,
    /// Sensitivity level.
    pub level: u16,
    /// Category bitmap.
    pub categories: u64,
}

impl SecurityContext {
    /// Build a context from its parts.
    pub fn new(user: &str, role: &str, domain: &str) -> KernelResult<Self> {
        Ok(Self {
            user: Name32::new(user)?,
            role: Name32::new(role)?,
            domain: Name32::new(domain)?,
            level: 0,
            categories: 0,
        })
    }

    /// Parse `user:role:domain[:level]`. The first three colon-separated
    /// fields become the context strings; a fourth numeric field sets the
    /// level.
    pub fn parse(s: &str) -> KernelResult<Self> {
        let mut parts = s.split(':');
        let user = parts.next().unwrap_or("");
        let role = parts.next().unwrap_or("");
        let domain = parts.next().unwrap_or("");
        if user.is_empty() || role.is_empty() || domain.is_empty() {
            return Err(MacError::PermissionDenied.into());
        }
        let mut ctx = Self::new(user, role, domain)?;
        if let Some(level) = parts.next() {
            ctx.level = level.parse().unwrap_or(0);
        }
        Ok(ctx)
    }

    /// The user field.
    pub fn user(&self) -> &str {
        self.user.as_str()
    }

    /// The role field.
    pub fn role(&self) -> &str {
        self.role.as_str()
    }

    /// The domain field; access decisions key on this.
    pub fn domain(&self) -> &str {
        self.domain.as_str()
    }

    /// The domain as its fixed-width storage form.
    pub fn domain_name(&self) -> Name32 {
        self.domain
    }

    /// Whether two contexts belong to the same domain. Matching is
    /// domain-only; user and role do not participate.
    pub fn matches(&self, other: &SecurityContext) -> bool {
        self.domain == other.domain
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::KernelError;

    #[test]
    fn parse_extracts_fields() {
        let ctx = SecurityContext::parse("system_u:object_r:etc_t:3").unwrap();
        assert_eq!(ctx.user(), "system_u");
        assert_eq!(ctx.role(), "object_r");
        assert_eq!(ctx.domain(), "etc_t");
        assert_eq!(ctx.level, 3);
    }

    #[test]
    fn parse_without_level_defaults_to_zero() {
        let ctx = SecurityContext::parse("u:r:user_t").unwrap();
        assert_eq!(ctx.level, 0);
    }

    #[test]
    fn matching_is_domain_only() {
        let a = SecurityContext::parse("alice:staff_r:web_t").unwrap();
        let b = SecurityContext::parse("bob:admin_r:web_t").unwrap();
        let c = SecurityContext::parse("alice:staff_r:db_t").unwrap();
        assert!(a.matches(&b));
        assert!(!a.matches(&c));
    }

    #[test]
    fn oversized_fields_are_rejected() {
        let long = "x".repeat(CONTEXT_FIELD_LEN + 1);
        assert_eq!(
            SecurityContext::new(&long, "r", "d"),
            Err(KernelError::Mac(MacError::NameTooLong))
        );
    }

    #[test]
    fn malformed_context_is_rejected() {
        assert!(SecurityContext::parse("only_user").is_err());
        assert!(SecurityContext::parse("u:r").is_err());
        assert!(SecurityContext::parse("").is_err());
    }
}
