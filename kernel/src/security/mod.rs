//! Mandatory access control
//!
//! Security contexts and their parser, the access-vector cache, the
//! type-enforcement rule base (default-deny), path-based profiles, the
//! module-signing verifier, and the security audit log.

pub mod audit;
pub mod avc;
pub mod context;
pub mod module_verify;
pub mod profile;
pub mod te;

pub use avc::Avc;
pub use context::{AccessVector, Name32, ObjectClass, SecurityContext};
pub use module_verify::{ModuleSignature, ModuleVerifier, SigningPolicy};
pub use profile::{Profile, ProfileMode, ProfileSet};
pub use te::TypeEnforcement;
