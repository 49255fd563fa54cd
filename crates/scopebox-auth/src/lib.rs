//! Capability primitives for scopebox.
//!
//! Snippets never hold ambient authority. Each resource access must be
//! covered by a [`CapabilityGrant`] that lives on the call's [`ScopeStack`]:
//!
//! ```text
//! Effective access = live grant of the right kind (WHAT) ∩ grant scope (WHERE)
//! ```
//!
//! | Type | Controls |
//! |------|----------|
//! | [`GrantKind`] / [`GrantScope`] | what a grant covers |
//! | [`ScopeStack`] | which grants are live right now |
//! | [`SandboxPolicy`] / [`RootSandbox`] | path resolution for file-system grants |
//! | [`GrantError`] | missing grant vs. out-of-scope resource |
//!
//! # Crate Architecture
//!
//! ```text
//! scopebox-auth  ◄── THIS CRATE (grants, stack, sandbox)
//!      ↑
//! scopebox-lua   (validator, capability API, engine, sessions)
//!      ↑
//! scopebox-cli   (MCP server, config, execution log)
//! ```

pub mod error;
pub mod grant;
pub mod resource;
pub mod sandbox;
pub mod scope;

pub use error::GrantError;
pub use grant::{CapabilityGrant, FrameId, GrantKind, GrantScope};
pub use resource::{SandboxError, SandboxPolicy};
pub use sandbox::RootSandbox;
pub use scope::ScopeStack;
