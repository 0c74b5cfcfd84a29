//! # sehub-softether
//!
//! SoftEther VPN hub integration driven through the `vpncmd` management tool.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | **types** | Errors, retry policy, invocations, typed hub records |
//! | **exec** | `vpncmd` subprocess runner, advisory lock, failure classification |
//! | **broker** | Process-wide FIFO queue serializing every `vpncmd` call |
//! | **parser** | Vertical and tabular output parsing into typed records |
//! | **inventory** | Short-TTL single-flight cache for accounts, sessions, rules |
//! | **access** | Pair access policy rules and rule clearing |
//! | **service** | Top-level service for account, session, and rule operations |

pub mod softether;
