//! desktop-bundle: packages scenario services into self-contained desktop
//! bundles and runs untrusted subprocesses under the best available sandbox.
//!
//! - [`bundle`] stages services, assets, runtime binaries and CLI helpers
//!   into `<app>/bundle` and updates the app's `package.json`
//! - [`containment`] selects Docker, Bubblewrap or a no-isolation fallback
//!   and decides when running without a sandbox is acceptable

pub mod bundle;
pub mod config;
pub mod containment;
pub mod paths;
pub mod process;

pub use config::Config;
