//! Desktop bundle packager.
//!
//! [`Packager::package`] validates a manifest, stages every service binary
//! and asset for each requested platform, compiles services that ship no
//! prebuilt binary, stages CLI helpers, builds the runtime companions and
//! finally wires the bundle into the application's `package.json`.
//!
//! ```text
//! <app>/bundle/
//! ├─ bundle.json
//! ├─ <service binaries and assets>
//! ├─ bin/vrooli            (non-Windows targets)
//! └─ runtime/<platform>/runtime[.exe], runtimectl[.exe]
//! ```

pub mod cli_stager;
pub mod compiler;
pub mod descriptor;
pub mod error;
pub mod fsops;
pub mod manifest;
pub mod packager;
pub mod platform;
pub mod runtime;
pub mod size;

pub use error::{PackageError, PackageErrorKind, Result};
pub use manifest::{Asset, Binary, BuildConfig, Manifest, Service, load_manifest};
pub use packager::{PackageRequest, PackageResponse, PackageResult, Packager};
pub use platform::{Arch, Os, Platform, PlatformError, parse_key};
pub use runtime::RuntimeResolver;
pub use size::{SizeWarning, SizeWarningLevel};
