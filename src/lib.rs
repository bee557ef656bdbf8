//! Release-preparation pipeline for official Alpine Linux Docker images.
//!
//! Fetches a release branch's minirootfs tarballs through a throwaway
//! helper container, verifies every file against a SHA-512 manifest,
//! optionally smoke-tests one architecture's generated Dockerfile, and
//! promotes the verified output into the permanent version-keyed tree the
//! image-build CI consumes.
//!
//! # Architecture
//!
//! ```text
//! prepare-branch <cmd>
//!     │
//!     ├── runtime    - container runtime discovery (docker, podman)
//!     ├── preflight  - batch validation of required host tools
//!     ├── fetch      - helper image build + run, scratch dir bind-mounted
//!     ├── verify     - manifest-driven SHA-512 integrity check
//!     ├── testsuite  - conditional bats smoke tests, temp image cleanup
//!     ├── organize   - promotion into <major.minor>/<arch>/Dockerfile
//!     └── pipeline   - stage sequencing, repo lock, scratch ownership
//! ```
//!
//! Data flows strictly one direction, fetch to verify to test to organize.
//! Nothing persists between invocations; the scratch directory is owned by
//! a guard that removes it on every exit path until `prepare` hands it to
//! the user for a later `organize`.

pub mod errors;
pub mod fetch;
pub mod organize;
pub mod pipeline;
pub mod preflight;
pub mod runtime;
pub mod scratch;
pub mod testsuite;
pub mod verify;

pub use organize::{organize as organize_dir, ROLLING_CHANNEL};
pub use pipeline::{prepare, DEFAULT_BRANCH};
pub use runtime::{detect_runtime, ContainerRuntime};
pub use scratch::ScratchDir;
pub use verify::verify_dir;
