//! `foam-external` – the boundary to the external sphere-tree toolchain.
//!
//! The fitting algorithms, manifold reconstruction and simplification are
//! separate executables.  This crate knows how to call them and how to read
//! what they produce; it does not know anything about retries or caching.
//!
//! # Modules
//!
//! - [`tools`] – [`SpherizationMethod`][tools::SpherizationMethod] (one
//!   variant per fitting executable) and [`RepairParams`][tools::RepairParams],
//!   each mapping to a command line.
//! - [`runner`] – [`ToolRunner`][runner::ToolRunner], the process seam, and
//!   its [`ProcessRunner`][runner::ProcessRunner] implementation.
//! - [`invoker`] – [`ToolInvoker`][invoker::ToolInvoker]: fit, probe and
//!   repair a [`TriMesh`][foam_geometry::TriMesh] in a scratch directory.
//! - [`parser`] – reads a `.sph` result file into a
//!   [`SpherizationResult`][foam_types::SpherizationResult].

pub mod invoker;
pub mod parser;
pub mod runner;
pub mod tools;

pub use invoker::{ToolConfig, ToolInvoker};
pub use parser::{parse_result_file, parse_result_str};
pub use runner::{ProcessRunner, ToolOutput, ToolRunner};
pub use tools::{
    GridParams, HubbardParams, MedialParams, OctreeParams, RepairParams, SpawnParams,
    SpherizationMethod, TreeParams,
};
