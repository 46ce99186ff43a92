// src/graph/mod.rs

//! In-memory stage DAG and the stage naming convention.
//!
//! - [`dag`] holds the graph handed over by a build tool before ingestion.
//! - [`naming`] splits stage names into group path + leaf and derives the
//!   per-stage working directory used when remapping cached outputs.

pub mod dag;
pub mod naming;

pub use dag::{StageGraph, StageNode};
pub use naming::{StageName, split_name, working_dir};
