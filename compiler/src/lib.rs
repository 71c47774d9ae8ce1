// rpcc — Raster Pipeline Compiler Collection
//
// Library root. The bounds-lowering pass and its supporting IR live here.

pub mod bounds;
pub mod bundle;
pub mod diag;
pub mod expr;
pub mod fuse;
pub mod inject;
pub mod interval;
pub mod region;
pub mod stage;
pub mod stmt;
pub mod target;
