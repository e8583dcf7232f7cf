//! Workflow validation, planning and execution engine for Weft.
//!
//! Depends only on `weft-types` plus async/runtime crates; skills are
//! supplied by the caller through a [`skill::SkillRegistry`].

pub mod event;
pub mod skill;
pub mod workflow;
