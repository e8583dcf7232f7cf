//! Skill capability trait and the registry the engine resolves skills from.

pub mod registry;

pub use registry::{BoxSkill, FnSkill, Skill, SkillDyn, SkillError, SkillRegistry};
