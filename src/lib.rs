//! Bumps the ClickOnce version stored in Visual Studio project files.
//!
//! [`version`] computes the new `Major.Minor.Build.Revision` for a block,
//! [`project`] finds the ClickOnce `<PropertyGroup>`s of a project file and
//! rewrites them in place.

pub mod arguments;
pub mod project;
pub mod version;
