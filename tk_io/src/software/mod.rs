//! Third-party software owned by add-ons.
//!
//! [`SoftwareQuery`] reads the `software` and `executables` tables for any
//! owner. [`SoftwareRegistry`] is bound to a single add-on and performs the
//! writes, keeping rows and `<root>/software/<owner>/<name>` folders in step.

mod query;
mod registry;

pub use query::SoftwareQuery;
pub use registry::SoftwareRegistry;
