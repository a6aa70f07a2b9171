pub mod analyze;
pub mod build;
pub mod diff;
pub mod extract;
pub mod packages;
pub mod patch;
pub mod tools;
pub mod util;
pub mod workspace;

pub use analyze::*;
pub use build::*;
pub use diff::*;
pub use extract::*;
pub use packages::*;
pub use patch::*;
pub use tools::*;
pub use util::*;
pub use workspace::*;
