mod mkdir;
mod mount;
mod path;
mod rmdir;

pub use mkdir::*;
pub use mount::*;
pub use path::*;
pub use rmdir::*;
