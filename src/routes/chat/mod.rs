mod create;

pub use create::*;
