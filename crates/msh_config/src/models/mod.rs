pub mod favicon;
pub mod logging;
pub mod msh;
