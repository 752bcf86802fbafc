pub mod cfg;
pub mod chooser;
