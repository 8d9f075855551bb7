pub mod control;
pub mod index;
pub mod status;
