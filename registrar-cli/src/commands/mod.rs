pub mod check;
pub mod policies;
pub mod render;
