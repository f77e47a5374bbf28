pub mod pages;
pub mod traits;
