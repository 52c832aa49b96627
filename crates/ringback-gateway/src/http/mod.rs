pub mod callbacks;
pub mod calls;
pub mod error;
pub mod health;
