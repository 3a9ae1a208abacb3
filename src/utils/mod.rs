pub mod text;

pub use text::{plural, truncate_with_ellipsis};
