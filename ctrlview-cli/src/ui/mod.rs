pub mod theme;
pub mod timeline;

pub use theme::styles;
