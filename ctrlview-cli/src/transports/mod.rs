mod fake;

pub use fake::{FakeController, spawn_activity};
