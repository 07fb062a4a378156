//! Sample namespace used by the demo binary and the tests.

pub mod dish;

pub use dish::{Dish, DishLoader};
