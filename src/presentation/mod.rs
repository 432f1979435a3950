//! Presentation layer: askama view models and template bindings.

pub mod views;
