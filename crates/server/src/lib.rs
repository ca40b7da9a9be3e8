//! Process wiring for the batch service.

pub mod app;
