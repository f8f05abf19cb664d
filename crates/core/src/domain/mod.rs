pub mod action;
pub mod event;
pub mod graph;
pub mod person;
