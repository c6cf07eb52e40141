//! Grid dashboard engine for personal and small-business finance views:
//! layout and compaction, a typed widget registry, per-widget data fetching
//! and an optimistic dashboard controller, served over HTTP.
pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod presentation;
