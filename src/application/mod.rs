// Application layer - Use cases, boundary traits and per-widget orchestration
pub mod dashboard_controller;
pub mod dashboard_repository;
pub mod data_fetcher;
pub mod notifier;
pub mod preset_loader;
pub mod renderers;
pub mod widget_data_source;
pub mod widget_registry;
