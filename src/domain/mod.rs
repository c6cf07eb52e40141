// Domain layer - Pure models and the grid layout algorithm
pub mod dashboard;
pub mod error;
pub mod fetch_state;
pub mod ids;
pub mod layout;
pub mod visual;
pub mod widget;
pub mod widget_set;
