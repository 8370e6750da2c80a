// User interface module
// Handles the terminal user interface

pub mod tui;
pub mod widgets;

pub use tui::Tui;
