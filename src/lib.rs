// Colorbook library: the coloring engine behind the storybook pages.
// The `colorbook` binary is a thin clap front end over these modules.

#![allow(clippy::type_complexity)]

#[macro_use]
pub mod logger;
pub mod canvas;
pub mod cli;
pub mod components;
pub mod io;
pub mod ops;
pub mod project;
pub mod settings;

pub use canvas::{CanvasSnapshot, DisplayRect, PixelBuffer, PointerEvent};
pub use components::page_canvas::{LoadStatus, LoadTicket, PageCanvas};
pub use ops::flood_fill::{FillOutcome, FillRequest};
pub use project::{Page, PageId, StorySession};
pub use settings::AppSettings;
