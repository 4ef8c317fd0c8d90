//! Output display handling
//!
//! Display enumeration is owned by the embedding application; this module names the
//! displays it reports and picks the one the output surface goes to.

mod display;

pub use display::{
    describe_displays, find_display, pick_output_display, DisplayBounds, DisplayInfo, RawDisplay,
};
