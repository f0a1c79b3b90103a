pub mod header;
pub mod utils;

pub use header::draw_header;
pub use utils::{ensure_valid_selection, status_color, truncate};
