pub mod icons;
pub mod output;
pub mod progress;
pub mod table;

pub use icons::Icons;
pub use output::{error, header, human_bytes, palette, row_fields, section, status, success, Palette};
pub use progress::Spinner;
pub use table::{stats_table, types_table, TableBuilder};
