pub mod file;
pub mod text;
pub mod time;

pub use file::{list_files_with_extension, FileEntry};
pub use text::sanitize_file_stem;
pub use time::{batch_date_label, current_human_timestamp};
