mod file_size;
mod text;

pub use file_size::format_size;
pub use text::truncate_name;
