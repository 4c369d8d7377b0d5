mod body;
mod file_bytes_stream;

pub use self::body::*;
pub use self::file_bytes_stream::*;
