pub mod image_directory_source;
pub mod image_file_writer;
