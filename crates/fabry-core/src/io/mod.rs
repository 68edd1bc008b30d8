pub mod cube_file;
pub mod image_io;

pub use cube_file::{read_cube, write_cube, write_map, CubeFile, CubeWriter, FpcHeader};
pub use image_io::save_preview;
