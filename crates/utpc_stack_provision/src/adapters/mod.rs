pub mod assets;
pub mod control_plane;
pub mod dotenv;
pub mod memory;
pub mod state_file;
