use std::path::Path;

use utpc_stack_core::MapConfig;

/// Reads a `.env` file into an explicit configuration map without touching
/// the process environment.
pub fn load_dotenv(path: &Path) -> Result<MapConfig, dotenvy::Error> {
    let mut config = MapConfig::new();
    for item in dotenvy::from_path_iter(path)? {
        let (key, value) = item?;
        config.insert(key, value);
    }
    Ok(config)
}
