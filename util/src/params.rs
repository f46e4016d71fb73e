//! Generic parameters functions

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::de::DeserializeOwned;
use std::fs::read_to_string;
use std::path::{Path, PathBuf};
use thiserror::Error;
use toml;

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// An error that occurs during loading of a parameter file.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("The software root environment variable ({}) is not set", crate::session::SW_ROOT_ENV)]
    SwRootNotSet,

    #[error("Cannot load the parameter file {0:?}: {1}")]
    FileLoadError(PathBuf, std::io::Error),

    #[error("Cannot parse the parameter file {0:?}: {1}")]
    DeserialiseError(PathBuf, toml::de::Error)
}

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Directory under the software root holding the parameter files
const PARAMS_DIR: &str = "params";

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Load a parameter file
///
/// The file path is relative to the "$THUNDER_SW_ROOT/params" directory
pub fn load<P>(param_file_path: &str) -> Result<P, LoadError>
where
    P: DeserializeOwned
{
    let root = crate::session::get_sw_root().ok_or(LoadError::SwRootNotSet)?;

    load_from_path(root.join(PARAMS_DIR).join(param_file_path))
}

/// Load a parameter file from an explicit path.
pub fn load_from_path<P, A>(path: A) -> Result<P, LoadError>
where
    P: DeserializeOwned,
    A: AsRef<Path>
{
    let path = path.as_ref();

    let params_str = read_to_string(path)
        .map_err(|e| LoadError::FileLoadError(path.to_path_buf(), e))?;

    toml::from_str(&params_str)
        .map_err(|e| LoadError::DeserialiseError(path.to_path_buf(), e))
}
