//! Host platform (linux for example) utility functions

use log::warn;
use std::fs;
use std::path::Path;

/// Read the CPU temperature in degrees C from a thermal zone file.
///
/// Linux reports thermal zones in milli-degrees. `None` is returned if the file can't be read or
/// doesn't hold a number.
pub fn read_cpu_temperature<P: AsRef<Path>>(path: P) -> Option<f64> {
    let contents = match fs::read_to_string(path.as_ref()) {
        Ok(c) => c,
        Err(e) => {
            warn!("Could not open CPU temperature file {:?}: {}", path.as_ref(), e);
            return None
        }
    };

    match contents.trim().parse::<f64>() {
        Ok(milli_c) => Some(milli_c / 1000.0),
        Err(e) => {
            warn!("Could not parse CPU temperature {:?}: {}", contents.trim(), e);
            None
        }
    }
}

/// Read the first line of a text file, without the line ending.
pub fn read_first_line<P: AsRef<Path>>(path: P) -> Option<String> {
    fs::read_to_string(path)
        .ok()
        .and_then(|s| s.lines().next().map(String::from))
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_read_cpu_temperature() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "48500").unwrap();
        assert_eq!(read_cpu_temperature(file.path()), Some(48.5));

        let mut garbage = tempfile::NamedTempFile::new().unwrap();
        writeln!(garbage, "hot").unwrap();
        assert_eq!(read_cpu_temperature(garbage.path()), None);

        assert_eq!(read_cpu_temperature("/no/such/thermal_zone"), None);
    }

    #[test]
    fn test_read_first_line() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "a1b2c3\nsecond line\n").unwrap();
        assert_eq!(read_first_line(file.path()), Some(String::from("a1b2c3")));
        assert_eq!(read_first_line("/no/such/file"), None);
    }
}
