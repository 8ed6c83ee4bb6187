//! Dictionary loading utilities.

use crate::core::OCRError;
use std::path::Path;

/// Reads an engine character dictionary: line `i` names CTC class `i + 1`.
///
/// Blank lines are kept so that indices stay aligned.
pub fn read_character_dict(path: &Path) -> Result<Vec<String>, OCRError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        OCRError::invalid_input(format!(
            "cannot read character dictionary '{}': {}",
            path.display(),
            e
        ))
    })?;
    Ok(content.lines().map(str::to_string).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_read_character_dict() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "一").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "三").unwrap();

        let dict = read_character_dict(file.path()).unwrap();
        assert_eq!(dict, vec!["一", "", "三"]);
    }

    #[test]
    fn test_read_character_dict_crlf() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "甲\r\n乙\r\n").unwrap();
        assert_eq!(read_character_dict(file.path()).unwrap(), vec!["甲", "乙"]);
    }

    #[test]
    fn test_read_character_dict_missing() {
        assert!(read_character_dict(Path::new("/nonexistent/keys.txt")).is_err());
    }
}
