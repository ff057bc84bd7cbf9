use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;

const HISTORY_FILENAME: &str = ".minisql_history";

/// Location of the history file, or `None` when no home directory can be
/// determined. History is best-effort; callers ignore failures.
pub fn default_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(HISTORY_FILENAME))
}

/// Appends a line to the history file.
///
/// # Errors
/// Returns an `io::Error` if the file cannot be opened or written to.
pub fn append_history(line: &str, path: &PathBuf) -> io::Result<()> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;

    let mut writer = BufWriter::new(file);
    writeln!(writer, "{}", line.trim())?;
    writer.flush()?;
    Ok(())
}

/// Loads the command history from a file. Returns an empty vector if the
/// file cannot be opened or read.
pub fn load_history(path: &PathBuf) -> Vec<String> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(_) => return Vec::new(),
    };

    let reader = BufReader::new(file);
    reader
        .lines()
        .filter_map(|line| {
            line.ok()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_append_and_load_history() {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path().to_path_buf();

        append_history("insert 1 user1 person1@example.com", &path).unwrap();
        append_history("select", &path).unwrap();

        let history = load_history(&path);
        assert_eq!(
            history,
            vec!["insert 1 user1 person1@example.com", "select"]
        );
    }

    #[test]
    fn test_empty_file() {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path().to_path_buf();
        let history = load_history(&path);
        assert!(history.is_empty());
    }

    #[test]
    fn test_nonexistent_file() {
        let path = PathBuf::from("/nonexistent/path/test_history");
        let history = load_history(&path);
        assert!(history.is_empty());
    }
}
