use once_cell::sync::OnceCell;

static PARTFILE_EXTENSION: OnceCell<String> = OnceCell::new();

/// Fallback extension when bootstrap never ran (tests, embedded use).
const DEFAULT_PARTFILE_EXTENSION: &str = ".part";

/// Fix the process-wide partfile extension. Single-writer: the first call
/// wins and later calls report failure. Bootstrap calls this once from the
/// loaded settings, before the session exists.
///
/// # Errors
///
/// Returns the rejected value when the extension was already set.
pub fn set_partfile_extension(extension: impl Into<String>) -> Result<(), String> {
    PARTFILE_EXTENSION.set(extension.into())
}

/// The process-wide partfile extension.
#[must_use]
pub fn partfile_extension() -> &'static str {
    PARTFILE_EXTENSION
        .get()
        .map_or(DEFAULT_PARTFILE_EXTENSION, String::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_writer_wins() {
        // Shared process state: exercise default-or-set in one test body.
        let before = partfile_extension();
        assert!(!before.is_empty());
        let _ = set_partfile_extension(".incomplete");
        let after = partfile_extension();
        assert!(after == before || after == ".incomplete");
        assert!(set_partfile_extension(".other").is_err());
    }
}
