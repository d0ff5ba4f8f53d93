//! Multipart form data part.

/// One part extracted from a `multipart/form-data` body.
///
/// Built up incrementally by the multipart parser and committed into the
/// request once its terminating boundary is seen. `filename` and
/// `content_type` are empty when the part did not declare them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultipartFile {
    /// Field name from `Content-Disposition`.
    pub name: String,
    /// Original file name from `Content-Disposition`, empty for plain fields.
    pub filename: String,
    /// Declared `Content-Type` of the part, empty when absent.
    pub content_type: String,
    /// Raw content bytes.
    pub content: Vec<u8>,
}

impl MultipartFile {
    /// True when the part carried a filename, i.e. is a file upload rather
    /// than a plain form field.
    #[must_use]
    pub fn is_file(&self) -> bool {
        !self.filename.is_empty()
    }

    /// Reset all fields so the accumulator can take the next part.
    pub fn clear(&mut self) {
        self.name.clear();
        self.filename.clear();
        self.content_type.clear();
        self.content.clear();
    }
}
