//! Image file format for register VM programs.
//!
//! The text format is a list of signed decimal cells:
//! - Cells separated by whitespace, any number per line
//! - `;` starts a comment running to the end of the line
//! - Blank lines are ignored
//!
//! Files ending in `.json` hold `{"cells": [...]}` instead.

use std::path::Path;
use serde::{Serialize, Deserialize};
use thiserror::Error;

/// A loaded memory image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageFile {
    /// Cells to place at address 0.
    pub cells: Vec<i64>,
}

impl ImageFile {
    /// Wrap a cell vector.
    pub fn new(cells: Vec<i64>) -> Self {
        Self { cells }
    }

    /// Get the number of cells.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Parse the text format.
    pub fn parse_text(text: &str) -> Result<Self, ImageError> {
        let mut cells = Vec::new();

        for (line_num, line) in text.lines().enumerate() {
            let line = match line.find(';') {
                Some(idx) => &line[..idx],
                None => line,
            };

            for word in line.split_whitespace() {
                let cell = word.parse::<i64>().map_err(|e| ImageError::ParseError {
                    line: line_num + 1,
                    message: format!("'{}': {}", word, e),
                })?;
                cells.push(cell);
            }
        }

        Ok(Self { cells })
    }

    /// Render the text format, one cell per line with its address.
    pub fn to_text(&self) -> String {
        let mut text = String::new();
        text.push_str("; register VM image\n");
        text.push_str(&format!("; {} cells\n\n", self.len()));

        for (addr, cell) in self.cells.iter().enumerate() {
            text.push_str(&format!("{} ; {:04}\n", cell, addr));
        }

        text
    }

    /// Parse the JSON format.
    pub fn from_json(text: &str) -> Result<Self, ImageError> {
        serde_json::from_str(text).map_err(|e| ImageError::Json(e.to_string()))
    }

    /// Render the JSON format.
    pub fn to_json(&self) -> Result<String, ImageError> {
        serde_json::to_string(self).map_err(|e| ImageError::Json(e.to_string()))
    }
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}

/// Load an image file from disk.
pub fn load_image<P: AsRef<Path>>(path: P) -> Result<ImageFile, ImageError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .map_err(|e| ImageError::IoError(format!("{}: {}", path.display(), e)))?;

    if is_json(path) {
        ImageFile::from_json(&text)
    } else {
        ImageFile::parse_text(&text)
    }
}

/// Save an image file to disk.
pub fn save_image<P: AsRef<Path>>(path: P, image: &ImageFile) -> Result<(), ImageError> {
    let path = path.as_ref();
    let text = if is_json(path) { image.to_json()? } else { image.to_text() };

    std::fs::write(path, text)
        .map_err(|e| ImageError::IoError(format!("{}: {}", path.display(), e)))
}

/// Errors that can occur during image file operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImageError {
    #[error("I/O error: {0}")]
    IoError(String),

    #[error("parse error on line {line}: {message}")]
    ParseError { line: usize, message: String },

    #[error("JSON error: {0}")]
    Json(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("regvm-{}-{}", std::process::id(), name))
    }

    #[test]
    fn test_parse_text() {
        let text = "; header\n6 1 7   ; LII R1A 7\n\n31\n-5 0x";
        let err = ImageFile::parse_text(text).unwrap_err();
        assert!(matches!(err, ImageError::ParseError { line: 5, .. }));

        let image = ImageFile::parse_text("; header\n6 1 7 ; LII\n\n31\n-5").unwrap();
        assert_eq!(image.cells, vec![6, 1, 7, 31, -5]);
    }

    #[test]
    fn test_text_output_parses_back() {
        let image = ImageFile::new(vec![6, 0, 1, i64::MIN, 31]);
        assert_eq!(ImageFile::parse_text(&image.to_text()).unwrap(), image);
    }

    #[test]
    fn test_json_format() {
        let image = ImageFile::from_json(r#"{"cells": [20, -1]}"#).unwrap();
        assert_eq!(image.cells, vec![20, -1]);
        assert!(matches!(ImageFile::from_json("[1, 2]"), Err(ImageError::Json(_))));
    }

    #[test]
    fn test_save_and_load() {
        let image = ImageFile::new(vec![6, 1, 42, 30, 31]);

        for name in ["prog.img", "prog.json"] {
            let path = temp_path(name);
            save_image(&path, &image).unwrap();
            assert_eq!(load_image(&path).unwrap(), image);
            std::fs::remove_file(&path).unwrap();
        }

        assert!(matches!(load_image(temp_path("missing.img")), Err(ImageError::IoError(_))));
    }
}
