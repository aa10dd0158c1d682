//! The received-data view: raw bytes as they arrived, rendered as text or
//! hex on demand.
//!
//! The view is not capped: it keeps every byte received until
//! [`ReceiveView::clear`], and holds both the raw bytes and their rendering.
//! A long-running session should clear or save it periodically.

use std::fs;
use std::path::Path;

use crate::codec::{self, TextEncoding};
use crate::error::FileIoError;

#[derive(Debug, Default)]
pub struct ReceiveView {
    raw: Vec<u8>,
    rendered: String,
    hex_mode: bool,
    encoding: TextEncoding,
}

impl ReceiveView {
    pub fn new(encoding: TextEncoding, hex_mode: bool) -> Self {
        Self {
            encoding,
            hex_mode,
            ..Self::default()
        }
    }

    /// Adds one received chunk to the view.
    pub fn append(&mut self, chunk: &[u8]) {
        self.raw.extend_from_slice(chunk);
        let text = self.render_chunk(chunk);
        self.rendered.push_str(&text);
    }

    fn render_chunk(&self, chunk: &[u8]) -> String {
        if self.hex_mode {
            // Trailing space keeps pairs separated across chunk boundaries.
            let mut text = codec::to_hex_display(chunk);
            text.push(' ');
            text
        } else {
            codec::decode_text(chunk, self.encoding)
        }
    }

    fn rerender(&mut self) {
        self.rendered = if self.raw.is_empty() {
            String::new()
        } else {
            self.render_chunk(&self.raw)
        };
    }

    pub fn hex_mode(&self) -> bool {
        self.hex_mode
    }

    /// Switches between hex and text rendering of everything received so
    /// far.
    pub fn set_hex_mode(&mut self, hex_mode: bool) {
        if self.hex_mode != hex_mode {
            self.hex_mode = hex_mode;
            self.rerender();
        }
    }

    pub fn encoding(&self) -> TextEncoding {
        self.encoding
    }

    /// Changes the encoding used for text rendering from now on.
    pub fn set_encoding(&mut self, encoding: TextEncoding) {
        self.encoding = encoding;
    }

    pub fn text(&self) -> &str {
        &self.rendered
    }

    pub fn bytes(&self) -> &[u8] {
        &self.raw
    }

    pub fn clear(&mut self) {
        self.raw.clear();
        self.rendered.clear();
    }

    /// Writes the rendered view to `path` as UTF-8.
    pub fn save(&self, path: &Path) -> Result<(), FileIoError> {
        fs::write(path, self.rendered.as_bytes()).map_err(|source| FileIoError::Save {
            path: path.to_path_buf(),
            source,
        })?;
        log::info!("Saved received data to {}", path.display());
        Ok(())
    }
}
