use std::io::{self, Write};

use anyhow::Result;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use crossterm::{
    cursor,
    style::Print,
    terminal::{Clear, ClearType},
};

mod input;
mod layout;
mod payload;

pub use input::{page_entry_target, EventMapper, InputMode, SwipeTracker, UiEvent};
pub use layout::{fit_image, Pane, SpreadLayout, Viewport};
pub use payload::{decode_payload, DecodeError, PageImage};

const CHUNK_SIZE: usize = 4096;

pub struct KittyRenderer<W: Write> {
    writer: W,
}

impl<W: Write> KittyRenderer<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn writer(&mut self) -> &mut W {
        &mut self.writer
    }

    /// Transmits and places `image` inside `pane`. Reusing `image_id`
    /// replaces whatever that id showed before.
    pub fn draw(&mut self, image_id: u32, image: &PageImage, pane: Pane) -> Result<()> {
        crossterm::queue!(&mut self.writer, cursor::MoveTo(pane.column, pane.row))?;

        let encoded = BASE64.encode(&image.png);
        let mut chunks = encoded.as_bytes().chunks(CHUNK_SIZE).peekable();
        let mut first = true;

        while let Some(chunk) = chunks.next() {
            let more = chunks.peek().is_some();
            if first {
                write!(
                    self.writer,
                    "\u{1b}_Ga=T,f=100,C=1,q=2,i={},p=1,c={},r={},z=-1,m={}",
                    image_id,
                    pane.columns.max(1),
                    pane.rows.max(1),
                    if more { 1 } else { 0 }
                )?;
                first = false;
            } else {
                write!(self.writer, "\u{1b}_Gm={},q=2", if more { 1 } else { 0 })?;
            }
            if !chunk.is_empty() {
                self.writer.write_all(b";")?;
                self.writer.write_all(chunk)?;
            }
            write!(self.writer, "\u{1b}\\")?;
        }

        self.writer.flush()?;
        Ok(())
    }

    /// Writes `text` centred in `pane`, for pages that have no image.
    pub fn draw_placeholder(&mut self, pane: Pane, text: &str) -> Result<()> {
        let width = text.chars().count().min(usize::from(pane.columns));
        let column = pane.column + (pane.columns - width as u16) / 2;
        let row = pane.row + pane.rows / 2;
        let label: String = text.chars().take(width).collect();
        crossterm::queue!(&mut self.writer, cursor::MoveTo(column, row), Print(label))?;
        self.writer.flush()?;
        Ok(())
    }

    /// Removes every image placement and frees the image data.
    pub fn delete_images(&mut self) -> Result<()> {
        write!(self.writer, "\u{1b}_Ga=d,d=A,q=2\u{1b}\\")?;
        Ok(())
    }

    pub fn begin_sync_update(&mut self) -> Result<()> {
        write!(self.writer, "\u{1b}[?2026h")?;
        Ok(())
    }

    /// Disables synchronized updates.
    /// The terminal will render all buffered changes at once.
    pub fn end_sync_update(&mut self) -> Result<()> {
        write!(self.writer, "\u{1b}[?2026l")?;
        self.writer.flush()?;
        Ok(())
    }

    /// Clears the entire screen.
    pub fn clear_all(&mut self) -> Result<()> {
        crossterm::execute!(
            &mut self.writer,
            Clear(ClearType::All),
            cursor::MoveTo(0, 0)
        )?;
        Ok(())
    }
}

pub fn write_status_line<W: Write>(writer: &mut W, label: &str) -> io::Result<()> {
    write!(writer, "{}", label)?;
    writer.flush()
}
