use crossterm::terminal::WindowSize;

/// Terminal size in cells and, when the terminal reports it, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub columns: u16,
    pub rows: u16,
    pub pixel_width: u16,
    pub pixel_height: u16,
}

impl Viewport {
    fn cell_size(&self) -> Option<(f32, f32)> {
        if self.columns == 0 || self.rows == 0 || self.pixel_width == 0 || self.pixel_height == 0
        {
            return None;
        }
        Some((
            f32::from(self.pixel_width) / f32::from(self.columns),
            f32::from(self.pixel_height) / f32::from(self.rows),
        ))
    }
}

impl From<WindowSize> for Viewport {
    fn from(size: WindowSize) -> Self {
        Self {
            columns: size.columns,
            rows: size.rows,
            pixel_width: size.width,
            pixel_height: size.height,
        }
    }
}

/// A rectangle of cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pane {
    pub column: u16,
    pub row: u16,
    pub columns: u16,
    pub rows: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpreadLayout {
    pub left: Pane,
    pub right: Option<Pane>,
    pub status_row: u16,
}

impl SpreadLayout {
    const GUTTER: u16 = 2;

    /// Splits the screen into two page panes above a one-line status bar.
    /// The left pane keeps its place when there is no right page.
    pub fn compute(viewport: Viewport, with_right: bool) -> Self {
        let columns = viewport.columns.max(1);
        let rows = viewport.rows.saturating_sub(1).max(1);
        let gutter = if columns > Self::GUTTER * 4 {
            Self::GUTTER
        } else {
            0
        };
        let half = (columns.saturating_sub(gutter) / 2).max(1);

        let left = Pane {
            column: 0,
            row: 0,
            columns: half,
            rows,
        };
        let right = with_right.then_some(Pane {
            column: half + gutter,
            ..left
        });
        Self {
            left,
            right,
            status_row: viewport.rows.saturating_sub(1),
        }
    }
}

/// Largest cell rectangle inside `pane` that keeps the image's aspect
/// ratio, centred in the pane. Without pixel metrics a cell is assumed to
/// be twice as tall as it is wide.
pub fn fit_image(pane: Pane, width: u32, height: u32, viewport: &Viewport) -> Pane {
    if width == 0 || height == 0 || pane.columns == 0 || pane.rows == 0 {
        return pane;
    }
    let (cell_width, cell_height) = viewport.cell_size().unwrap_or((1.0, 2.0));
    let image_columns = width as f32 / cell_width;
    let image_rows = height as f32 / cell_height;
    let scale = (f32::from(pane.columns) / image_columns).min(f32::from(pane.rows) / image_rows);
    if !scale.is_finite() || scale <= 0.0 {
        return pane;
    }

    let columns = ((image_columns * scale).round() as u16).clamp(1, pane.columns);
    let rows = ((image_rows * scale).round() as u16).clamp(1, pane.rows);
    Pane {
        column: pane.column + (pane.columns - columns) / 2,
        row: pane.row + (pane.rows - rows) / 2,
        columns,
        rows,
    }
}
