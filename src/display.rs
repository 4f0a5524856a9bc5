//! 16x2 character display.
//!
//! Rendering goes through [`format_lines`] so the text layout can be checked without
//! a device. [`CharacterGrid`] holds the character cells in memory and echoes changed
//! frames to the console on [`Display::flush`].

use crate::pipeline::Reading;

pub const COLUMNS: usize = 16;
pub const ROWS: usize = 2;

/// Minimal character display interface.
pub trait Display {
    fn clear(&mut self);
    fn set_cursor(&mut self, col: usize, row: usize);
    fn print(&mut self, text: &str);
    /// Pushes buffered output to the device, if the device buffers.
    fn flush(&mut self) {}
}

/// Formats a reading into the two fixed-width display lines.
pub fn format_lines(voltage: f64, current: f64, power: f64) -> [String; 2] {
    [
        fit_line(&format!("V:{voltage:.2}  C:{current:.2}")),
        fit_line(&format!("P:{power:.2}")),
    ]
}

fn fit_line(text: &str) -> String {
    let mut line: String = text.chars().take(COLUMNS).collect();
    let width = line.chars().count();
    line.extend(std::iter::repeat(' ').take(COLUMNS - width));
    line
}

/// Draws a reading on the display. Display errors are not checked.
pub fn render<D: Display>(display: &mut D, reading: &Reading) {
    let [top, bottom] = format_lines(reading.voltage, reading.current, reading.power);
    display.clear();
    display.set_cursor(0, 0);
    display.print(&top);
    display.set_cursor(0, 1);
    display.print(&bottom);
    display.flush();
}

/// In-memory character cells addressed by (column, row).
///
/// Text printed past the last column is dropped, cursor positions outside the grid
/// are clamped.
#[derive(Debug, Clone)]
pub struct CharacterGrid {
    cells: [[char; COLUMNS]; ROWS],
    col: usize,
    row: usize,
    dirty: bool,
    echo: bool,
}

impl Default for CharacterGrid {
    fn default() -> Self {
        Self::new()
    }
}

impl CharacterGrid {
    pub fn new() -> Self {
        Self {
            cells: [[' '; COLUMNS]; ROWS],
            col: 0,
            row: 0,
            dirty: false,
            echo: false,
        }
    }

    /// A grid that prints each changed frame to stdout on flush.
    pub fn console() -> Self {
        Self {
            echo: true,
            ..Self::new()
        }
    }

    pub fn row_text(&self, row: usize) -> String {
        self.cells
            .get(row)
            .map(|cells| cells.iter().collect())
            .unwrap_or_default()
    }

    pub fn lines(&self) -> [String; 2] {
        [self.row_text(0), self.row_text(1)]
    }
}

impl Display for CharacterGrid {
    fn clear(&mut self) {
        self.cells = [[' '; COLUMNS]; ROWS];
        self.col = 0;
        self.row = 0;
        self.dirty = true;
    }

    fn set_cursor(&mut self, col: usize, row: usize) {
        self.col = col.min(COLUMNS);
        self.row = row.min(ROWS - 1);
    }

    fn print(&mut self, text: &str) {
        for c in text.chars() {
            if let Some(cell) = self.cells[self.row].get_mut(self.col) {
                *cell = c;
                self.col += 1;
                self.dirty = true;
            } else {
                break;
            }
        }
    }

    fn flush(&mut self) {
        if !self.dirty {
            return;
        }
        self.dirty = false;
        if self.echo {
            let [top, bottom] = self.lines();
            println!("+{}+", "-".repeat(COLUMNS));
            println!("|{top}|");
            println!("|{bottom}|");
            println!("+{}+", "-".repeat(COLUMNS));
        }
    }
}
