//! Box-drawing table renderer for per-peer resource snapshots.

use colored::Colorize;

/// Column alignment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Align {
    Left,
    Right,
    Center,
}

/// Headers plus rows of owned cells, rendered with Unicode borders.
pub struct Table {
    headers: Vec<String>,
    alignments: Vec<Align>,
    rows: Vec<Vec<String>>,
}

impl Table {
    /// All columns start left-aligned.
    pub fn new(headers: &[&str]) -> Self {
        let headers: Vec<String> = headers.iter().map(|h| h.to_string()).collect();
        let alignments = vec![Align::Left; headers.len()];
        Self {
            headers,
            alignments,
            rows: Vec::new(),
        }
    }

    /// Out-of-range columns are ignored.
    pub fn align(mut self, col: usize, alignment: Align) -> Self {
        if let Some(slot) = self.alignments.get_mut(col) {
            *slot = alignment;
        }
        self
    }

    /// Cells beyond the header count are dropped, missing ones left blank.
    pub fn add_row<I, S>(&mut self, cells: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut row: Vec<String> = cells
            .into_iter()
            .take(self.headers.len())
            .map(Into::into)
            .collect();
        row.resize(self.headers.len(), String::new());
        self.rows.push(row);
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Display width per column, counted in chars so resource names with
    /// non-ASCII identifiers line up.
    fn column_widths(&self) -> Vec<usize> {
        let mut widths: Vec<usize> = self.headers.iter().map(|h| h.chars().count()).collect();
        for row in &self.rows {
            for (width, cell) in widths.iter_mut().zip(row) {
                *width = (*width).max(cell.chars().count());
            }
        }
        widths
    }

    fn pad(text: &str, width: usize, alignment: Align) -> String {
        let diff = width.saturating_sub(text.chars().count());
        match alignment {
            Align::Left => format!("{text}{}", " ".repeat(diff)),
            Align::Right => format!("{}{text}", " ".repeat(diff)),
            Align::Center => {
                let left = diff / 2;
                format!("{}{text}{}", " ".repeat(left), " ".repeat(diff - left))
            }
        }
    }

    fn border(widths: &[usize], left: char, mid: char, right: char) -> String {
        let segments: Vec<String> = widths.iter().map(|w| "\u{2500}".repeat(w + 2)).collect();
        format!("{left}{}{right}", segments.join(&mid.to_string()))
    }

    fn line(cells: impl Iterator<Item = String>) -> String {
        let cells: Vec<String> = cells.collect();
        format!("\u{2502}{}\u{2502}", cells.join("\u{2502}"))
    }

    /// ```text
    /// ┌──────────┬─────────┐
    /// │ Resource │ Owner   │
    /// ├──────────┼─────────┤
    /// │ lobby    │ peer-1  │
    /// └──────────┴─────────┘
    /// ```
    pub fn render(&self) -> String {
        let widths = self.column_widths();
        let mut lines = Vec::with_capacity(self.rows.len() + 4);

        lines.push(Self::border(&widths, '\u{250c}', '\u{252c}', '\u{2510}'));
        lines.push(Self::line(self.headers.iter().enumerate().map(|(i, h)| {
            format!(" {} ", Self::pad(h, widths[i], self.alignments[i]).bold())
        })));
        lines.push(Self::border(&widths, '\u{251c}', '\u{253c}', '\u{2524}'));
        for row in &self.rows {
            lines.push(Self::line(row.iter().enumerate().map(|(i, cell)| {
                format!(" {} ", Self::pad(cell, widths[i], self.alignments[i]))
            })));
        }
        lines.push(Self::border(&widths, '\u{2514}', '\u{2534}', '\u{2518}'));

        lines.join("\n")
    }

    pub fn print(&self) {
        println!("{}", self.render());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain(rendered: &str) -> String {
        // Strip ANSI escapes from the bold header.
        let mut out = String::new();
        let mut in_escape = false;
        for c in rendered.chars() {
            match (in_escape, c) {
                (false, '\x1b') => in_escape = true,
                (true, 'm') => in_escape = false,
                (true, _) => {}
                (false, c) => out.push(c),
            }
        }
        out
    }

    #[test]
    fn test_snapshot_table_layout() {
        let mut t = Table::new(&["Resource", "Owner", "State"]);
        t.add_row(["lobby", "peer-1", "active"]);
        t.add_row(["lobby/SU", "peer-2", "available"]);

        let rendered = plain(&t.render());
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines.len(), 6);
        assert!(lines[0].starts_with('\u{250c}') && lines[0].ends_with('\u{2510}'));
        assert!(lines[5].starts_with('\u{2514}') && lines[5].ends_with('\u{2518}'));
        assert!(lines[1].contains("Resource"));
        assert!(lines[4].contains("lobby/SU") && lines[4].contains("available"));

        let widths: Vec<usize> = lines.iter().map(|l| l.chars().count()).collect();
        assert!(widths.iter().all(|w| *w == widths[0]));
    }

    #[test]
    fn test_right_alignment() {
        let mut t = Table::new(&["Peer", "Events"]).align(1, Align::Right);
        t.add_row(["peer-1", "7"]);
        t.add_row(["peer-2", "1024"]);

        let rendered = t.render();
        let line = rendered.lines().find(|l| l.contains("peer-1")).unwrap();
        assert!(line.contains("      7 "));
    }

    #[test]
    fn test_center_pad() {
        assert_eq!(Table::pad("SU", 6, Align::Center), "  SU  ");
        assert_eq!(Table::pad("SU", 7, Align::Center), "  SU   ");
        assert_eq!(Table::pad("too wide", 3, Align::Left), "too wide");
    }

    #[test]
    fn test_row_normalized_to_header_count() {
        let mut t = Table::new(&["Resource", "Owner", "Pending"]);
        t.add_row(["lobby/HI"]);
        t.add_row(["lobby/CC", "-", "request", "extra"]);
        assert_eq!(t.rows.len(), 2);

        let rendered = t.render();
        for line in rendered.lines().skip(3).take(2) {
            assert_eq!(line.matches('\u{2502}').count(), 4);
        }
        assert!(!rendered.contains("extra"));
    }

    #[test]
    fn test_width_counts_chars() {
        let mut t = Table::new(&["Resource"]);
        t.add_row(["lobby/Ü"]);
        let rendered = plain(&t.render());
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines[0].chars().count(), lines[3].chars().count());
    }

    #[test]
    fn test_empty_table() {
        let t = Table::new(&["A", "B"]);
        assert!(t.is_empty());
        assert_eq!(t.render().lines().count(), 4);
    }
}
