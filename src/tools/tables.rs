//! Table detection from positioned text.
//!
//! Input is the list of text runs on one page, each with its bounding box in
//! PDF user space (origin bottom-left, y grows upward). Detection is purely
//! geometric:
//!
//! 1. Runs whose vertical centres lie within half a line height of each
//!    other form a row; rows are ordered top to bottom.
//! 2. Within a row, runs ordered left to right are joined into one cell
//!    while the horizontal gap stays below [`CELL_GAP_RATIO`] × line height;
//!    a wider gap starts a new cell.
//! 3. A maximal run of at least [`MIN_TABLE_ROWS`] consecutive rows that all
//!    have the same cell count, of at least two, is a table.

/// Gap (as a multiple of line height) that separates two cells.
pub const CELL_GAP_RATIO: f32 = 1.0;

/// Fewest rows a table can have.
pub const MIN_TABLE_ROWS: usize = 2;

/// One positioned run of text.
#[derive(Debug, Clone, PartialEq)]
pub struct TextFragment {
    pub text: String,
    pub left: f32,
    pub right: f32,
    pub top: f32,
    pub bottom: f32,
}

impl TextFragment {
    fn centre_y(&self) -> f32 {
        (self.top + self.bottom) / 2.0
    }

    fn height(&self) -> f32 {
        (self.top - self.bottom).abs().max(1.0)
    }
}

/// A detected table: rows of cell strings, all rows the same width.
pub type Table = Vec<Vec<String>>;

/// Group fragments into rows, top to bottom, each row sorted left to right.
pub fn group_rows(mut fragments: Vec<TextFragment>) -> Vec<Vec<TextFragment>> {
    fragments.sort_by(|a, b| b.centre_y().total_cmp(&a.centre_y()));

    let mut rows: Vec<Vec<TextFragment>> = Vec::new();
    for fragment in fragments {
        let joins_last = rows.last().is_some_and(|row| {
            let anchor = &row[0];
            let tolerance = anchor.height().min(fragment.height()) / 2.0;
            (anchor.centre_y() - fragment.centre_y()).abs() <= tolerance
        });
        if joins_last {
            if let Some(row) = rows.last_mut() {
                row.push(fragment);
            }
        } else {
            rows.push(vec![fragment]);
        }
    }
    for row in &mut rows {
        row.sort_by(|a, b| a.left.total_cmp(&b.left));
    }
    rows
}

/// Merge a left-to-right row into cells.
pub fn split_cells(row: &[TextFragment]) -> Vec<String> {
    let mut cells: Vec<String> = Vec::new();
    let mut last_right: Option<f32> = None;
    for fragment in row {
        let gap_limit = fragment.height() * CELL_GAP_RATIO;
        match (last_right, cells.last_mut()) {
            (Some(right), Some(cell)) if fragment.left - right < gap_limit => {
                cell.push(' ');
                cell.push_str(&fragment.text);
            }
            _ => cells.push(fragment.text.clone()),
        }
        last_right = Some(last_right.map_or(fragment.right, |r| r.max(fragment.right)));
    }
    cells
}

/// Find every table on one page.
pub fn detect_tables(fragments: Vec<TextFragment>) -> Vec<Table> {
    let rows: Vec<Vec<String>> = group_rows(fragments)
        .iter()
        .map(|row| split_cells(row))
        .collect();

    let mut tables = Vec::new();
    let mut current: Table = Vec::new();
    for row in rows {
        let continues = current
            .last()
            .is_some_and(|prev| prev.len() == row.len());
        if !continues {
            flush(&mut current, &mut tables);
        }
        current.push(row);
    }
    flush(&mut current, &mut tables);
    tables
}

fn flush(current: &mut Table, tables: &mut Vec<Table>) {
    let rows = std::mem::take(current);
    if rows.len() >= MIN_TABLE_ROWS && rows[0].len() >= 2 {
        tables.push(rows);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A 10 pt-high run at baseline `y`, spanning `x..x + 6 * len`.
    fn frag(text: &str, x: f32, y: f32) -> TextFragment {
        TextFragment {
            text: text.into(),
            left: x,
            right: x + 6.0 * text.len() as f32,
            top: y + 10.0,
            bottom: y,
        }
    }

    #[test]
    fn rows_are_top_to_bottom_left_to_right() {
        let rows = group_rows(vec![
            frag("b", 200.0, 700.0),
            frag("c", 100.0, 680.0),
            frag("a", 100.0, 701.0),
        ]);
        let texts: Vec<Vec<&str>> = rows
            .iter()
            .map(|r| r.iter().map(|f| f.text.as_str()).collect())
            .collect();
        assert_eq!(texts, vec![vec!["a", "b"], vec!["c"]]);
    }

    #[test]
    fn close_runs_share_a_cell() {
        let row = vec![frag("Unit", 100.0, 700.0), frag("price", 127.0, 700.0), frag("9.99", 300.0, 700.0)];
        assert_eq!(split_cells(&row), vec!["Unit price", "9.99"]);
    }

    #[test]
    fn detects_a_grid() {
        let mut fragments = Vec::new();
        for (i, (name, qty)) in [("Item", "Qty"), ("Apple", "3"), ("Pear", "5")]
            .iter()
            .enumerate()
        {
            let y = 700.0 - 20.0 * i as f32;
            fragments.push(frag(name, 72.0, y));
            fragments.push(frag(qty, 300.0, y));
        }
        fragments.push(frag("Totals are approximate.", 72.0, 600.0));

        let tables = detect_tables(fragments);

        assert_eq!(tables.len(), 1);
        assert_eq!(
            tables[0],
            vec![
                vec!["Item".to_string(), "Qty".to_string()],
                vec!["Apple".to_string(), "3".to_string()],
                vec!["Pear".to_string(), "5".to_string()],
            ]
        );
    }

    #[test]
    fn prose_is_not_a_table() {
        let fragments = vec![
            frag("This is a paragraph", 72.0, 700.0),
            frag("of ordinary text.", 72.0, 686.0),
        ];
        assert!(detect_tables(fragments).is_empty());
    }

    #[test]
    fn a_single_row_is_not_a_table() {
        let fragments = vec![frag("Name", 72.0, 700.0), frag("Value", 300.0, 700.0)];
        assert!(detect_tables(fragments).is_empty());
    }

    #[test]
    fn separate_grids_are_separate_tables() {
        let mut fragments = Vec::new();
        for i in 0..2 {
            let y = 700.0 - 20.0 * i as f32;
            fragments.push(frag("a", 72.0, y));
            fragments.push(frag("b", 200.0, y));
        }
        fragments.push(frag("Interlude", 72.0, 600.0));
        for i in 0..2 {
            let y = 500.0 - 20.0 * i as f32;
            fragments.push(frag("x", 72.0, y));
            fragments.push(frag("y", 200.0, y));
            fragments.push(frag("z", 300.0, y));
        }

        let tables = detect_tables(fragments);

        assert_eq!(tables.len(), 2);
        assert_eq!(tables[0][0].len(), 2);
        assert_eq!(tables[1][0].len(), 3);
    }
}
