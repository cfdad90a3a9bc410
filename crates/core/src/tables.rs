use crate::error::IngestError;
use crate::layout::TextRun;
use regex::Regex;

#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub rows: Vec<Vec<String>>,
}

#[derive(Debug, Clone)]
struct Cell {
    x: f32,
    end_x: f32,
    text: String,
}

#[derive(Debug, Clone)]
struct Line {
    y: f32,
    font_size: f32,
    cells: Vec<Cell>,
}

/// Finds tables in the positioned text of one page, top to bottom.
///
/// A table is at least `min_rows` consecutive lines that each split into the
/// same number (two or more) of column-aligned cells. Cells are separated by a
/// horizontal gap wider than `cell_gap` font sizes, or by a run of two or more
/// spaces inside a single string.
pub fn detect_tables(runs: &[TextRun], cell_gap: f32, min_rows: usize) -> Result<Vec<Table>, IngestError> {
    let padding = Regex::new(r"\s{2,}")?;
    let pieces = runs
        .iter()
        .flat_map(|run| split_padded(run, &padding))
        .collect::<Vec<_>>();

    let lines = group_lines(pieces, cell_gap);
    let mut tables = Vec::new();
    let mut block: Vec<&Line> = Vec::new();

    for line in &lines {
        let continues = line.cells.len() >= 2
            && block
                .first()
                .map_or(true, |first| columns_align(first, line))
            && block
                .last()
                .map_or(true, |last| (last.y - line.y).abs() <= last.font_size * 3.0);

        if continues {
            block.push(line);
            continue;
        }

        flush_block(&mut tables, &block, min_rows);
        block.clear();
        if line.cells.len() >= 2 {
            block.push(line);
        }
    }
    flush_block(&mut tables, &block, min_rows);

    Ok(tables)
}

/// CSV whose header names the columns `0..n`, followed by every detected row
/// in order. Short rows are padded with empty fields.
pub fn table_to_csv(table: &Table) -> Result<String, IngestError> {
    let columns = table.rows.iter().map(Vec::len).max().unwrap_or(0);
    let mut writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());

    writer.write_record((0..columns).map(|column| column.to_string()))?;
    for row in &table.rows {
        let padding = std::iter::repeat("").take(columns - row.len());
        writer.write_record(row.iter().map(String::as_str).chain(padding))?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|error| IngestError::Table(csv::Error::from(error.into_error())))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn flush_block(tables: &mut Vec<Table>, block: &[&Line], min_rows: usize) {
    if block.len() < min_rows.max(2) {
        return;
    }
    tables.push(Table {
        rows: block
            .iter()
            .map(|line| line.cells.iter().map(|cell| cell.text.clone()).collect())
            .collect(),
    });
}

fn split_padded(run: &TextRun, padding: &Regex) -> Vec<TextRun> {
    let total = run.text.chars().count().max(1) as f32;
    let width = run.end_x - run.x;
    let position = |byte_offset: usize| {
        let chars = run.text[..byte_offset].chars().count() as f32;
        run.x + width * chars / total
    };

    let mut pieces = Vec::new();
    let mut start = 0usize;
    let mut bounds = padding
        .find_iter(&run.text)
        .map(|found| (found.start(), found.end()))
        .collect::<Vec<_>>();
    bounds.push((run.text.len(), run.text.len()));

    for (gap_start, gap_end) in bounds {
        let piece = run.text[start..gap_start].trim();
        if !piece.is_empty() {
            pieces.push(TextRun {
                x: position(start),
                end_x: position(gap_start),
                y: run.y,
                font_size: run.font_size,
                text: piece.to_string(),
            });
        }
        start = gap_end;
    }

    pieces
}

fn group_lines(mut runs: Vec<TextRun>, cell_gap: f32) -> Vec<Line> {
    runs.sort_by(|left, right| right.y.total_cmp(&left.y).then(left.x.total_cmp(&right.x)));

    let mut lines: Vec<Vec<TextRun>> = Vec::new();
    for run in runs {
        let same_line = lines.last().and_then(|line| line.first()).map_or(false, |first| {
            (first.y - run.y).abs() <= (first.font_size.max(run.font_size) * 0.3).max(1.0)
        });
        if same_line {
            if let Some(line) = lines.last_mut() {
                line.push(run);
            }
        } else {
            lines.push(vec![run]);
        }
    }

    lines
        .into_iter()
        .map(|mut line| {
            line.sort_by(|left, right| left.x.total_cmp(&right.x));
            build_line(line, cell_gap)
        })
        .collect()
}

fn build_line(runs: Vec<TextRun>, cell_gap: f32) -> Line {
    let y = runs.first().map_or(0.0, |run| run.y);
    let font_size = runs
        .iter()
        .map(|run| run.font_size)
        .fold(0.0f32, f32::max)
        .max(1.0);

    let mut cells: Vec<Cell> = Vec::new();
    for run in runs {
        match cells.last_mut() {
            Some(cell) if run.x - cell.end_x < cell_gap * font_size => {
                if run.x - cell.end_x > 0.15 * font_size
                    && !cell.text.ends_with(' ')
                    && !run.text.starts_with(' ')
                {
                    cell.text.push(' ');
                }
                cell.text.push_str(&run.text);
                cell.end_x = cell.end_x.max(run.end_x);
            }
            _ => cells.push(Cell {
                x: run.x,
                end_x: run.end_x,
                text: run.text,
            }),
        }
    }

    for cell in &mut cells {
        cell.text = cell.text.trim().to_string();
    }

    Line { y, font_size, cells }
}

fn columns_align(first: &Line, line: &Line) -> bool {
    if first.cells.len() != line.cells.len() {
        return false;
    }

    let tolerance = first.font_size.max(line.font_size);
    first.cells.iter().zip(&line.cells).all(|(upper, lower)| {
        (upper.x - lower.x).abs() <= tolerance
            || (upper.end_x - lower.end_x).abs() <= tolerance
            || (upper.x <= lower.end_x && lower.x <= upper.end_x)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(x: f32, y: f32, text: &str) -> TextRun {
        TextRun {
            x,
            end_x: x + text.chars().count() as f32 * 5.0,
            y,
            font_size: 10.0,
            text: text.to_string(),
        }
    }

    #[test]
    fn aligned_rows_become_a_table() -> Result<(), IngestError> {
        let runs = vec![
            run(50.0, 700.0, "Item report for the quarter"),
            run(50.0, 680.0, "Name"),
            run(200.0, 680.0, "Qty"),
            run(50.0, 665.0, "Bolt"),
            run(200.0, 665.0, "12"),
            run(50.0, 650.0, "Nut"),
            run(200.0, 650.0, "7"),
            run(50.0, 600.0, "Closing remarks."),
        ];

        let tables = detect_tables(&runs, 1.5, 2)?;

        assert_eq!(tables.len(), 1);
        assert_eq!(
            tables[0].rows,
            vec![
                vec!["Name".to_string(), "Qty".to_string()],
                vec!["Bolt".to_string(), "12".to_string()],
                vec!["Nut".to_string(), "7".to_string()],
            ]
        );
        Ok(())
    }

    #[test]
    fn padded_strings_split_into_cells() -> Result<(), IngestError> {
        let runs = vec![run(50.0, 500.0, "Pump    Pressure"), run(50.0, 488.0, "P-101    4 bar")];

        let tables = detect_tables(&runs, 1.5, 2)?;

        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].rows[1], vec!["P-101".to_string(), "4 bar".to_string()]);
        Ok(())
    }

    #[test]
    fn prose_is_not_a_table() -> Result<(), IngestError> {
        let runs = vec![
            run(50.0, 700.0, "Cats are mammals."),
            run(50.0, 686.0, "Dogs are mammals too."),
        ];
        assert!(detect_tables(&runs, 1.5, 2)?.is_empty());
        Ok(())
    }

    #[test]
    fn close_runs_merge_into_one_cell() -> Result<(), IngestError> {
        let runs = vec![
            run(50.0, 700.0, "Left"),
            run(72.0, 700.0, "side"),
            run(200.0, 700.0, "Right"),
            run(50.0, 685.0, "a"),
            run(200.0, 685.0, "b"),
        ];

        let tables = detect_tables(&runs, 1.5, 2)?;
        assert_eq!(tables[0].rows[0], vec!["Left side".to_string(), "Right".to_string()]);
        Ok(())
    }

    #[test]
    fn csv_has_column_index_header_then_rows() -> Result<(), IngestError> {
        let table = Table {
            rows: vec![
                vec!["Name".to_string(), "Note".to_string()],
                vec!["Bolt".to_string(), "M8, zinc".to_string()],
            ],
        };

        assert_eq!(table_to_csv(&table)?, "0,1\nName,Note\nBolt,\"M8, zinc\"\n");
        Ok(())
    }

    #[test]
    fn csv_pads_short_rows() -> Result<(), IngestError> {
        let table = Table {
            rows: vec![
                vec!["a".to_string(), "b".to_string(), "c".to_string()],
                vec!["d".to_string()],
            ],
        };

        assert_eq!(table_to_csv(&table)?, "0,1,2\na,b,c\nd,,\n");
        Ok(())
    }
}
