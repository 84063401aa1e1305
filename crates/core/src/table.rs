//! Pipe-delimited tables, the on-disk form of the decision matrix.
//!
//! A table is a header line followed by rows, cells separated by `|` and
//! lines by `\n`, with no trailing newline. Encoding and decoding are exact
//! inverses for any table whose cells contain neither `|` nor a line break.

use crate::errors::CodecError;

pub const DELIMITER: char = '|';

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DelimitedTable {
    header: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl DelimitedTable {
    pub fn new(header: Vec<String>, rows: Vec<Vec<String>>) -> Result<Self, CodecError> {
        if header.is_empty() {
            return Err(CodecError::EmptyTable);
        }
        for (index, row) in rows.iter().enumerate() {
            if row.len() != header.len() {
                return Err(CodecError::ColumnCountMismatch {
                    line: index + 2,
                    expected: header.len(),
                    found: row.len(),
                });
            }
        }
        Ok(Self { header, rows })
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    /// Position of a column, matched case-insensitively.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.header.iter().position(|column| column.trim().eq_ignore_ascii_case(name))
    }

    pub fn encode(&self) -> Result<String, CodecError> {
        let mut lines = Vec::with_capacity(self.rows.len() + 1);
        for (row_index, cells) in std::iter::once(&self.header).chain(&self.rows).enumerate() {
            for (column, cell) in cells.iter().enumerate() {
                if cell.contains(DELIMITER) || cell.contains('\n') || cell.contains('\r') {
                    return Err(CodecError::DelimiterInCell { row: row_index, column });
                }
            }
            lines.push(cells.join("|"));
        }
        Ok(lines.join("\n"))
    }

    /// Parses the encoded form. Blank lines are skipped; `\r\n` endings are
    /// accepted.
    pub fn decode(text: &str) -> Result<Self, CodecError> {
        let mut lines = text
            .split('\n')
            .enumerate()
            .map(|(index, line)| (index + 1, line.strip_suffix('\r').unwrap_or(line)))
            .filter(|(_, line)| !line.trim().is_empty());

        let Some((_, header_line)) = lines.next() else {
            return Err(CodecError::EmptyTable);
        };
        let header = split_cells(header_line);

        let mut rows = Vec::new();
        for (line, text) in lines {
            let cells = split_cells(text);
            if cells.len() != header.len() {
                return Err(CodecError::ColumnCountMismatch {
                    line,
                    expected: header.len(),
                    found: cells.len(),
                });
            }
            rows.push(cells);
        }

        Ok(Self { header, rows })
    }

    /// Imports a CSV export using `delimiter` between cells.
    ///
    /// Double-quoted cells may contain the delimiter, and `""` inside quotes is
    /// a literal quote. Cells are trimmed and blank lines skipped.
    pub fn from_csv(text: &str, delimiter: char) -> Result<Self, CodecError> {
        let mut records = Vec::new();
        for (index, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            records.push((index + 1, split_csv_record(line, delimiter)));
        }

        let mut records = records.into_iter();
        let Some((_, header)) = records.next() else {
            return Err(CodecError::EmptyTable);
        };

        let mut rows = Vec::new();
        for (line, cells) in records {
            if cells.len() != header.len() {
                return Err(CodecError::ColumnCountMismatch {
                    line,
                    expected: header.len(),
                    found: cells.len(),
                });
            }
            rows.push(cells);
        }

        Ok(Self { header, rows })
    }
}

fn split_cells(line: &str) -> Vec<String> {
    line.split(DELIMITER).map(str::to_string).collect()
}

fn split_csv_record(line: &str, delimiter: char) -> Vec<String> {
    let mut cells = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut chars = line.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '"' if quoted && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => quoted = !quoted,
            ch if ch == delimiter && !quoted => {
                cells.push(current.trim().to_string());
                current.clear();
            }
            ch => current.push(ch),
        }
    }
    cells.push(current.trim().to_string());
    cells
}

#[cfg(test)]
mod tests {
    use super::DelimitedTable;
    use crate::errors::CodecError;

    fn cells(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn encodes_without_trailing_newline() {
        let table = DelimitedTable::new(
            cells(&["intent", "knowledge_base"]),
            vec![cells(&["inventory", "graph"]), cells(&["checkout", "null"])],
        )
        .expect("table");

        assert_eq!(
            table.encode().expect("encode"),
            "intent|knowledge_base\ninventory|graph\ncheckout|null"
        );
    }

    #[test]
    fn decode_inverts_encode() {
        let text = "intent|knowledge_base|entity_extraction\ninventory|graph|true\nfeedback||false";
        let table = DelimitedTable::decode(text).expect("decode");
        assert_eq!(table.rows()[1], cells(&["feedback", "", "false"]));
        assert_eq!(table.encode().expect("encode"), text);
    }

    #[test]
    fn decode_tolerates_crlf_and_blank_lines() {
        let table = DelimitedTable::decode("a|b\r\n\r\n1|2\r\n").expect("decode");
        assert_eq!(table.header(), &cells(&["a", "b"])[..]);
        assert_eq!(table.rows(), &[cells(&["1", "2"])][..]);
    }

    #[test]
    fn rejects_ragged_rows_and_empty_input() {
        assert_eq!(
            DelimitedTable::decode("a|b\n1|2|3"),
            Err(CodecError::ColumnCountMismatch { line: 2, expected: 2, found: 3 })
        );
        assert_eq!(DelimitedTable::decode("\n  \n"), Err(CodecError::EmptyTable));
    }

    #[test]
    fn refuses_to_encode_cells_with_delimiters() {
        let table = DelimitedTable::new(cells(&["a"]), vec![cells(&["x|y"])]).expect("table");
        assert_eq!(table.encode(), Err(CodecError::DelimiterInCell { row: 1, column: 0 }));
    }

    #[test]
    fn imports_semicolon_csv_with_quotes() {
        let csv = "Intent; Knowledge_Base ;entity_extraction\n\
                   inventory;graph;true\n\
                   \"post;Sale\";\"say \"\"hi\"\"\";false\n";
        let table = DelimitedTable::from_csv(csv, ';').expect("csv");

        assert_eq!(table.header(), &cells(&["Intent", "Knowledge_Base", "entity_extraction"])[..]);
        assert_eq!(table.rows()[1], cells(&["post;Sale", "say \"hi\"", "false"]));
        assert_eq!(table.column_index("knowledge_base"), Some(1));
    }

    #[test]
    fn csv_import_then_encode_is_stable() {
        let csv = "intent;knowledge_base;entity_extraction\ninventory;graph;true\n";
        let encoded = DelimitedTable::from_csv(csv, ';').expect("csv").encode().expect("encode");
        let reloaded = DelimitedTable::decode(&encoded).expect("decode");
        assert_eq!(reloaded.encode().expect("encode"), encoded);
    }
}
