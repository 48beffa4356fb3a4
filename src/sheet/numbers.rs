//! Legacy XML-based Numbers documents: the first table of `index.xml`

use std::io::{Cursor, Read};
use std::path::Path;

use quick_xml::Reader;
use quick_xml::events::Event;
use tracing::{info, warn};
use zip::ZipArchive;

use super::Table;
use crate::config::NumbersSettings;
use crate::error::SheetError;
use crate::output::write_table;

const DATA_FILES: [&str; 2] = ["index.xml", "Data"];

/// Find the document XML: a top-level `index.xml` or `Data`, else one nested anywhere.
fn data_file(archive: &mut ZipArchive<Cursor<&[u8]>>) -> Result<Vec<u8>, SheetError> {
    let names: Vec<String> = archive.file_names().map(str::to_string).collect();

    let chosen = DATA_FILES.iter().find_map(|wanted| {
        names
            .iter()
            .find(|name| name.as_str() == *wanted)
            .or_else(|| {
                names.iter().find(|name| {
                    Path::new(name.as_str())
                        .file_name()
                        .is_some_and(|f| f == *wanted)
                })
            })
            .cloned()
    });

    let Some(name) = chosen else {
        return Err(SheetError::NoDataFile);
    };
    info!("Found data file: {}", name);

    let mut entry = archive.by_name(&name)?;
    let mut buf = Vec::new();
    entry
        .read_to_end(&mut buf)
        .map_err(|e| SheetError::Archive(e.into()))?;
    Ok(buf)
}

/// Cell text of every row in the first `table` element.
pub fn table_rows(xml: &[u8]) -> Result<Vec<Vec<String>>, SheetError> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();

    let mut found_table = false;
    let mut table_depth = 0usize;
    let mut rows = Vec::new();
    let mut row: Option<Vec<String>> = None;
    let mut cell: Option<String> = None;
    // Only the first `text` element inside a cell counts
    let mut text_seen = false;
    let mut text_depth = 0usize;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => {
                let name = e.local_name();
                if !found_table {
                    if name.as_ref() == b"table" {
                        found_table = true;
                        table_depth = 1;
                    }
                } else {
                    table_depth += 1;
                    match name.as_ref() {
                        b"row" => row = Some(Vec::new()),
                        b"cell" if row.is_some() => {
                            cell = Some(String::new());
                            text_seen = false;
                        }
                        b"text" if cell.is_some() => {
                            if text_depth > 0 || !text_seen {
                                text_depth += 1;
                            }
                        }
                        _ => {}
                    }
                }
            }
            Event::Empty(e) if found_table => match e.local_name().as_ref() {
                b"cell" => {
                    if let Some(row) = row.as_mut() {
                        row.push(String::new());
                    }
                }
                b"row" => rows.push(Vec::new()),
                _ => {}
            },
            Event::Text(t) if text_depth > 0 => {
                if let Some(cell) = cell.as_mut() {
                    cell.push_str(&t.unescape()?);
                }
            }
            Event::End(e) if found_table => {
                match e.local_name().as_ref() {
                    b"text" if text_depth > 0 => {
                        text_depth -= 1;
                        if text_depth == 0 {
                            text_seen = true;
                        }
                    }
                    b"cell" => {
                        if let (Some(row), Some(text)) = (row.as_mut(), cell.take()) {
                            row.push(text.trim().to_string());
                        }
                    }
                    b"row" => {
                        if let Some(row) = row.take() {
                            rows.push(row);
                        }
                    }
                    _ => {}
                }
                table_depth -= 1;
                if table_depth == 0 {
                    break;
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if !found_table {
        return Err(SheetError::NoTable);
    }
    Ok(rows)
}

/// Rows of the first table in a Numbers archive.
pub fn read_first_table(bytes: &[u8]) -> Result<Vec<Vec<String>>, SheetError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;
    let xml = data_file(&mut archive)?;
    let rows = table_rows(&xml)?;
    if rows.is_empty() {
        return Err(SheetError::EmptyTable);
    }
    info!("Extracted {} rows from table", rows.len());
    Ok(rows)
}

/// Drop banner rows, promote the next row to header, and drop one column.
///
/// Fewer rows or columns than the drop positions need only produce a warning.
pub fn reshape(
    rows: Vec<Vec<String>>,
    drop_rows: &[usize],
    drop_column: Option<usize>,
) -> Result<Table, SheetError> {
    let needed = drop_rows.iter().max().map_or(0, |max| max + 1);
    let mut rows: Vec<Vec<String>> = if rows.len() >= needed {
        rows.into_iter()
            .enumerate()
            .filter(|(index, _)| !drop_rows.contains(index))
            .map(|(_, row)| row)
            .collect()
    } else {
        warn!(
            "Table has only {} rows, cannot remove rows {:?}",
            rows.len(),
            drop_rows
        );
        rows
    };

    if rows.is_empty() {
        return Err(SheetError::EmptyTable);
    }
    let mut header = rows.remove(0);

    if let Some(column) = drop_column {
        if header.len() > column {
            header.remove(column);
            for row in &mut rows {
                if row.len() > column {
                    row.remove(column);
                }
            }
        } else {
            warn!(
                "Table has only {} columns, cannot delete column {}",
                header.len(),
                column
            );
        }
    }

    Ok(Table { header, rows })
}

/// Convert a `.numbers` file into a cleaned CSV at `output`.
pub fn convert(input: &Path, settings: &NumbersSettings, output: &Path) -> anyhow::Result<Table> {
    info!("Processing {}", input.display());
    let bytes = std::fs::read(input).map_err(|e| SheetError::Io {
        path: input.to_path_buf(),
        source: e,
    })?;
    let rows = read_first_table(&bytes)?;
    let table = reshape(rows, &settings.drop_rows, settings.drop_column)?;
    write_table(output, &table.header, &table.rows)?;
    info!(
        "Saved {} rows with columns: {}",
        table.rows.len(),
        table.header.join(", ")
    );
    Ok(table)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use zip::write::SimpleFileOptions;

    use super::*;

    fn numbers_archive(path: &str, xml: &str) -> Vec<u8> {
        let mut buffer = Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut buffer);
            zip.start_file(path, SimpleFileOptions::default()).unwrap();
            zip.write_all(xml.as_bytes()).unwrap();
            zip.finish().unwrap();
        }
        buffer.into_inner()
    }

    const DOCUMENT: &str = r#"<ls:document xmlns:ls="http://developer.apple.com/namespaces/ls"
        xmlns:sf="http://developer.apple.com/namespaces/sf">
      <ls:workspace><sf:tabular-model>
      <sf:table>
        <sf:grid>
          <sf:row><sf:cell><sf:text><sf:p>Weekly export</sf:p></sf:text></sf:cell></sf:row>
          <sf:row>
            <sf:cell><sf:text>Code</sf:text></sf:cell><sf:cell><sf:text>Name</sf:text></sf:cell>
            <sf:cell><sf:text>A</sf:text></sf:cell><sf:cell><sf:text>B</sf:text></sf:cell>
            <sf:cell><sf:text>Notes</sf:text></sf:cell><sf:cell><sf:text>C</sf:text></sf:cell>
          </sf:row>
          <sf:row><sf:cell><sf:text>units</sf:text></sf:cell></sf:row>
          <sf:row>
            <sf:cell><sf:text>001</sf:text></sf:cell><sf:cell><sf:text>iPad &amp; Pencil</sf:text></sf:cell>
            <sf:cell><sf:text>1</sf:text></sf:cell><sf:cell/>
            <sf:cell><sf:text>skip me</sf:text></sf:cell><sf:cell><sf:text>3</sf:text></sf:cell>
          </sf:row>
        </sf:grid>
      </sf:table>
      <sf:table><sf:grid><sf:row><sf:cell><sf:text>second</sf:text></sf:cell></sf:row></sf:grid></sf:table>
      </sf:tabular-model></ls:workspace>
    </ls:document>"#;

    #[test]
    fn test_first_table_only() {
        let rows = table_rows(DOCUMENT.as_bytes()).unwrap();
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0], vec!["Weekly export"]);
        assert_eq!(rows[3], vec!["001", "iPad & Pencil", "1", "", "skip me", "3"]);
    }

    #[test]
    fn test_reshape_drops_banner_rows_and_fifth_column() {
        let bytes = numbers_archive("Contents/index.xml", DOCUMENT);
        let rows = read_first_table(&bytes).unwrap();
        let table = reshape(rows, &[0, 2], Some(4)).unwrap();
        assert_eq!(table.header, vec!["Code", "Name", "A", "B", "C"]);
        assert_eq!(table.rows, vec![vec!["001", "iPad & Pencil", "1", "", "3"]]);
    }

    #[test]
    fn test_reshape_tolerates_small_tables() {
        let rows = vec![vec!["h1".to_string(), "h2".to_string()]];
        let table = reshape(rows, &[0, 2], Some(4)).unwrap();
        assert_eq!(table.header, vec!["h1", "h2"]);
        assert!(table.rows.is_empty());
    }

    #[test]
    fn test_missing_data_file() {
        let bytes = numbers_archive("preview.jpg", "not xml");
        assert!(matches!(
            read_first_table(&bytes),
            Err(SheetError::NoDataFile)
        ));
    }

    #[test]
    fn test_document_without_table() {
        assert!(matches!(
            table_rows(b"<document><p>hi</p></document>"),
            Err(SheetError::NoTable)
        ));
    }

    #[test]
    fn test_convert_writes_cleaned_csv() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("D&T Data.numbers");
        let output = dir.path().join("processed_output.csv");
        std::fs::write(&input, numbers_archive("index.xml", DOCUMENT)).unwrap();

        convert(&input, &NumbersSettings::default(), &output).unwrap();

        let content = std::fs::read_to_string(&output).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines, vec!["Code,Name,A,B,C", "001,iPad & Pencil,1,,3"]);
    }
}
