//! Minimal xlsx reader: the first worksheet's cell text, read straight from the OOXML parts

use std::io::{Cursor, Read};

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use zip::ZipArchive;

use crate::error::SheetError;

const WORKBOOK: &str = "xl/workbook.xml";
const WORKBOOK_RELS: &str = "xl/_rels/workbook.xml.rels";
const SHARED_STRINGS: &str = "xl/sharedStrings.xml";
const DEFAULT_SHEET: &str = "xl/worksheets/sheet1.xml";

fn read_entry(archive: &mut ZipArchive<Cursor<&[u8]>>, name: &str) -> Result<Option<Vec<u8>>, SheetError> {
    let mut entry = match archive.by_name(name) {
        Ok(entry) => entry,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut buf = Vec::new();
    entry
        .read_to_end(&mut buf)
        .map_err(|e| SheetError::Archive(e.into()))?;
    Ok(Some(buf))
}

/// Value of the attribute whose local name is `name`.
fn attr(element: &BytesStart<'_>, name: &[u8]) -> Result<Option<String>, SheetError> {
    for attribute in element.attributes() {
        let attribute = attribute.map_err(quick_xml::Error::from)?;
        if attribute.key.local_name().as_ref() == name {
            return Ok(Some(attribute.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

/// Zero-based column index from a cell reference such as `AB12`.
pub fn column_index(reference: &str) -> Option<usize> {
    let letters: Vec<u8> = reference
        .bytes()
        .take_while(u8::is_ascii_alphabetic)
        .map(|b| b.to_ascii_uppercase())
        .collect();
    if letters.is_empty() {
        return None;
    }
    let index = letters
        .iter()
        .fold(0usize, |acc, b| acc * 26 + usize::from(b - b'A' + 1));
    Some(index - 1)
}

fn shared_strings(xml: &[u8]) -> Result<Vec<String>, SheetError> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut strings = Vec::new();
    let mut current = String::new();
    let mut in_item = false;
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"si" => {
                    in_item = true;
                    current.clear();
                }
                b"t" if in_item => in_text = true,
                _ => {}
            },
            Event::Empty(e) if e.local_name().as_ref() == b"si" => strings.push(String::new()),
            Event::Text(t) if in_text => current.push_str(&t.unescape()?),
            Event::End(e) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"si" => {
                    in_item = false;
                    strings.push(std::mem::take(&mut current));
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

/// Archive path of the first sheet listed in the workbook.
fn first_sheet_path(archive: &mut ZipArchive<Cursor<&[u8]>>) -> Result<String, SheetError> {
    let (Some(workbook), Some(rels)) = (
        read_entry(archive, WORKBOOK)?,
        read_entry(archive, WORKBOOK_RELS)?,
    ) else {
        return Ok(DEFAULT_SHEET.to_string());
    };

    let mut reader = Reader::from_reader(workbook.as_slice());
    let mut buf = Vec::new();
    let mut relation_id = None;
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"sheet" => {
                relation_id = attr(&e, b"id")?;
                break;
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    let Some(relation_id) = relation_id else {
        return Err(SheetError::NoWorksheet);
    };

    let mut reader = Reader::from_reader(rels.as_slice());
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"Relationship" => {
                if attr(&e, b"Id")?.as_deref() == Some(relation_id.as_str())
                    && let Some(target) = attr(&e, b"Target")?
                {
                    return Ok(match target.strip_prefix('/') {
                        Some(absolute) => absolute.to_string(),
                        None => format!("xl/{target}"),
                    });
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(DEFAULT_SHEET.to_string())
}

#[derive(Default)]
struct CellState {
    column: usize,
    kind: Option<String>,
    value: String,
}

fn place(row: &mut Vec<String>, column: usize, value: String) {
    if row.len() <= column {
        row.resize(column + 1, String::new());
    }
    row[column] = value;
}

fn worksheet_rows(xml: &[u8], strings: &[String]) -> Result<Vec<Vec<String>>, SheetError> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut rows = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut cell: Option<CellState> = None;
    let mut in_value = false;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"row" => row = Vec::new(),
                b"c" => {
                    let column = attr(&e, b"r")?
                        .as_deref()
                        .and_then(column_index)
                        .unwrap_or(row.len());
                    cell = Some(CellState {
                        column,
                        kind: attr(&e, b"t")?,
                        value: String::new(),
                    });
                }
                b"v" | b"t" => in_value = cell.is_some(),
                _ => {}
            },
            Event::Text(t) if in_value => {
                if let Some(state) = cell.as_mut() {
                    state.value.push_str(&t.unescape()?);
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"c" => {
                    if let Some(state) = cell.take() {
                        let value = match state.kind.as_deref() {
                            Some("s") => state
                                .value
                                .trim()
                                .parse::<usize>()
                                .ok()
                                .and_then(|i| strings.get(i).cloned())
                                .unwrap_or_default(),
                            Some("b") => match state.value.trim() {
                                "1" => "TRUE".to_string(),
                                _ => "FALSE".to_string(),
                            },
                            _ => state.value,
                        };
                        place(&mut row, state.column, value);
                    }
                }
                b"row" => rows.push(std::mem::take(&mut row)),
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(rows)
}

/// Rows of the workbook's first sheet, cells as text. Shared strings are resolved.
pub fn read_first_sheet(bytes: &[u8]) -> Result<Vec<Vec<String>>, SheetError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;
    let strings = match read_entry(&mut archive, SHARED_STRINGS)? {
        Some(xml) => shared_strings(&xml)?,
        None => Vec::new(),
    };
    let sheet_path = first_sheet_path(&mut archive)?;
    let sheet = read_entry(&mut archive, &sheet_path)?.ok_or(SheetError::NoWorksheet)?;
    worksheet_rows(&sheet, &strings)
}

#[cfg(test)]
pub(crate) mod tests {
    use std::io::Write;

    use zip::write::SimpleFileOptions;

    use super::*;

    /// Build a one-sheet workbook from rows of cell text, all stored as shared strings.
    pub(crate) fn workbook(rows: &[&[&str]]) -> Vec<u8> {
        let mut strings = Vec::new();
        let mut sheet = String::from(r#"<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>"#);
        for (r, row) in rows.iter().enumerate() {
            sheet.push_str(&format!(r#"<row r="{}">"#, r + 1));
            for (c, value) in row.iter().enumerate() {
                let reference = format!("{}{}", (b'A' + c as u8) as char, r + 1);
                if let Ok(number) = value.parse::<f64>() {
                    sheet.push_str(&format!(r#"<c r="{reference}"><v>{number}</v></c>"#));
                } else {
                    sheet.push_str(&format!(r#"<c r="{reference}" t="s"><v>{}</v></c>"#, strings.len()));
                    strings.push(*value);
                }
            }
            sheet.push_str("</row>");
        }
        sheet.push_str("</sheetData></worksheet>");

        let mut shared = String::from(r#"<sst xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">"#);
        for s in strings {
            shared.push_str(&format!("<si><t>{}</t></si>", s.replace('&', "&amp;")));
        }
        shared.push_str("</sst>");

        let mut buffer = Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut buffer);
            let options = SimpleFileOptions::default();
            zip.start_file("xl/workbook.xml", options).unwrap();
            zip.write_all(br#"<workbook xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets><sheet name="Data" sheetId="1" r:id="rId7"/></sheets></workbook>"#).unwrap();
            zip.start_file("xl/_rels/workbook.xml.rels", options).unwrap();
            zip.write_all(br#"<Relationships><Relationship Id="rId7" Target="worksheets/data.xml"/></Relationships>"#).unwrap();
            zip.start_file("xl/sharedStrings.xml", options).unwrap();
            zip.write_all(shared.as_bytes()).unwrap();
            zip.start_file("xl/worksheets/data.xml", options).unwrap();
            zip.write_all(sheet.as_bytes()).unwrap();
            zip.finish().unwrap();
        }
        buffer.into_inner()
    }

    #[test]
    fn test_column_index() {
        assert_eq!(column_index("A1"), Some(0));
        assert_eq!(column_index("Z9"), Some(25));
        assert_eq!(column_index("AA10"), Some(26));
        assert_eq!(column_index("ab3"), Some(27));
        assert_eq!(column_index("12"), None);
    }

    #[test]
    fn test_reads_first_sheet_through_relationships() {
        let bytes = workbook(&[
            &["Product Code", "Product", "Sessions"],
            &["A1", "MacBook Air & Pro", "1200"],
        ]);
        let rows = read_first_sheet(&bytes).unwrap();
        assert_eq!(rows[0], vec!["Product Code", "Product", "Sessions"]);
        assert_eq!(rows[1], vec!["A1", "MacBook Air & Pro", "1200"]);
    }

    #[test]
    fn test_sparse_cells_keep_their_columns() {
        let xml = br#"<worksheet><sheetData>
            <row r="1"><c r="A1" t="inlineStr"><is><t>x</t></is></c><c r="C1"><v>3</v></c></row>
            <row r="2"><c r="B2" t="b"><v>1</v></c></row>
        </sheetData></worksheet>"#;
        let rows = worksheet_rows(xml, &[]).unwrap();
        assert_eq!(rows, vec![vec!["x", "", "3"], vec!["", "TRUE"]]);
    }
}
