//! Minimal OOXML workbook reader producing plain cell grids.
//!
//! Only what the timetable layout needs is decoded: shared strings, inline strings
//! and raw cell values of every worksheet, in workbook order.

use super::grid::CellGrid;
use crate::error::TimetableError;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::HashMap;
use std::io::{Cursor, Read};
use zip::result::ZipError;
use zip::ZipArchive;

const WORKBOOK_PATH: &str = "xl/workbook.xml";
const WORKBOOK_RELS_PATH: &str = "xl/_rels/workbook.xml.rels";
const SHARED_STRINGS_PATH: &str = "xl/sharedStrings.xml";

/// A worksheet and its decoded cells.
#[derive(Debug, Clone)]
pub struct Worksheet {
    pub name: String,
    pub grid: CellGrid,
}

struct SheetEntry {
    name: String,
    rel_id: Option<String>,
}

/// Decodes every worksheet of an `.xlsx` file.
pub fn read_workbook(bytes: &[u8]) -> Result<Vec<Worksheet>, TimetableError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;

    let shared = match read_entry(&mut archive, SHARED_STRINGS_PATH)? {
        Some(xml) => parse_shared_strings(&xml)?,
        None => Vec::new(),
    };
    let workbook = read_entry(&mut archive, WORKBOOK_PATH)?
        .ok_or_else(|| TimetableError::parse("xlsx container", "missing xl/workbook.xml"))?;
    let sheets = parse_workbook(&workbook)?;
    let relationships = match read_entry(&mut archive, WORKBOOK_RELS_PATH)? {
        Some(xml) => parse_relationships(&xml)?,
        None => HashMap::new(),
    };

    let mut worksheets = Vec::with_capacity(sheets.len());
    for (index, sheet) in sheets.into_iter().enumerate() {
        let target = sheet
            .rel_id
            .as_ref()
            .and_then(|id| relationships.get(id))
            .map(|target| normalize_target(target))
            .unwrap_or_else(|| format!("xl/worksheets/sheet{}.xml", index + 1));
        let xml = read_entry(&mut archive, &target)?.ok_or_else(|| {
            TimetableError::parse("xlsx container", format!("missing worksheet {}", target))
        })?;
        worksheets.push(Worksheet {
            name: sheet.name,
            grid: parse_sheet(&xml, &shared)?,
        });
    }
    Ok(worksheets)
}

fn read_entry(
    archive: &mut ZipArchive<Cursor<&[u8]>>,
    name: &str,
) -> Result<Option<Vec<u8>>, TimetableError> {
    match archive.by_name(name) {
        Ok(mut file) => {
            let mut buf = Vec::new();
            file.read_to_end(&mut buf)
                .map_err(|e| TimetableError::parse("xlsx container", format!("{}: {}", name, e)))?;
            Ok(Some(buf))
        }
        Err(ZipError::FileNotFound) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn normalize_target(target: &str) -> String {
    let trimmed = target.trim_start_matches('/');
    if trimmed.starts_with("xl/") {
        trimmed.to_string()
    } else {
        format!("xl/{}", trimmed)
    }
}

fn attribute(element: &BytesStart<'_>, key: &[u8]) -> Result<Option<String>, TimetableError> {
    for attr in element.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        if attr.key.as_ref() == key {
            return Ok(Some(attr.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

fn parse_shared_strings(xml: &[u8]) -> Result<Vec<String>, TimetableError> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut strings = Vec::new();
    let mut current = String::new();
    let mut in_text = false;
    // Phonetic runs repeat the reading of the text and are skipped
    let mut in_phonetic = false;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"si" => current.clear(),
                b"t" => in_text = !in_phonetic,
                b"rPh" => in_phonetic = true,
                _ => {}
            },
            Event::End(e) => match e.local_name().as_ref() {
                b"si" => strings.push(std::mem::take(&mut current)),
                b"t" => in_text = false,
                b"rPh" => in_phonetic = false,
                _ => {}
            },
            Event::Empty(e) if e.local_name().as_ref() == b"si" => strings.push(String::new()),
            Event::Text(text) if in_text => current.push_str(&text.unescape()?),
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

fn parse_workbook(xml: &[u8]) -> Result<Vec<SheetEntry>, TimetableError> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut sheets = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"sheet" => {
                if let Some(name) = attribute(&e, b"name")? {
                    sheets.push(SheetEntry {
                        name,
                        rel_id: attribute(&e, b"r:id")?,
                    });
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(sheets)
}

fn parse_relationships(xml: &[u8]) -> Result<HashMap<String, String>, TimetableError> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut map = HashMap::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"Relationship" => {
                let id = attribute(&e, b"Id")?;
                let target = attribute(&e, b"Target")?;
                let is_sheet = attribute(&e, b"Type")?
                    .map(|t| t.contains("worksheet"))
                    .unwrap_or(false);
                if let (Some(id), Some(target), true) = (id, target, is_sheet) {
                    map.insert(id, target);
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(map)
}

/// Cell currently being read inside `<c>`.
struct PendingCell {
    row: u32,
    col: u32,
    cell_type: Option<String>,
    value: String,
}

fn parse_sheet(xml: &[u8], shared: &[String]) -> Result<CellGrid, TimetableError> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut grid = CellGrid::new();

    let mut row = 0u32;
    let mut col = 0u32;
    let mut cell: Option<PendingCell> = None;
    let mut in_value = false;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) if e.local_name().as_ref() == b"row" => {
                row = match attribute(&e, b"r")? {
                    Some(r) => r.parse().map_err(|_| bad_sheet(format!("bad row {}", r)))?,
                    None => row + 1,
                };
                col = 0;
            }
            Event::Start(e) if e.local_name().as_ref() == b"c" => {
                let (r, c) = match attribute(&e, b"r")? {
                    Some(reference) => cell_position(&reference)
                        .ok_or_else(|| bad_sheet(format!("bad cell reference {}", reference)))?,
                    None => (row, col + 1),
                };
                row = r;
                col = c;
                cell = Some(PendingCell {
                    row: r,
                    col: c,
                    cell_type: attribute(&e, b"t")?,
                    value: String::new(),
                });
            }
            Event::Empty(e) if e.local_name().as_ref() == b"c" => {
                if let Some(reference) = attribute(&e, b"r")? {
                    if let Some((r, c)) = cell_position(&reference) {
                        row = r;
                        col = c;
                    }
                } else {
                    col += 1;
                }
            }
            Event::Start(e) if matches!(e.local_name().as_ref(), b"v" | b"t") => {
                in_value = cell.is_some();
            }
            Event::End(e) if matches!(e.local_name().as_ref(), b"v" | b"t") => in_value = false,
            Event::Text(text) if in_value => {
                if let Some(pending) = cell.as_mut() {
                    pending.value.push_str(&text.unescape()?);
                }
            }
            Event::End(e) if e.local_name().as_ref() == b"c" => {
                if let Some(pending) = cell.take() {
                    let text = resolve_value(&pending, shared)?;
                    grid.set(pending.row, pending.col, &text);
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(grid)
}

fn resolve_value(cell: &PendingCell, shared: &[String]) -> Result<String, TimetableError> {
    match cell.cell_type.as_deref() {
        Some("s") => {
            let index: usize = cell
                .value
                .trim()
                .parse()
                .map_err(|_| bad_sheet(format!("bad shared string index {:?}", cell.value)))?;
            shared
                .get(index)
                .cloned()
                .ok_or_else(|| bad_sheet(format!("shared string {} out of bounds", index)))
        }
        _ => Ok(cell.value.clone()),
    }
}

/// Converts an `A1` style reference to 1-based `(row, column)`.
fn cell_position(reference: &str) -> Option<(u32, u32)> {
    let split = reference.find(|c: char| c.is_ascii_digit())?;
    let (letters, digits) = reference.split_at(split);
    if letters.is_empty() {
        return None;
    }

    let mut col: u32 = 0;
    for ch in letters.chars() {
        if !ch.is_ascii_alphabetic() {
            return None;
        }
        col = col
            .checked_mul(26)?
            .checked_add(ch.to_ascii_uppercase() as u32 - 'A' as u32 + 1)?;
    }
    let row: u32 = digits.parse().ok()?;
    if row == 0 {
        return None;
    }
    Some((row, col))
}

fn bad_sheet(message: String) -> TimetableError {
    TimetableError::parse("xlsx worksheet", message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_position() {
        assert_eq!(cell_position("A1"), Some((1, 1)));
        assert_eq!(cell_position("F2"), Some((2, 6)));
        assert_eq!(cell_position("AA10"), Some((10, 27)));
        assert_eq!(cell_position("10"), None);
        assert_eq!(cell_position("A0"), None);
    }

    #[test]
    fn test_shared_strings_flatten_runs() {
        let xml = r#"<?xml version="1.0"?>
<sst>
  <si><t>КМБО-01-22</t></si>
  <si><r><t>Мат</t></r><r><t xml:space="preserve">ан &amp; алгебра</t></r><rPh><t>x</t></rPh></si>
  <si/>
</sst>"#;
        let strings = parse_shared_strings(xml.as_bytes()).unwrap();
        assert_eq!(strings, vec!["КМБО-01-22", "Матан & алгебра", ""]);
    }

    #[test]
    fn test_sheet_values() {
        let xml = r#"<worksheet><sheetData>
  <row r="2"><c r="F2" t="s"><v>0</v></c></row>
  <row r="5"><c r="F5" t="inlineStr"><is><t>Физика</t></is></c><c r="G5"><v>42</v></c><c r="H5"/></row>
</sheetData></worksheet>"#;
        let shared = vec!["КМБО-01-22".to_string()];
        let grid = parse_sheet(xml.as_bytes(), &shared).unwrap();
        assert_eq!(grid.get(2, 6), "КМБО-01-22");
        assert_eq!(grid.get(5, 6), "Физика");
        assert_eq!(grid.get(5, 7), "42");
        assert_eq!(grid.max_row(), 5);
    }

    #[test]
    fn test_shared_index_out_of_bounds() {
        let xml = r#"<worksheet><sheetData><row r="1"><c r="A1" t="s"><v>3</v></c></row></sheetData></worksheet>"#;
        assert!(matches!(
            parse_sheet(xml.as_bytes(), &[]),
            Err(TimetableError::Parse { .. })
        ));
    }

    #[test]
    fn test_not_a_zip() {
        assert!(matches!(
            read_workbook(b"definitely not a workbook"),
            Err(TimetableError::Parse { .. })
        ));
    }

    #[test]
    fn test_relationship_targets() {
        assert_eq!(normalize_target("worksheets/sheet1.xml"), "xl/worksheets/sheet1.xml");
        assert_eq!(normalize_target("/xl/worksheets/sheet2.xml"), "xl/worksheets/sheet2.xml");
    }
}
