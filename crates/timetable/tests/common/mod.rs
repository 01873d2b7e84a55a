#![allow(dead_code)]

use std::collections::BTreeMap;
use std::io::{Cursor, Write};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

/// Autumn 2024 calendar feed: Monday 09:00 lecture every other week from Sept 2.
pub const FEED: &str = "BEGIN:VCALENDAR\r\n\
VERSION:2.0\r\n\
X-WR-CALNAME:КМБО-01-22\r\n\
BEGIN:VEVENT\r\n\
DTSTART:20240902T090000\r\n\
DTEND:20240902T103000\r\n\
RRULE:FREQ=WEEKLY;INTERVAL=2;UNTIL=20241231T235959\r\n\
SUMMARY:ЛК Математический анализ\r\n\
LOCATION:А-101 (В-78)\r\n\
DESCRIPTION:Преподаватель: Иванов Иван Иванович\r\n\
END:VEVENT\r\n\
END:VCALENDAR\r\n";

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn row_of(reference: &str) -> u32 {
    reference
        .trim_start_matches(|c: char| c.is_ascii_alphabetic())
        .parse()
        .unwrap()
}

/// Builds a one-sheet `.xlsx` holding the given `("F2", "text")` cells as inline strings.
pub fn workbook(cells: &[(&str, &str)]) -> Vec<u8> {
    let mut rows: BTreeMap<u32, Vec<(&str, &str)>> = BTreeMap::new();
    for &(reference, value) in cells {
        rows.entry(row_of(reference)).or_default().push((reference, value));
    }

    let mut sheet = String::from(
        r#"<?xml version="1.0" encoding="UTF-8"?><worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>"#,
    );
    for (row, cells) in rows {
        sheet.push_str(&format!(r#"<row r="{}">"#, row));
        for (reference, value) in cells {
            sheet.push_str(&format!(
                r#"<c r="{}" t="inlineStr"><is><t>{}</t></is></c>"#,
                reference,
                escape(value)
            ));
        }
        sheet.push_str("</row>");
    }
    sheet.push_str("</sheetData></worksheet>");

    let workbook = r#"<?xml version="1.0" encoding="UTF-8"?><workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets><sheet name="Расписание" sheetId="1" r:id="rId1"/></sheets></workbook>"#;
    let rels = r#"<?xml version="1.0" encoding="UTF-8"?><Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/></Relationships>"#;
    let content_types = r#"<?xml version="1.0" encoding="UTF-8"?><Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="xml" ContentType="application/xml"/><Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/><Override PartName="/xl/worksheets/sheet1.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/></Types>"#;

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();
    for (name, body) in [
        ("[Content_Types].xml", content_types),
        ("xl/workbook.xml", workbook),
        ("xl/_rels/workbook.xml.rels", rels),
        ("xl/worksheets/sheet1.xml", sheet.as_str()),
    ] {
        zip.start_file(name, options).unwrap();
        zip.write_all(body.as_bytes()).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

/// Two groups: КМБО-01-22 in the first block, КМБО-02-22 in the second half of it.
///
/// Monday pair 1: odd weeks a lecture in `room`, even weeks a lab; the second group has
/// a seminar in odd weeks only.
pub fn timetable_workbook(room: &str) -> Vec<u8> {
    let room = format!("ауд. {} (В-78)", room);
    workbook(&[
        ("F2", "КМБО-01-22"),
        ("K2", "КМБО-02-22"),
        ("F4", "Физика"),
        ("G4", "ЛАБ"),
        ("H4", "Петров П.П."),
        ("I4", "ауд. Б-101 (В-78)"),
        ("F5", "Математический анализ"),
        ("G5", "ЛК"),
        ("H5", "Иванов И.И."),
        ("I5", room.as_str()),
        ("K5", "История"),
        ("L5", "ПР"),
        ("M5", "Сидоров С.С."),
        ("N5", "ауд. В-200 (В-78)"),
    ])
}
