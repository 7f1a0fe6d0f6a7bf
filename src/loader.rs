//! Tabular document loading.
//!
//! Turns an uploaded spreadsheet into [`DocumentRecord`]s, one per data row.
//! The first non-blank row of each sheet (or of a delimited file) is the
//! header; every following row becomes a record whose text lists each
//! non-empty cell as `header: value`, one per line.
//!
//! Supported formats, chosen by file extension:
//!
//! | Extension | Reader |
//! |-----------|--------|
//! | `.csv` | `csv`, comma-delimited |
//! | `.tsv` | `csv`, tab-delimited |
//! | `.xlsx` | `zip` + `quick-xml` over the OOXML parts |
//!
//! Workbooks over the sheet, row, column or cell caps are rejected as
//! unsupported rather than loaded in part. Loading has no side effects
//! beyond reading the file.

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use quick_xml::events::Event;

use crate::error::{RagError, Result};
use crate::models::{DocumentRecord, RecordOrigin};

/// Maximum sheets to read from a workbook.
const XLSX_MAX_SHEETS: usize = 100;
/// Maximum rows per sheet.
const XLSX_MAX_ROWS_PER_SHEET: usize = 100_000;
/// Maximum cell slots per sheet, including gaps skipped by column references.
const XLSX_MAX_CELLS_PER_SHEET: usize = 1_000_000;
/// Columns in a worksheet, `A` through `XFD`.
const XLSX_MAX_COLUMNS: usize = 16_384;
/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Tabular formats the loader understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TabularFormat {
    Csv,
    Tsv,
    Xlsx,
}

impl TabularFormat {
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "csv" => Ok(Self::Csv),
            "tsv" => Ok(Self::Tsv),
            "xlsx" => Ok(Self::Xlsx),
            "" => Err(RagError::unsupported_format(format!(
                "{} has no file extension",
                path.display()
            ))),
            other => Err(RagError::unsupported_format(format!(
                "'.{}' files are not supported (expected .csv, .tsv or .xlsx)",
                other
            ))),
        }
    }
}

/// Load a tabular document from disk.
///
/// Fails with [`RagError::UnsupportedFormat`] when the extension is unknown
/// or the content cannot be parsed, and [`RagError::EmptyDocument`] when no
/// data rows remain.
pub fn load_document(path: &Path) -> Result<Vec<DocumentRecord>> {
    let format = TabularFormat::from_path(path)?;
    let bytes = std::fs::read(path).map_err(|e| RagError::io("reading upload", e))?;
    let source = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    load_bytes(&source, format, &bytes)
}

/// Load records from in-memory file content.
pub fn load_bytes(source: &str, format: TabularFormat, bytes: &[u8]) -> Result<Vec<DocumentRecord>> {
    let records = match format {
        TabularFormat::Csv => load_delimited(source, bytes, b',')?,
        TabularFormat::Tsv => load_delimited(source, bytes, b'\t')?,
        TabularFormat::Xlsx => load_xlsx(source, bytes)?,
    };
    if records.is_empty() {
        return Err(RagError::EmptyDocument {
            file: source.to_string(),
        });
    }
    Ok(records)
}

/// Render one data row as `header: value` lines. Returns `None` for rows
/// with no non-empty cells.
fn render_row(headers: &[String], cells: &[String]) -> Option<String> {
    let lines: Vec<String> = cells
        .iter()
        .enumerate()
        .filter_map(|(col, value)| {
            let value = value.trim();
            if value.is_empty() {
                return None;
            }
            let header = headers
                .get(col)
                .map(|h| h.trim())
                .filter(|h| !h.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| column_name(col));
            Some(format!("{}: {}", header, value))
        })
        .collect();
    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

// ============ Delimited text ============

fn load_delimited(source: &str, bytes: &[u8], delimiter: u8) -> Result<Vec<DocumentRecord>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(bytes);

    let mut headers: Option<Vec<String>> = None;
    let mut records = Vec::new();

    for (idx, row) in reader.records().enumerate() {
        let row = row.map_err(|e| RagError::unsupported_format(format!("{}: {}", source, e)))?;
        let cells: Vec<String> = row.iter().map(str::to_string).collect();
        let row_number = row.position().map(|p| p.line() as usize).unwrap_or(idx + 1);

        match &headers {
            None => {
                if cells.iter().any(|c| !c.trim().is_empty()) {
                    headers = Some(cells);
                }
            }
            Some(h) => {
                if let Some(text) = render_row(h, &cells) {
                    records.push(DocumentRecord::new(
                        text,
                        RecordOrigin {
                            source: source.to_string(),
                            sheet: None,
                            row: row_number,
                        },
                    ));
                }
            }
        }
    }

    Ok(records)
}

// ============ XLSX ============

fn ooxml_error(e: impl std::fmt::Display) -> RagError {
    RagError::unsupported_format(format!("invalid workbook: {}", e))
}

/// Per-sheet size caps.
#[derive(Debug, Clone, Copy)]
struct SheetLimits {
    rows: usize,
    cells: usize,
}

const SHEET_LIMITS: SheetLimits = SheetLimits {
    rows: XLSX_MAX_ROWS_PER_SHEET,
    cells: XLSX_MAX_CELLS_PER_SHEET,
};

type Archive<'a> = zip::ZipArchive<std::io::Cursor<&'a [u8]>>;

fn load_xlsx(source: &str, bytes: &[u8]) -> Result<Vec<DocumentRecord>> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(ooxml_error)?;
    let shared_strings = read_shared_strings(&mut archive)?;
    let sheets = resolve_sheets(&mut archive)?;
    if sheets.is_empty() {
        return Err(ooxml_error("no worksheets found"));
    }
    if sheets.len() > XLSX_MAX_SHEETS {
        return Err(RagError::unsupported_format(format!(
            "{}: workbook has {} sheets, the limit is {}",
            source,
            sheets.len(),
            XLSX_MAX_SHEETS
        )));
    }

    let mut records = Vec::new();
    for (sheet_name, part) in sheets {
        let xml = read_zip_entry_bounded(&mut archive, &part, MAX_XML_ENTRY_BYTES)?;
        let rows = read_sheet_rows(&xml, &shared_strings, SHEET_LIMITS).map_err(|e| match e {
            RagError::UnsupportedFormat { message } => RagError::unsupported_format(format!(
                "{} (sheet '{}'): {}",
                source, sheet_name, message
            )),
            other => other,
        })?;

        let mut headers: Option<Vec<String>> = None;
        for (row_number, cells) in rows {
            match &headers {
                None => {
                    if cells.iter().any(|c| !c.trim().is_empty()) {
                        headers = Some(cells);
                    }
                }
                Some(h) => {
                    if let Some(text) = render_row(h, &cells) {
                        records.push(DocumentRecord::new(
                            text,
                            RecordOrigin {
                                source: source.to_string(),
                                sheet: Some(sheet_name.clone()),
                                row: row_number,
                            },
                        ));
                    }
                }
            }
        }
    }

    Ok(records)
}

fn read_zip_entry_bounded(archive: &mut Archive<'_>, name: &str, max_bytes: u64) -> Result<Vec<u8>> {
    let entry = archive.by_name(name).map_err(ooxml_error)?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(ooxml_error)?;
    if out.len() as u64 >= max_bytes {
        return Err(ooxml_error(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        )));
    }
    Ok(out)
}

/// Shared string table. Absent in workbooks that only hold numbers or
/// inline strings. Rich-text runs inside one `<si>` are concatenated.
fn read_shared_strings(archive: &mut Archive<'_>) -> Result<Vec<String>> {
    if archive.index_for_name("xl/sharedStrings.xml").is_none() {
        return Ok(Vec::new());
    }
    let xml = read_zip_entry_bounded(archive, "xl/sharedStrings.xml", MAX_XML_ENTRY_BYTES)?;
    let mut strings = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    let mut buf = Vec::new();
    let mut current: Option<String> = None;
    let mut in_t = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"t" => in_t = current.is_some(),
                _ => {}
            },
            Ok(Event::Text(te)) if in_t => {
                if let Some(s) = current.as_mut() {
                    s.push_str(te.unescape().unwrap_or_default().as_ref());
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_t = false,
                b"si" => strings.push(current.take().unwrap_or_default()),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ooxml_error(e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

/// A `<sheet>` entry of `xl/workbook.xml`.
struct WorkbookSheet {
    name: String,
    rel_id: Option<String>,
}

/// Worksheets as `(display name, part path)`, in workbook order.
///
/// Each `<sheet>` names its part through a relationship id resolved in
/// `xl/_rels/workbook.xml.rels`. Workbooks without usable relationships
/// fall back to the `xl/worksheets/sheetN.xml` parts in numeric order.
fn resolve_sheets(archive: &mut Archive<'_>) -> Result<Vec<(String, String)>> {
    let sheets = read_workbook_sheets(archive)?;
    let targets = read_workbook_relationships(archive)?;

    let resolved: Vec<(String, String)> = sheets
        .iter()
        .filter_map(|sheet| {
            let part = targets.get(sheet.rel_id.as_deref()?)?;
            archive
                .index_for_name(part)
                .map(|_| (sheet.name.clone(), part.clone()))
        })
        .collect();
    if !resolved.is_empty() {
        return Ok(resolved);
    }

    Ok(list_worksheet_parts(archive)
        .into_iter()
        .enumerate()
        .map(|(idx, part)| {
            let name = sheets
                .get(idx)
                .map(|s| s.name.clone())
                .unwrap_or_else(|| format!("Sheet{}", idx + 1));
            (name, part)
        })
        .collect())
}

fn read_workbook_sheets(archive: &mut Archive<'_>) -> Result<Vec<WorkbookSheet>> {
    if archive.index_for_name("xl/workbook.xml").is_none() {
        return Ok(Vec::new());
    }
    let xml = read_zip_entry_bounded(archive, "xl/workbook.xml", MAX_XML_ENTRY_BYTES)?;
    let mut sheets = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if e.local_name().as_ref() == b"sheet" => {
                let mut name = None;
                let mut rel_id = None;
                for attr in e.attributes().flatten() {
                    let value = String::from_utf8_lossy(&attr.value).into_owned();
                    match attr.key.local_name().as_ref() {
                        b"name" => name = Some(value),
                        b"id" => rel_id = Some(value),
                        _ => {}
                    }
                }
                if let Some(name) = name {
                    sheets.push(WorkbookSheet { name, rel_id });
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ooxml_error(e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(sheets)
}

/// Relationship id to archive part path, from `xl/_rels/workbook.xml.rels`.
fn read_workbook_relationships(archive: &mut Archive<'_>) -> Result<HashMap<String, String>> {
    const RELS: &str = "xl/_rels/workbook.xml.rels";
    if archive.index_for_name(RELS).is_none() {
        return Ok(HashMap::new());
    }
    let xml = read_zip_entry_bounded(archive, RELS, MAX_XML_ENTRY_BYTES)?;
    let mut targets = HashMap::new();
    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e))
                if e.local_name().as_ref() == b"Relationship" =>
            {
                let mut id = None;
                let mut target = None;
                for attr in e.attributes().flatten() {
                    let value = String::from_utf8_lossy(&attr.value).into_owned();
                    match attr.key.as_ref() {
                        b"Id" => id = Some(value),
                        b"Target" => target = Some(value),
                        _ => {}
                    }
                }
                if let (Some(id), Some(target)) = (id, target) {
                    targets.insert(id, part_path(&target));
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ooxml_error(e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(targets)
}

/// Archive path of a workbook relationship target. Relative targets are
/// relative to `xl/`; absolute ones start at the package root.
fn part_path(target: &str) -> String {
    match target.strip_prefix('/') {
        Some(absolute) => absolute.to_string(),
        None => format!("xl/{}", target.trim_start_matches("./")),
    }
}

fn list_worksheet_parts(archive: &Archive<'_>) -> Vec<String> {
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("xl/worksheets/sheet") && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    names.sort_by_key(|name| {
        name.trim_start_matches("xl/worksheets/sheet")
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });
    names
}

#[derive(Clone, Copy, PartialEq)]
enum CellType {
    Shared,
    Inline,
    Boolean,
    Plain,
}

/// Parse a worksheet into `(row number, cells)` pairs, cells positioned by
/// their column reference.
///
/// A sheet over `limits` is rejected rather than cut short. Gaps left by a
/// column reference count toward the cell limit.
fn read_sheet_rows(
    xml: &[u8],
    shared_strings: &[String],
    limits: SheetLimits,
) -> Result<Vec<(usize, Vec<String>)>> {
    let mut rows = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();

    let mut row_number = 0usize;
    let mut cells: Vec<String> = Vec::new();
    let mut cell_slots = 0usize;
    let mut cell_col = 0usize;
    let mut cell_type = CellType::Plain;
    let mut cell_value = String::new();
    let mut in_value = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"row" => {
                    row_number = e
                        .attributes()
                        .flatten()
                        .find(|a| a.key.as_ref() == b"r")
                        .and_then(|a| String::from_utf8_lossy(&a.value).parse().ok())
                        .unwrap_or(row_number + 1);
                    cells.clear();
                }
                b"c" => {
                    cell_col = cells.len();
                    cell_type = CellType::Plain;
                    cell_value.clear();
                    for attr in e.attributes().flatten() {
                        match attr.key.as_ref() {
                            b"r" => {
                                if let Some(col) = column_index(&String::from_utf8_lossy(&attr.value))? {
                                    cell_col = col;
                                }
                            }
                            b"t" => {
                                cell_type = match attr.value.as_ref() {
                                    b"s" => CellType::Shared,
                                    b"inlineStr" => CellType::Inline,
                                    b"b" => CellType::Boolean,
                                    _ => CellType::Plain,
                                };
                            }
                            _ => {}
                        }
                    }
                }
                b"v" => in_value = true,
                b"t" if cell_type == CellType::Inline => in_value = true,
                _ => {}
            },
            Ok(Event::Text(te)) if in_value => {
                cell_value.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"c" => {
                    if cell_col >= XLSX_MAX_COLUMNS {
                        return Err(ooxml_error(format!(
                            "row {} has more than {} columns",
                            row_number, XLSX_MAX_COLUMNS
                        )));
                    }
                    if cells.len() <= cell_col {
                        cell_slots += cell_col + 1 - cells.len();
                        if cell_slots > limits.cells {
                            return Err(RagError::unsupported_format(format!(
                                "sheet exceeds the limit of {} cells",
                                limits.cells
                            )));
                        }
                        cells.resize(cell_col + 1, String::new());
                    }
                    cells[cell_col] = match cell_type {
                        CellType::Shared => cell_value
                            .trim()
                            .parse::<usize>()
                            .ok()
                            .and_then(|i| shared_strings.get(i).cloned())
                            .unwrap_or_default(),
                        CellType::Boolean => match cell_value.trim() {
                            "1" => "TRUE".to_string(),
                            "0" => "FALSE".to_string(),
                            other => other.to_string(),
                        },
                        CellType::Inline | CellType::Plain => cell_value.clone(),
                    };
                }
                b"row" => {
                    if rows.len() >= limits.rows {
                        return Err(RagError::unsupported_format(format!(
                            "sheet exceeds the limit of {} rows",
                            limits.rows
                        )));
                    }
                    rows.push((row_number, std::mem::take(&mut cells)));
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ooxml_error(e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(rows)
}

/// Zero-based column index from a cell reference such as `"AB12"`.
/// `Ok(None)` when the reference has no column letters; an error when the
/// column lies past `XFD`.
fn column_index(cell_ref: &str) -> Result<Option<usize>> {
    let mut index = 0usize;
    let mut seen = false;
    for b in cell_ref.bytes().take_while(u8::is_ascii_alphabetic) {
        seen = true;
        index = index * 26 + (b.to_ascii_uppercase() - b'A' + 1) as usize;
        if index > XLSX_MAX_COLUMNS {
            let shown: String = cell_ref.chars().take(16).collect();
            return Err(ooxml_error(format!(
                "cell reference {} is past the last column (XFD)",
                shown
            )));
        }
    }
    Ok(seen.then(|| index - 1))
}

/// Spreadsheet-style column name (`A`, `B`, …, `AA`) for a zero-based index.
fn column_name(mut index: usize) -> String {
    let mut name = Vec::new();
    loop {
        name.push(b'A' + (index % 26) as u8);
        if index < 26 {
            break;
        }
        index = index / 26 - 1;
    }
    name.reverse();
    String::from_utf8(name).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    const MAIN_NS: &str = "http://schemas.openxmlformats.org/spreadsheetml/2006/main";
    const REL_NS: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";

    fn worksheet(rows_xml: &str) -> String {
        format!(
            "<?xml version=\"1.0\"?><worksheet xmlns=\"{}\"><sheetData>{}</sheetData></worksheet>",
            MAIN_NS, rows_xml
        )
    }

    /// Zip up workbook parts. `sheets` pairs each display name with its
    /// relationship target; `rels` controls whether
    /// `xl/_rels/workbook.xml.rels` is written.
    fn workbook_zip(
        sheets: &[(&str, &str)],
        rels: bool,
        shared: &[String],
        parts: &[(&str, String)],
    ) -> Vec<u8> {
        let mut workbook = format!(
            "<?xml version=\"1.0\"?><workbook xmlns=\"{}\" xmlns:r=\"{}\"><sheets>",
            MAIN_NS, REL_NS
        );
        let mut relationships = String::from(
            "<?xml version=\"1.0\"?><Relationships xmlns=\"http://schemas.openxmlformats.org/package/2006/relationships\">",
        );
        for (i, (name, target)) in sheets.iter().enumerate() {
            workbook.push_str(&format!(
                "<sheet name=\"{}\" sheetId=\"{}\" r:id=\"rId{}\"/>",
                name,
                i + 1,
                i + 1
            ));
            relationships.push_str(&format!(
                "<Relationship Id=\"rId{}\" Type=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet\" Target=\"{}\"/>",
                i + 1,
                target
            ));
        }
        workbook.push_str("</sheets></workbook>");
        relationships.push_str("</Relationships>");

        let mut sst = format!("<?xml version=\"1.0\"?><sst xmlns=\"{}\">", MAIN_NS);
        for s in shared {
            sst.push_str(&format!("<si><t>{}</t></si>", s));
        }
        sst.push_str("</sst>");

        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            let opts = zip::write::SimpleFileOptions::default();
            zip.start_file("xl/workbook.xml", opts).unwrap();
            zip.write_all(workbook.as_bytes()).unwrap();
            if rels {
                zip.start_file("xl/_rels/workbook.xml.rels", opts).unwrap();
                zip.write_all(relationships.as_bytes()).unwrap();
            }
            zip.start_file("xl/sharedStrings.xml", opts).unwrap();
            zip.write_all(sst.as_bytes()).unwrap();
            for (name, xml) in parts {
                zip.start_file(*name, opts).unwrap();
                zip.write_all(xml.as_bytes()).unwrap();
            }
            zip.finish().unwrap();
        }
        buf
    }

    /// Worksheet XML for `rows`. Cells are inline strings except the first
    /// column of data rows, which goes through `shared`.
    fn rows_xml(rows: &[&[&str]], shared: &mut Vec<String>) -> String {
        let mut xml = String::new();
        for (r, row) in rows.iter().enumerate() {
            xml.push_str(&format!("<row r=\"{}\">", r + 1));
            for (c, value) in row.iter().enumerate() {
                let cell_ref = format!("{}{}", column_name(c), r + 1);
                if c == 0 && r > 0 {
                    shared.push(value.to_string());
                    xml.push_str(&format!(
                        "<c r=\"{}\" t=\"s\"><v>{}</v></c>",
                        cell_ref,
                        shared.len() - 1
                    ));
                } else {
                    xml.push_str(&format!(
                        "<c r=\"{}\" t=\"inlineStr\"><is><t>{}</t></is></c>",
                        cell_ref, value
                    ));
                }
            }
            xml.push_str("</row>");
        }
        worksheet(&xml)
    }

    fn minimal_xlsx(sheet: &str, rows: &[&[&str]]) -> Vec<u8> {
        let mut shared = Vec::new();
        let xml = rows_xml(rows, &mut shared);
        workbook_zip(
            &[(sheet, "worksheets/sheet1.xml")],
            true,
            &shared,
            &[("xl/worksheets/sheet1.xml", xml)],
        )
    }

    /// Header row plus one data cell at `cell_ref`.
    fn xlsx_with_cell(cell_ref: &str) -> Vec<u8> {
        let xml = worksheet(&format!(
            "<row r=\"1\"><c r=\"A1\" t=\"inlineStr\"><is><t>name</t></is></c></row>\
             <row r=\"2\"><c r=\"{}\" t=\"inlineStr\"><is><t>x</t></is></c></row>",
            cell_ref
        ));
        workbook_zip(
            &[("Data", "worksheets/sheet1.xml")],
            true,
            &[],
            &[("xl/worksheets/sheet1.xml", xml)],
        )
    }

    #[test]
    fn csv_rows_become_records() {
        let csv = "product,price,link\nWidget,9.99,https://example.com/w\nGadget,19.50,https://example.com/g\n";
        let records = load_bytes("catalog.csv", TabularFormat::Csv, csv.as_bytes()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(
            records[0].text,
            "product: Widget\nprice: 9.99\nlink: https://example.com/w"
        );
        assert_eq!(records[1].origin.row, 3);
        assert_eq!(records[1].origin.source, "catalog.csv");
        assert_eq!(records[1].origin.sheet, None);
    }

    #[test]
    fn blank_rows_and_cells_are_skipped() {
        let csv = "a,b\n,\nx,\n,y\n";
        let records = load_bytes("t.csv", TabularFormat::Csv, csv.as_bytes()).unwrap();
        let texts: Vec<_> = records.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(texts, vec!["a: x", "b: y"]);
    }

    #[test]
    fn ragged_rows_fall_back_to_column_names() {
        let csv = "name\nalpha,extra\n";
        let records = load_bytes("t.csv", TabularFormat::Csv, csv.as_bytes()).unwrap();
        assert_eq!(records[0].text, "name: alpha\nB: extra");
    }

    #[test]
    fn tsv_uses_tab_delimiter() {
        let tsv = "city\tcountry\nOslo\tNorway\n";
        let records = load_bytes("t.tsv", TabularFormat::Tsv, tsv.as_bytes()).unwrap();
        assert_eq!(records[0].text, "city: Oslo\ncountry: Norway");
    }

    #[test]
    fn header_only_is_empty_document() {
        let err = load_bytes("t.csv", TabularFormat::Csv, b"a,b,c\n").unwrap_err();
        assert_eq!(err.kind(), "empty_document");
        let err = load_bytes("t.csv", TabularFormat::Csv, b"").unwrap_err();
        assert_eq!(err.kind(), "empty_document");
    }

    #[test]
    fn non_utf8_csv_is_unsupported() {
        let err = load_bytes("t.csv", TabularFormat::Csv, b"a\n\xff\xfe\n").unwrap_err();
        assert_eq!(err.kind(), "unsupported_format");
    }

    #[test]
    fn unknown_extension_is_unsupported() {
        let err = TabularFormat::from_path(Path::new("notes.pdf")).unwrap_err();
        assert_eq!(err.kind(), "unsupported_format");
        assert_eq!(
            TabularFormat::from_path(Path::new("DATA.XLSX")).unwrap(),
            TabularFormat::Xlsx
        );
    }

    #[test]
    fn load_document_reads_from_disk() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("stock.csv");
        std::fs::write(&path, "item,qty\nrope,12\n").unwrap();

        let records = load_document(&path).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].text, "item: rope\nqty: 12");
        assert_eq!(records[0].origin.source, "stock.csv");

        let notes = tmp.path().join("notes.txt");
        std::fs::write(&notes, "item\nrope\n").unwrap();
        assert_eq!(load_document(&notes).unwrap_err().kind(), "unsupported_format");

        let missing = tmp.path().join("gone.csv");
        assert_eq!(load_document(&missing).unwrap_err().kind(), "persistence_error");
    }

    #[test]
    fn xlsx_rows_become_records() {
        let bytes = minimal_xlsx(
            "Products",
            &[
                &["name", "url"],
                &["Widget", "https://example.com/w"],
                &["Gadget", "https://example.com/g"],
            ],
        );
        let records = load_bytes("p.xlsx", TabularFormat::Xlsx, &bytes).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].text, "name: Widget\nurl: https://example.com/w");
        assert_eq!(records[1].origin.sheet.as_deref(), Some("Products"));
        assert_eq!(records[1].origin.row, 3);
    }

    #[test]
    fn sheet_names_follow_workbook_relationships() {
        let mut shared = Vec::new();
        let links = rows_xml(&[&["name", "link"], &["Tent", "https://shop.example/tent"]], &mut shared);
        let prices = rows_xml(&[&["name", "price"], &["Stove", "40"]], &mut shared);
        // Workbook order differs from part numbering; one target is absolute.
        let bytes = workbook_zip(
            &[
                ("Prices", "/xl/worksheets/sheet2.xml"),
                ("Links", "worksheets/sheet1.xml"),
            ],
            true,
            &shared,
            &[
                ("xl/worksheets/sheet1.xml", links),
                ("xl/worksheets/sheet2.xml", prices),
            ],
        );

        let records = load_bytes("shop.xlsx", TabularFormat::Xlsx, &bytes).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].text, "name: Stove\nprice: 40");
        assert_eq!(records[0].origin.sheet.as_deref(), Some("Prices"));
        assert_eq!(records[1].text, "name: Tent\nlink: https://shop.example/tent");
        assert_eq!(records[1].origin.sheet.as_deref(), Some("Links"));
    }

    #[test]
    fn workbook_without_relationships_uses_part_order() {
        let mut shared = Vec::new();
        let xml = rows_xml(&[&["name"], &["Lantern"]], &mut shared);
        let bytes = workbook_zip(
            &[("Gear", "worksheets/sheet1.xml")],
            false,
            &shared,
            &[("xl/worksheets/sheet1.xml", xml)],
        );
        let records = load_bytes("g.xlsx", TabularFormat::Xlsx, &bytes).unwrap();
        assert_eq!(records[0].origin.sheet.as_deref(), Some("Gear"));
    }

    #[test]
    fn invalid_zip_is_unsupported() {
        let err = load_bytes("p.xlsx", TabularFormat::Xlsx, b"not a zip").unwrap_err();
        assert_eq!(err.kind(), "unsupported_format");
    }

    #[test]
    fn columns_past_xfd_are_rejected() {
        for cell_ref in ["XFE2", "ZZZZZZZZZ2", "ZZZZZZZZZZZZZZZ2"] {
            let bytes = xlsx_with_cell(cell_ref);
            let err = load_bytes("wide.xlsx", TabularFormat::Xlsx, &bytes).unwrap_err();
            assert_eq!(err.kind(), "unsupported_format", "{}", cell_ref);
        }

        let records = load_bytes("wide.xlsx", TabularFormat::Xlsx, &xlsx_with_cell("XFD2")).unwrap();
        assert_eq!(records[0].text, "XFD: x");
    }

    #[test]
    fn sheet_over_cell_limit_is_rejected() {
        let xml = worksheet(
            "<row r=\"1\"><c r=\"A1\"><v>1</v></c></row><row r=\"2\"><c r=\"J2\"><v>2</v></c></row>",
        );
        let limits = SheetLimits { rows: 10, cells: 5 };
        let err = read_sheet_rows(xml.as_bytes(), &[], limits).unwrap_err();
        assert_eq!(err.kind(), "unsupported_format");
        assert!(err.to_string().contains("5 cells"));

        let roomy = SheetLimits { rows: 10, cells: 11 };
        let rows = read_sheet_rows(xml.as_bytes(), &[], roomy).unwrap();
        assert_eq!(rows[1].1.len(), 10);
    }

    #[test]
    fn sheet_over_row_limit_is_rejected() {
        let xml = worksheet(
            "<row r=\"1\"><c r=\"A1\"><v>1</v></c></row>\
             <row r=\"2\"><c r=\"A2\"><v>2</v></c></row>\
             <row r=\"3\"><c r=\"A3\"><v>3</v></c></row>",
        );
        let err = read_sheet_rows(xml.as_bytes(), &[], SheetLimits { rows: 2, cells: 100 })
            .unwrap_err();
        assert_eq!(err.kind(), "unsupported_format");
        assert!(err.to_string().contains("2 rows"));

        let rows = read_sheet_rows(xml.as_bytes(), &[], SheetLimits { rows: 3, cells: 100 }).unwrap();
        assert_eq!(rows.len(), 3);
    }

    #[test]
    fn column_references() {
        assert_eq!(column_index("A1").unwrap(), Some(0));
        assert_eq!(column_index("Z9").unwrap(), Some(25));
        assert_eq!(column_index("AA10").unwrap(), Some(26));
        assert_eq!(column_index("xfd3").unwrap(), Some(16_383));
        assert_eq!(column_index("12").unwrap(), None);
        assert!(column_index("XFE1").is_err());
        assert!(column_index("ZZZZZZZZZZZZZZZ2").is_err());
        assert_eq!(column_name(0), "A");
        assert_eq!(column_name(26), "AA");
        assert_eq!(column_name(701), "ZZ");
    }
}
