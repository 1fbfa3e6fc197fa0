use std::collections::{BTreeSet, HashMap};

use chrono::NaiveDate;
use mongodb::bson::oid::ObjectId;
use rust_xlsxwriter::{Format, Workbook, XlsxError};

use crate::models::attendance::{AttendanceRecord, AttendanceStatus, StudentAttendanceSummary};
use crate::services::attendance_service::summarize;

/// Makes a user-supplied value safe for a spreadsheet cell: values that a
/// spreadsheet would read as a formula get a leading tab, and values with
/// separators or quotes are quoted.
pub fn escape_csv_field(value: &str) -> String {
    let sanitized = if value.starts_with(['=', '+', '@', '-', '\t', '\r', '\n']) {
        format!("\t{}", value)
    } else {
        value.to_string()
    };

    if sanitized.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", sanitized.replace('"', "\"\""))
    } else {
        sanitized
    }
}

/// Lowercase ASCII slug for download file names
pub fn file_stem(name: &str) -> String {
    let slug: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    let slug = slug
        .split('-')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-");
    if slug.is_empty() {
        "class".to_string()
    } else {
        slug
    }
}

fn status_code(status: Option<AttendanceStatus>) -> &'static str {
    match status {
        Some(AttendanceStatus::Present) => "P",
        Some(AttendanceStatus::Absent) => "A",
        Some(AttendanceStatus::Late) => "L",
        None => "",
    }
}

pub struct SheetRow {
    pub marks: Vec<Option<AttendanceStatus>>,
    pub summary: StudentAttendanceSummary,
}

/// Class attendance as a student x date grid
pub struct AttendanceSheet {
    pub class_name: String,
    pub dates: Vec<NaiveDate>,
    pub rows: Vec<SheetRow>,
}

impl AttendanceSheet {
    pub fn build(
        class_name: &str,
        roster: &[(ObjectId, String)],
        records: &[AttendanceRecord],
    ) -> Self {
        let dates: Vec<NaiveDate> = records
            .iter()
            .map(|r| r.date)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let column: HashMap<NaiveDate, usize> =
            dates.iter().enumerate().map(|(i, d)| (*d, i)).collect();

        let mut marks: HashMap<ObjectId, Vec<Option<AttendanceStatus>>> = HashMap::new();
        for record in records {
            let row = marks
                .entry(record.student_id)
                .or_insert_with(|| vec![None; dates.len()]);
            if let Some(&idx) = column.get(&record.date) {
                row[idx] = Some(record.status);
            }
        }

        let rows = summarize(roster, records)
            .into_iter()
            .map(|summary| {
                let marks = ObjectId::parse_str(&summary.student_id)
                    .ok()
                    .and_then(|id| marks.get(&id).cloned())
                    .unwrap_or_else(|| vec![None; dates.len()]);
                SheetRow { marks, summary }
            })
            .collect();

        Self {
            class_name: class_name.to_string(),
            dates,
            rows,
        }
    }

    fn header(&self) -> Vec<String> {
        let mut header = vec!["Student".to_string()];
        header.extend(self.dates.iter().map(|d| d.format("%Y-%m-%d").to_string()));
        header.extend(
            ["Present", "Absent", "Late", "Total", "Rate %"]
                .iter()
                .map(|s| s.to_string()),
        );
        header
    }
}

fn rate_percent(rate: f64) -> f64 {
    (rate * 1000.0).round() / 10.0
}

pub fn render_csv(sheet: &AttendanceSheet) -> String {
    let mut out = String::new();
    out.push_str(&format!("Class,{}\n", escape_csv_field(&sheet.class_name)));

    let header: Vec<String> = sheet.header().iter().map(|h| escape_csv_field(h)).collect();
    out.push_str(&header.join(","));
    out.push('\n');

    for row in &sheet.rows {
        let mut fields = vec![escape_csv_field(&row.summary.student_name)];
        fields.extend(row.marks.iter().map(|m| status_code(*m).to_string()));
        fields.push(row.summary.present.to_string());
        fields.push(row.summary.absent.to_string());
        fields.push(row.summary.late.to_string());
        fields.push(row.summary.total.to_string());
        fields.push(format!("{:.1}", rate_percent(row.summary.rate)));
        out.push_str(&fields.join(","));
        out.push('\n');
    }

    out
}

pub fn render_xlsx(sheet: &AttendanceSheet) -> Result<Vec<u8>, XlsxError> {
    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name("Attendance")?;
    worksheet.set_column_width(0, 28.0)?;

    let header_format = Format::new().set_bold();

    worksheet.write_string_with_format(0, 0, "Class", &header_format)?;
    worksheet.write_string(0, 1, &sheet.class_name)?;

    let header_row = 2;
    for (col, title) in sheet.header().iter().enumerate() {
        worksheet.write_string_with_format(header_row, col as u16, title, &header_format)?;
    }

    let summary_col = 1 + sheet.dates.len() as u16;
    for (i, row) in sheet.rows.iter().enumerate() {
        let r = header_row + 1 + i as u32;
        worksheet.write_string(r, 0, &row.summary.student_name)?;
        for (j, mark) in row.marks.iter().enumerate() {
            worksheet.write_string(r, 1 + j as u16, status_code(*mark))?;
        }
        worksheet.write_number(r, summary_col, row.summary.present as f64)?;
        worksheet.write_number(r, summary_col + 1, row.summary.absent as f64)?;
        worksheet.write_number(r, summary_col + 2, row.summary.late as f64)?;
        worksheet.write_number(r, summary_col + 3, row.summary.total as f64)?;
        worksheet.write_number(r, summary_col + 4, rate_percent(row.summary.rate))?;
    }

    workbook.save_to_buffer()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sheet_fixture() -> AttendanceSheet {
        let ana = ObjectId::new();
        let ben = ObjectId::new();
        let class_id = ObjectId::new();
        let rec = |student, day, status| AttendanceRecord {
            id: None,
            student_id: student,
            class_id,
            date: NaiveDate::from_ymd_opt(2024, 9, day).unwrap(),
            status,
            marked_by: None,
            updated_at: Utc::now(),
        };

        AttendanceSheet::build(
            "8-A, Science",
            &[(ana, "Ana".to_string()), (ben, "=Ben".to_string())],
            &[
                rec(ana, 2, AttendanceStatus::Present),
                rec(ana, 3, AttendanceStatus::Late),
                rec(ben, 3, AttendanceStatus::Absent),
            ],
        )
    }

    #[test]
    fn test_csv_escape_formula_injection() {
        assert_eq!(escape_csv_field("=1+1"), "\t=1+1");
        assert_eq!(escape_csv_field("+cmd"), "\t+cmd");
        assert_eq!(escape_csv_field("@SUM(A1)"), "\t@SUM(A1)");
        assert_eq!(escape_csv_field("-2+3"), "\t-2+3");

        assert_eq!(escape_csv_field("Normal Name"), "Normal Name");
        assert_eq!(escape_csv_field("Name, Jr."), "\"Name, Jr.\"");
        assert_eq!(escape_csv_field("O\"Brien"), "\"O\"\"Brien\"");
        assert_eq!(escape_csv_field("=1+1, test"), "\"\t=1+1, test\"");
        assert_eq!(escape_csv_field(""), "");
    }

    #[test]
    fn test_sheet_grid() {
        let sheet = sheet_fixture();
        assert_eq!(sheet.dates.len(), 2);
        assert_eq!(sheet.rows.len(), 2);
        assert_eq!(
            sheet.rows[0].marks,
            vec![Some(AttendanceStatus::Present), Some(AttendanceStatus::Late)]
        );
        assert_eq!(sheet.rows[1].marks, vec![None, Some(AttendanceStatus::Absent)]);
    }

    #[test]
    fn test_render_csv() {
        let csv = render_csv(&sheet_fixture());
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "Class,\"8-A, Science\"");
        assert_eq!(
            lines[1],
            "Student,2024-09-02,2024-09-03,Present,Absent,Late,Total,Rate %"
        );
        assert_eq!(lines[2], "Ana,P,L,1,0,1,2,100.0");
        assert_eq!(lines[3], "\t=Ben,,A,0,1,0,1,0.0");
    }

    #[test]
    fn test_render_xlsx_produces_zip() {
        let bytes = render_xlsx(&sheet_fixture()).unwrap();
        // xlsx is a zip container
        assert_eq!(&bytes[..2], b"PK");
    }

    #[test]
    fn test_file_stem() {
        assert_eq!(file_stem("8-A, Science"), "8-a-science");
        assert_eq!(file_stem("!!!"), "class");
    }
}
