use std::collections::{BTreeMap, HashMap};

use futures::TryStreamExt;
use mongodb::bson::{doc, oid::ObjectId, Document};
use mongodb::Database;

use crate::error::{AppError, AppResult};
use crate::metrics::{ATTENDANCE_MARKS_TOTAL, EXPORTS_GENERATED_TOTAL};
use crate::middlewares::auth::AuthUser;
use crate::models::attendance::{
    AttendanceDay, AttendanceEntry, AttendanceRangeQuery, AttendanceRecord, AttendanceStatus,
    ExportFormat, MarkAttendanceRequest, MarkAttendanceResponse, StudentAttendanceSummary,
};
use crate::models::class::Class;
use crate::models::{collections, hex_or_default, parse_object_id};
use crate::services::class_service::{ensure_can_manage, ensure_can_view, find_class, visible_class_ids};
use crate::services::export::{self, AttendanceSheet};
use crate::services::user_service::{display_name, load_users};
use crate::utils::time::bson_now;

pub fn date_key(date: &chrono::NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn to_entry(record: &AttendanceRecord, names: &HashMap<ObjectId, String>) -> AttendanceEntry {
    AttendanceEntry {
        id: hex_or_default(record.id),
        student_id: record.student_id.to_hex(),
        student_name: names
            .get(&record.student_id)
            .cloned()
            .unwrap_or_else(|| record.student_id.to_hex()),
        class_id: record.class_id.to_hex(),
        date: record.date,
        status: record.status,
    }
}

/// Groups rows by day, days ascending, students by name within a day
pub fn group_by_date(
    records: &[AttendanceRecord],
    names: &HashMap<ObjectId, String>,
) -> Vec<AttendanceDay> {
    let mut days: BTreeMap<chrono::NaiveDate, Vec<AttendanceEntry>> = BTreeMap::new();
    for record in records {
        days.entry(record.date)
            .or_default()
            .push(to_entry(record, names));
    }

    days.into_iter()
        .map(|(date, mut records)| {
            records.sort_by(|a, b| a.student_name.cmp(&b.student_name));
            AttendanceDay { date, records }
        })
        .collect()
}

/// One summary per rostered student (in roster order), then any student
/// that only appears in the records. `rate = (present + late) / total`.
pub fn summarize(
    roster: &[(ObjectId, String)],
    records: &[AttendanceRecord],
) -> Vec<StudentAttendanceSummary> {
    let mut order: Vec<ObjectId> = roster.iter().map(|(id, _)| *id).collect();
    let mut names: HashMap<ObjectId, String> = roster.iter().cloned().collect();
    let mut counts: HashMap<ObjectId, [u32; 3]> = HashMap::new();

    for record in records {
        if !names.contains_key(&record.student_id) {
            names.insert(record.student_id, record.student_id.to_hex());
            order.push(record.student_id);
        }
        let slot = match record.status {
            AttendanceStatus::Present => 0,
            AttendanceStatus::Absent => 1,
            AttendanceStatus::Late => 2,
        };
        counts.entry(record.student_id).or_default()[slot] += 1;
    }

    order
        .into_iter()
        .map(|id| {
            let [present, absent, late] = counts.get(&id).copied().unwrap_or_default();
            let total = present + absent + late;
            let rate = if total == 0 {
                0.0
            } else {
                f64::from(present + late) / f64::from(total)
            };
            StudentAttendanceSummary {
                student_id: id.to_hex(),
                student_name: names.get(&id).cloned().unwrap_or_default(),
                present,
                absent,
                late,
                total,
                rate,
            }
        })
        .collect()
}

pub struct AttendanceService {
    mongo: Database,
}

impl AttendanceService {
    pub fn new(mongo: Database) -> Self {
        Self { mongo }
    }

    /// Upserts on (studentId, classId, date); the latest mark wins
    pub async fn mark_attendance(
        &self,
        session: &AuthUser,
        req: MarkAttendanceRequest,
    ) -> AppResult<MarkAttendanceResponse> {
        session.require_staff()?;

        let mut classes: HashMap<ObjectId, Class> = HashMap::new();
        let mut marks = Vec::with_capacity(req.records.len());
        for mark in &req.records {
            let class_id = parse_object_id(&mark.class_id, "class id")?;
            let student_id = parse_object_id(&mark.student_id, "student id")?;

            if !classes.contains_key(&class_id) {
                let class = find_class(&self.mongo, &class_id).await?;
                ensure_can_manage(session, &class)?;
                classes.insert(class_id, class);
            }
            let on_roster = classes
                .get(&class_id)
                .is_some_and(|class| class.has_student(&student_id));
            if !on_roster {
                return Err(AppError::bad_request(format!(
                    "Student {} is not enrolled in class {}",
                    student_id, class_id
                )));
            }

            marks.push((class_id, student_id, mark.date, mark.status));
        }

        let collection = self.mongo.collection::<Document>(collections::ATTENDANCE);
        let mut response = MarkAttendanceResponse::default();

        for (class_id, student_id, date, status) in marks {
            let result = collection
                .update_one(
                    doc! { "studentId": student_id, "classId": class_id, "date": date_key(&date) },
                    doc! {
                        "$set": {
                            "status": status.as_str(),
                            "markedBy": session.id,
                            "updatedAt": bson_now(),
                        }
                    },
                )
                .upsert(true)
                .await?;

            let outcome = if result.upserted_id.is_some() {
                response.inserted += 1;
                "inserted"
            } else {
                response.updated += 1;
                "updated"
            };
            ATTENDANCE_MARKS_TOTAL
                .with_label_values(&[status.as_str(), outcome])
                .inc();
        }

        tracing::info!(
            marked_by = %session.id,
            inserted = response.inserted,
            updated = response.updated,
            "Attendance marked"
        );
        Ok(response)
    }

    async fn class_records(
        &self,
        class_id: &ObjectId,
        student_id: Option<&ObjectId>,
        range: &AttendanceRangeQuery,
    ) -> AppResult<Vec<AttendanceRecord>> {
        let mut filter = doc! { "classId": *class_id };
        if let Some(student_id) = student_id {
            filter.insert("studentId", *student_id);
        }

        let mut date_filter = Document::new();
        if let Some(from) = &range.from {
            date_filter.insert("$gte", date_key(from));
        }
        if let Some(to) = &range.to {
            date_filter.insert("$lte", date_key(to));
        }
        if let (Some(from), Some(to)) = (&range.from, &range.to) {
            if from > to {
                return Err(AppError::bad_request("`from` must not be after `to`"));
            }
        }
        if !date_filter.is_empty() {
            filter.insert("date", date_filter);
        }

        Ok(self
            .mongo
            .collection::<AttendanceRecord>(collections::ATTENDANCE)
            .find(filter)
            .sort(doc! { "date": 1 })
            .await?
            .try_collect()
            .await?)
    }

    async fn names_for(&self, ids: &[ObjectId]) -> AppResult<HashMap<ObjectId, String>> {
        let users = load_users(&self.mongo, ids).await?;
        Ok(ids
            .iter()
            .map(|id| (*id, display_name(&users, id)))
            .collect())
    }

    async fn roster_with_names(&self, class: &Class) -> AppResult<Vec<(ObjectId, String)>> {
        let names = self.names_for(&class.students).await?;
        let mut roster: Vec<(ObjectId, String)> = class
            .students
            .iter()
            .map(|id| (*id, names.get(id).cloned().unwrap_or_else(|| id.to_hex())))
            .collect();
        roster.sort_by(|a, b| a.1.cmp(&b.1));
        Ok(roster)
    }

    /// Students only see their own rows
    pub async fn class_attendance(
        &self,
        session: &AuthUser,
        class_id: &str,
        range: AttendanceRangeQuery,
    ) -> AppResult<Vec<AttendanceDay>> {
        let id = parse_object_id(class_id, "class id")?;
        let class = find_class(&self.mongo, &id).await?;
        ensure_can_view(session, &class)?;

        let only = session.is_student().then_some(&session.id);
        let records = self.class_records(&id, only, &range).await?;

        let mut student_ids: Vec<ObjectId> = records.iter().map(|r| r.student_id).collect();
        student_ids.sort();
        student_ids.dedup();
        let names = self.names_for(&student_ids).await?;

        Ok(group_by_date(&records, &names))
    }

    pub async fn class_summary(
        &self,
        session: &AuthUser,
        class_id: &str,
        range: AttendanceRangeQuery,
    ) -> AppResult<Vec<StudentAttendanceSummary>> {
        let id = parse_object_id(class_id, "class id")?;
        let class = find_class(&self.mongo, &id).await?;
        ensure_can_manage(session, &class)?;

        let records = self.class_records(&id, None, &range).await?;
        let roster = self.roster_with_names(&class).await?;
        Ok(summarize(&roster, &records))
    }

    pub async fn student_attendance(
        &self,
        session: &AuthUser,
        student_id: &str,
        class_id: Option<&str>,
    ) -> AppResult<Vec<AttendanceEntry>> {
        let student_id = parse_object_id(student_id, "student id")?;
        if session.is_student() && session.id != student_id {
            return Err(AppError::forbidden("Students can only view their own attendance"));
        }

        let mut filter = doc! { "studentId": student_id };
        if let Some(raw) = class_id {
            let class_id = parse_object_id(raw, "class id")?;
            let class = find_class(&self.mongo, &class_id).await?;
            ensure_can_view(session, &class)?;
            filter.insert("classId", class_id);
        } else if !session.is_student() {
            if let Some(ids) = visible_class_ids(&self.mongo, session).await? {
                filter.insert("classId", doc! { "$in": ids });
            }
        }

        let records: Vec<AttendanceRecord> = self
            .mongo
            .collection::<AttendanceRecord>(collections::ATTENDANCE)
            .find(filter)
            .sort(doc! { "date": -1 })
            .await?
            .try_collect()
            .await?;

        let names = self.names_for(&[student_id]).await?;
        Ok(records.iter().map(|r| to_entry(r, &names)).collect())
    }

    /// Rendered sheet plus a suggested file name
    pub async fn export_attendance(
        &self,
        session: &AuthUser,
        class_id: &str,
        format: ExportFormat,
    ) -> AppResult<(Vec<u8>, String)> {
        let id = parse_object_id(class_id, "class id")?;
        let class = find_class(&self.mongo, &id).await?;
        ensure_can_manage(session, &class)?;

        let records = self
            .class_records(&id, None, &AttendanceRangeQuery { from: None, to: None })
            .await?;
        let roster = self.roster_with_names(&class).await?;
        let sheet = AttendanceSheet::build(&class.class_name, &roster, &records);

        let (bytes, extension, label) = match format {
            ExportFormat::Csv => (export::render_csv(&sheet).into_bytes(), "csv", "csv"),
            ExportFormat::Xlsx => (
                export::render_xlsx(&sheet)
                    .map_err(|e| anyhow::anyhow!("Failed to build xlsx export: {}", e))?,
                "xlsx",
                "xlsx",
            ),
        };
        EXPORTS_GENERATED_TOTAL.with_label_values(&[label]).inc();

        let file_name = format!(
            "attendance-{}.{}",
            export::file_stem(&class.class_name),
            extension
        );
        tracing::info!(class_id = %id, format = label, rows = sheet.rows.len(), "Attendance exported");
        Ok((bytes, file_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};

    fn record(student: ObjectId, day: u32, status: AttendanceStatus) -> AttendanceRecord {
        AttendanceRecord {
            id: Some(ObjectId::new()),
            student_id: student,
            class_id: ObjectId::new(),
            date: NaiveDate::from_ymd_opt(2024, 9, day).unwrap(),
            status,
            marked_by: None,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_group_by_date_orders_days_and_names() {
        let ana = ObjectId::new();
        let ben = ObjectId::new();
        let names: HashMap<ObjectId, String> =
            [(ana, "Ana".to_string()), (ben, "Ben".to_string())].into();

        let records = vec![
            record(ben, 3, AttendanceStatus::Late),
            record(ana, 2, AttendanceStatus::Present),
            record(ana, 3, AttendanceStatus::Absent),
        ];

        let days = group_by_date(&records, &names);
        assert_eq!(days.len(), 2);
        assert_eq!(days[0].date, NaiveDate::from_ymd_opt(2024, 9, 2).unwrap());
        assert_eq!(days[0].records.len(), 1);
        assert_eq!(days[1].records[0].student_name, "Ana");
        assert_eq!(days[1].records[1].student_name, "Ben");
        assert_eq!(days[1].records[1].status, AttendanceStatus::Late);
    }

    #[test]
    fn test_summarize_counts_and_rate() {
        let ana = ObjectId::new();
        let ben = ObjectId::new();
        let roster = vec![(ana, "Ana".to_string()), (ben, "Ben".to_string())];

        let records = vec![
            record(ana, 2, AttendanceStatus::Present),
            record(ana, 3, AttendanceStatus::Late),
            record(ana, 4, AttendanceStatus::Absent),
            record(ana, 5, AttendanceStatus::Present),
        ];

        let summary = summarize(&roster, &records);
        assert_eq!(summary.len(), 2);
        assert_eq!(summary[0].present, 2);
        assert_eq!(summary[0].late, 1);
        assert_eq!(summary[0].absent, 1);
        assert_eq!(summary[0].total, 4);
        assert!((summary[0].rate - 0.75).abs() < f64::EPSILON);

        // Never marked
        assert_eq!(summary[1].total, 0);
        assert_eq!(summary[1].rate, 0.0);
    }

    #[test]
    fn test_summarize_keeps_students_no_longer_on_roster() {
        let dropped = ObjectId::new();
        let summary = summarize(&[], &[record(dropped, 2, AttendanceStatus::Absent)]);
        assert_eq!(summary.len(), 1);
        assert_eq!(summary[0].student_name, dropped.to_hex());
        assert_eq!(summary[0].absent, 1);
    }

    #[test]
    fn test_date_key_format() {
        assert_eq!(
            date_key(&NaiveDate::from_ymd_opt(2024, 1, 5).unwrap()),
            "2024-01-05"
        );
    }
}
