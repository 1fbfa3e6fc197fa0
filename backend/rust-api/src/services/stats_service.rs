use chrono::Utc;
use futures::TryStreamExt;
use mongodb::bson::{doc, Document};
use mongodb::Database;

use crate::error::AppResult;
use crate::metrics::track_db_operation;
use crate::models::collections;
use crate::models::stats::{AdminStats, AttendanceCounts, UserCounts};

pub struct StatsService {
    mongo: Database,
}

impl StatsService {
    pub fn new(mongo: Database) -> Self {
        Self { mongo }
    }

    async fn count(&self, collection: &str, filter: Document) -> AppResult<u64> {
        let count = track_db_operation(
            "count",
            collection,
            async {
                self.mongo
                    .collection::<Document>(collection)
                    .count_documents(filter)
                    .await
            },
        )
        .await?;
        Ok(count)
    }

    /// Groups `field` and returns `(value, count)` pairs
    async fn group_counts(
        &self,
        collection: &str,
        filter: Document,
        field: &str,
    ) -> AppResult<Vec<(String, u64)>> {
        let pipeline = vec![
            doc! { "$match": filter },
            doc! { "$group": { "_id": format!("${}", field), "count": { "$sum": 1 } } },
        ];

        let groups: Vec<Document> = track_db_operation(
            "aggregate",
            collection,
            async {
                self.mongo
                    .collection::<Document>(collection)
                    .aggregate(pipeline)
                    .await?
                    .try_collect::<Vec<Document>>()
                    .await
            },
        )
        .await?;

        Ok(groups
            .iter()
            .filter_map(|g| {
                let key = g.get_str("_id").ok()?.to_string();
                let count = g
                    .get_i32("count")
                    .map(i64::from)
                    .or_else(|_| g.get_i64("count"))
                    .ok()?;
                Some((key, count.max(0) as u64))
            })
            .collect())
    }

    pub async fn admin_stats(&self) -> AppResult<AdminStats> {
        let mut users = UserCounts::default();
        for (role, count) in self.group_counts(collections::USERS, doc! {}, "role").await? {
            match role.as_str() {
                "student" => users.students = count,
                "teacher" => users.teachers = count,
                "admin" => users.admins = count,
                _ => {}
            }
        }

        let today = Utc::now().date_naive();
        let mut attendance_today = AttendanceCounts::default();
        let today_filter = doc! { "date": today.format("%Y-%m-%d").to_string() };
        for (status, count) in self
            .group_counts(collections::ATTENDANCE, today_filter, "status")
            .await?
        {
            match status.as_str() {
                "Present" => attendance_today.present = count,
                "Absent" => attendance_today.absent = count,
                "Late" => attendance_today.late = count,
                _ => {}
            }
        }

        Ok(AdminStats {
            users,
            classes: self.count(collections::CLASSES, doc! {}).await?,
            activities: self.count(collections::ACTIVITIES, doc! {}).await?,
            quizzes: self.count(collections::QUIZZES, doc! {}).await?,
            announcements: self.count(collections::ANNOUNCEMENTS, doc! {}).await?,
            attendance_date: today,
            attendance_today,
        })
    }
}
