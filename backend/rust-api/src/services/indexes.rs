use anyhow::{Context, Result};
use mongodb::bson::{doc, Document};
use mongodb::options::IndexOptions;
use mongodb::{Database, IndexModel};

use crate::models::collections;

struct IndexSpec {
    collection: &'static str,
    keys: Document,
    unique: bool,
}

fn index_specs() -> Vec<IndexSpec> {
    vec![
        IndexSpec {
            collection: collections::USERS,
            keys: doc! { "email": 1 },
            unique: true,
        },
        IndexSpec {
            collection: collections::USERS,
            keys: doc! { "role": 1, "name": 1 },
            unique: false,
        },
        IndexSpec {
            collection: collections::PROFILES,
            keys: doc! { "userId": 1 },
            unique: true,
        },
        IndexSpec {
            collection: collections::CLASSES,
            keys: doc! { "teacherId": 1 },
            unique: false,
        },
        IndexSpec {
            collection: collections::CLASSES,
            keys: doc! { "students": 1 },
            unique: false,
        },
        IndexSpec {
            collection: collections::ATTENDANCE,
            keys: doc! { "studentId": 1, "classId": 1, "date": 1 },
            unique: true,
        },
        IndexSpec {
            collection: collections::ATTENDANCE,
            keys: doc! { "classId": 1, "date": 1 },
            unique: false,
        },
        IndexSpec {
            collection: collections::ANNOUNCEMENTS,
            keys: doc! { "classId": 1, "createdAt": -1 },
            unique: false,
        },
        IndexSpec {
            collection: collections::ACTIVITIES,
            keys: doc! { "classId": 1, "deadline": 1 },
            unique: false,
        },
        IndexSpec {
            collection: collections::SUBMISSIONS,
            keys: doc! { "activityId": 1, "studentId": 1 },
            unique: true,
        },
        IndexSpec {
            collection: collections::SUBMISSIONS,
            keys: doc! { "studentId": 1, "submittedAt": -1 },
            unique: false,
        },
        IndexSpec {
            collection: collections::QUIZZES,
            keys: doc! { "classId": 1, "createdAt": -1 },
            unique: false,
        },
        IndexSpec {
            collection: collections::QUIZ_SUBMISSIONS,
            keys: doc! { "quizId": 1, "studentId": 1 },
            unique: true,
        },
        IndexSpec {
            collection: collections::TASKS,
            keys: doc! { "userId": 1, "completed": 1 },
            unique: false,
        },
        IndexSpec {
            collection: collections::MODULES,
            keys: doc! { "classId": 1, "createdAt": -1 },
            unique: false,
        },
    ]
}

/// Creates every index the services rely on. Safe to run on each startup.
pub async fn ensure_indexes(mongo: &Database) -> Result<()> {
    let specs = index_specs();
    for spec in &specs {
        let options = IndexOptions::builder().unique(spec.unique).build();
        let model = IndexModel::builder()
            .keys(spec.keys.clone())
            .options(options)
            .build();

        mongo
            .collection::<Document>(spec.collection)
            .create_index(model)
            .await
            .with_context(|| format!("Failed to create index {:?} on {}", spec.keys, spec.collection))?;
    }

    tracing::info!(count = specs.len(), "MongoDB indexes ensured");
    Ok(())
}
