use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, StatusCode},
};
use chrono::{Duration, Utc};
use mongodb::bson::{doc, Document};
use schooldesk_api::models::{collections, user::UserRole};
use serde_json::{json, Value};
use serial_test::serial;

mod common;

use common::TestApp;

/// Teacher owning a class with one enrolled student
async fn class_with_student(app: &TestApp) -> (String, String, String, String) {
    let (_, teacher) = app.seed_user("Tina Teacher", UserRole::Teacher).await;
    let (student_id, student) = app.seed_user("Sam Student", UserRole::Student).await;

    let (status, class) = app
        .json(
            "POST",
            "/api/class",
            &teacher,
            json!({ "className": "7-B Biology", "day": "Monday", "time": "09:00" }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let class_id = class["id"].as_str().unwrap().to_string();

    let (status, _) = app
        .json(
            "PUT",
            &format!("/api/class/{}/students", class_id),
            &teacher,
            json!({ "studentIds": [student_id.to_hex()] }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    (class_id, teacher, student_id.to_hex(), student)
}

#[tokio::test]
#[serial]
#[ignore = "requires a running MongoDB"]
async fn test_class_create_then_read_back() {
    let app = common::create_test_app().await;
    let (class_id, teacher, student_id, student) = class_with_student(&app).await;

    let (status, class) = app.get(&format!("/api/class/{}", class_id), &teacher).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(class["className"], "7-B Biology");
    assert_eq!(class["teacherName"], "Tina Teacher");
    assert_eq!(class["studentIds"], json!([student_id]));

    // Enrolled students see the class in their own listing
    let (status, listed) = app.get("/api/class", &student).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed.as_array().unwrap().len(), 1);

    app.drop_database().await;
}

#[tokio::test]
#[serial]
#[ignore = "requires a running MongoDB"]
async fn test_outsider_cannot_view_class() {
    let app = common::create_test_app().await;
    let (class_id, _, _, _) = class_with_student(&app).await;
    let (_, outsider) = app.seed_user("Otto Outsider", UserRole::Student).await;

    let (status, _) = app.get(&format!("/api/class/{}", class_id), &outsider).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    app.drop_database().await;
}

#[tokio::test]
#[serial]
#[ignore = "requires a running MongoDB"]
async fn test_marking_attendance_twice_keeps_latest_status() {
    let app = common::create_test_app().await;
    let (class_id, teacher, student_id, _) = class_with_student(&app).await;

    let mark = |status: &str| {
        json!([{
            "studentId": student_id,
            "classId": class_id,
            "date": "2026-03-02",
            "status": status,
        }])
    };

    let (status, first) = app
        .json("POST", "/api/attendance/mark", &teacher, mark("Absent"))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["inserted"], 1);

    let (status, second) = app
        .json("POST", "/api/attendance/mark", &teacher, mark("Late"))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["inserted"], 0);
    assert_eq!(second["updated"], 1);

    let (status, days) = app
        .get(&format!("/api/attendance/class/{}", class_id), &teacher)
        .await;
    assert_eq!(status, StatusCode::OK);
    let days = days.as_array().unwrap();
    assert_eq!(days.len(), 1);
    let records = days[0]["records"].as_array().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["status"], "Late");
    assert_eq!(records[0]["studentName"], "Sam Student");

    app.drop_database().await;
}

#[tokio::test]
#[serial]
#[ignore = "requires a running MongoDB"]
async fn test_student_cannot_mark_attendance() {
    let app = common::create_test_app().await;
    let (class_id, _, student_id, student) = class_with_student(&app).await;

    let (status, _) = app
        .json(
            "POST",
            "/api/attendance/mark",
            &student,
            json!({ "records": [{
                "studentId": student_id,
                "classId": class_id,
                "date": "2026-03-02",
                "status": "Present",
            }]}),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    app.drop_database().await;
}

#[tokio::test]
#[serial]
#[ignore = "requires a running MongoDB"]
async fn test_quiz_second_submission_conflicts() {
    let app = common::create_test_app().await;
    let (class_id, teacher, _, student) = class_with_student(&app).await;

    let (status, quiz) = app
        .json(
            "POST",
            "/api/quizzes",
            &teacher,
            json!({
                "title": "Cells",
                "classId": class_id,
                "questions": [
                    { "prompt": "Powerhouse of the cell?", "options": ["Nucleus", "Mitochondria"], "answer": "Mitochondria", "points": 2 },
                    { "prompt": "Plant cell wall material?", "options": [], "answer": "Cellulose", "points": 1 },
                ],
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let quiz_id = quiz["id"].as_str().unwrap().to_string();

    // Students never receive the answers
    let (status, view) = app.get(&format!("/api/quizzes/{}", quiz_id), &student).await;
    assert_eq!(status, StatusCode::OK);
    assert!(view["questions"][0].get("answer").map_or(true, |a| a.is_null()));

    let submit = json!({ "answers": ["mitochondria", "Starch"] });
    let (status, result) = app
        .json("POST", &format!("/api/quizzes/{}/submit", quiz_id), &student, submit.clone())
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(result["score"], 2);
    assert_eq!(result["maxScore"], 3);

    let (status, body) = app
        .json("POST", &format!("/api/quizzes/{}/submit", quiz_id), &student, submit)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "conflict");

    let (status, submissions) = app
        .get(&format!("/api/quizzes/{}/submissions", quiz_id), &teacher)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(submissions.as_array().unwrap().len(), 1);

    app.drop_database().await;
}

#[tokio::test]
#[serial]
#[ignore = "requires a running MongoDB"]
async fn test_comment_is_appended_once() {
    let app = common::create_test_app().await;
    let (class_id, teacher, _, student) = class_with_student(&app).await;

    let (status, announcement) = app
        .json(
            "POST",
            "/api/announcements",
            &teacher,
            json!({ "title": "Field trip", "content": "Bring boots", "classId": class_id }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = announcement["id"].as_str().unwrap().to_string();

    let (status, comment) = app
        .json(
            "POST",
            &format!("/api/announcements/{}/comments", id),
            &student,
            json!({ "text": "Can we bring snacks?" }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(comment["userName"], "Sam Student");

    let (status, page) = app
        .get(&format!("/api/announcements/{}/comments", id), &teacher)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["total"], 1);
    assert_eq!(page["comments"][0]["text"], "Can we bring snacks?");

    app.drop_database().await;
}

#[tokio::test]
#[serial]
#[ignore = "requires a running MongoDB"]
async fn test_reaction_toggles_off_on_repeat() {
    let app = common::create_test_app().await;
    let (class_id, teacher, _, student) = class_with_student(&app).await;

    let (_, announcement) = app
        .json(
            "POST",
            "/api/announcements",
            &teacher,
            json!({ "title": "Exam moved", "content": "Now on Friday", "classId": class_id }),
        )
        .await;
    let uri = format!("/api/announcements/{}/reactions", announcement["id"].as_str().unwrap());

    let (status, first) = app.json("POST", &uri, &student, json!({ "kind": "like" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["myReaction"], "like");
    assert_eq!(first["reactions"]["like"], 1);

    let (_, second) = app.json("POST", &uri, &student, json!({ "kind": "like" })).await;
    assert!(second["myReaction"].is_null());
    assert!(second["reactions"].get("like").map_or(true, |c| c == 0));

    app.drop_database().await;
}

#[tokio::test]
#[serial]
#[ignore = "requires a running MongoDB"]
async fn test_deleted_class_disappears_from_listing() {
    let app = common::create_test_app().await;
    let (class_id, teacher, _, _) = class_with_student(&app).await;

    let (status, _) = app.delete(&format!("/api/class/{}", class_id), &teacher).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, listed) = app.get("/api/class", &teacher).await;
    assert_eq!(status, StatusCode::OK);
    assert!(listed.as_array().unwrap().is_empty());

    let (status, _) = app.get(&format!("/api/class/{}", class_id), &teacher).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    app.drop_database().await;
}

#[tokio::test]
#[serial]
#[ignore = "requires a running MongoDB"]
async fn test_tasks_are_private_to_their_owner() {
    let app = common::create_test_app().await;
    let (_, alice) = app.seed_user("Alice", UserRole::Student).await;
    let (_, bob) = app.seed_user("Bob", UserRole::Student).await;

    let (status, task) = app
        .json("POST", "/api/tasks", &alice, json!({ "title": "Read chapter 4" }))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let uri = format!("/api/tasks/{}", task["id"].as_str().unwrap());

    let (status, _) = app.delete(&uri, &bob).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, bobs) = app.get("/api/tasks", &bob).await;
    assert!(bobs.as_array().unwrap().is_empty());

    let (status, _) = app.delete(&uri, &alice).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    app.drop_database().await;
}

#[tokio::test]
#[serial]
#[ignore = "requires a running MongoDB"]
async fn test_generated_quiz_is_marked_generated() {
    let app = common::create_test_app_with(|state| {
        state.with_quiz_generator(Arc::new(common::FixedQuizGenerator))
    })
    .await;
    let (class_id, teacher, _, _) = class_with_student(&app).await;

    let (status, quiz) = app
        .json(
            "POST",
            "/api/quizzes/generate",
            &teacher,
            json!({ "topic": "Photosynthesis", "count": 3, "classId": class_id }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(quiz["source"], "generated");
    assert_eq!(quiz["questionCount"], 3);
    assert_eq!(quiz["questions"][0]["answer"], "yes");

    app.drop_database().await;
}

#[tokio::test]
#[serial]
#[ignore = "requires a running MongoDB"]
async fn test_quiz_generation_unconfigured_is_unavailable() {
    let app = common::create_test_app().await;
    let (class_id, teacher, _, _) = class_with_student(&app).await;

    let (status, body) = app
        .json(
            "POST",
            "/api/quizzes/generate",
            &teacher,
            json!({ "topic": "Photosynthesis", "count": 3, "classId": class_id }),
        )
        .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "unavailable");

    app.drop_database().await;
}

#[tokio::test]
#[serial]
#[ignore = "requires a running MongoDB"]
async fn test_module_upload_and_delete_manage_stored_file() {
    let store = Arc::new(common::MemoryFileStore::default());
    let files = store.clone();
    let app = common::create_test_app_with(move |state| state.with_file_store(files)).await;
    let (class_id, teacher, _, student) = class_with_student(&app).await;

    let boundary = "schooldesk-boundary";
    let body = common::multipart_body(
        boundary,
        &[("title", "Cell diagrams"), ("classId", &class_id)],
        ("file", "cells.pdf", b"%PDF-1.4 cells"),
    );
    let (status, module) = app
        .send(
            common::authed("POST", "/api/modules", &teacher)
                .header(
                    header::CONTENT_TYPE,
                    format!("multipart/form-data; boundary={}", boundary),
                )
                .body(Body::from(body))
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(module["file"]["fileName"], "cells.pdf");
    assert_eq!(store.keys().len(), 1);
    let key = store.keys()[0].clone();
    assert_eq!(module["file"]["url"], format!("memory://{}", key));

    // Links are resolved per response, never read back from the database
    let stored: Document = app
        .state
        .mongo
        .collection::<Document>(collections::MODULES)
        .find_one(doc! {})
        .await
        .unwrap()
        .unwrap();
    assert!(stored.get_document("file").unwrap().get("url").is_none());

    let (status, listed) = app
        .get(&format!("/api/modules?classId={}", class_id), &student)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed.as_array().unwrap().len(), 1);
    assert_eq!(listed[0]["file"]["url"], format!("memory://{}", key));

    let (status, _) = app
        .delete(&format!("/api/modules/{}", module["id"].as_str().unwrap()), &teacher)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(store.keys().is_empty());

    app.drop_database().await;
}

async fn create_activity(app: &TestApp, teacher: &str, class_id: &str, deadline_in: Duration) -> String {
    let (status, activity) = app
        .json(
            "POST",
            "/api/activities",
            teacher,
            json!({
                "title": "Lab report",
                "classId": class_id,
                "deadline": Utc::now() + deadline_in,
                "points": 10,
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    activity["id"].as_str().unwrap().to_string()
}

async fn submit_text(app: &TestApp, student: &str, activity_id: &str, text: &str) -> (StatusCode, Value) {
    app.json(
        "POST",
        "/api/activities/submit",
        student,
        json!({ "activityId": activity_id, "text": text }),
    )
    .await
}

#[tokio::test]
#[serial]
#[ignore = "requires a running MongoDB"]
async fn test_submission_after_deadline_is_late() {
    let app = common::create_test_app().await;
    let (class_id, teacher, _, student) = class_with_student(&app).await;
    let activity_id = create_activity(&app, &teacher, &class_id, Duration::hours(-1)).await;

    let (status, submission) = submit_text(&app, &student, &activity_id, "Sorry, late").await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(submission["status"], "late");

    app.drop_database().await;
}

#[tokio::test]
#[serial]
#[ignore = "requires a running MongoDB"]
async fn test_resubmission_replaces_and_clears_grade() {
    let app = common::create_test_app().await;
    let (class_id, teacher, _, student) = class_with_student(&app).await;
    let activity_id = create_activity(&app, &teacher, &class_id, Duration::days(2)).await;

    let (status, first) = submit_text(&app, &student, &activity_id, "Draft").await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(first["status"], "submitted");
    let grade_uri = format!(
        "/api/activities/submissions/{}/grade",
        first["id"].as_str().unwrap()
    );

    let (status, graded) = app
        .json("PUT", &grade_uri, &teacher, json!({ "score": 7, "feedback": "Good start" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(graded["score"], 7);

    let (status, second) = submit_text(&app, &student, &activity_id, "Final").await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(second["id"], first["id"]);
    assert_eq!(second["text"], "Final");
    assert!(second["score"].is_null());
    assert!(second["feedback"].is_null());

    let (_, mine) = app.get("/api/activities/submissions/mine", &student).await;
    assert_eq!(mine.as_array().unwrap().len(), 1);

    app.drop_database().await;
}

#[tokio::test]
#[serial]
#[ignore = "requires a running MongoDB"]
async fn test_grade_must_fit_activity_points() {
    let app = common::create_test_app().await;
    let (class_id, teacher, _, student) = class_with_student(&app).await;
    let activity_id = create_activity(&app, &teacher, &class_id, Duration::days(2)).await;
    let (_, submission) = submit_text(&app, &student, &activity_id, "Answer").await;
    let grade_uri = format!(
        "/api/activities/submissions/{}/grade",
        submission["id"].as_str().unwrap()
    );

    let (status, _) = app.json("PUT", &grade_uri, &teacher, json!({ "score": 11 })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app.json("PUT", &grade_uri, &teacher, json!({ "score": -1 })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, graded) = app.json("PUT", &grade_uri, &teacher, json!({ "score": 10 })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(graded["score"], 10);

    // Students cannot grade
    let (status, _) = app.json("PUT", &grade_uri, &student, json!({ "score": 10 })).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    app.drop_database().await;
}

#[tokio::test]
#[serial]
#[ignore = "requires a running MongoDB"]
async fn test_submission_listing_has_missing_rows() {
    let app = common::create_test_app().await;
    let (class_id, teacher, student_id, student) = class_with_student(&app).await;
    let (absent_id, _) = app.seed_user("Abe Absent", UserRole::Student).await;
    let (status, _) = app
        .json(
            "PUT",
            &format!("/api/class/{}/students", class_id),
            &teacher,
            json!({ "studentIds": [absent_id.to_hex()] }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let activity_id = create_activity(&app, &teacher, &class_id, Duration::days(2)).await;
    submit_text(&app, &student, &activity_id, "Done").await;

    let (status, rows) = app
        .get(&format!("/api/activities/{}/submissions", activity_id), &teacher)
        .await;
    assert_eq!(status, StatusCode::OK);
    let rows = rows.as_array().unwrap();
    assert_eq!(rows.len(), 2);

    // Sorted by student name
    assert_eq!(rows[0]["studentId"], absent_id.to_hex());
    assert_eq!(rows[0]["status"], "missing");
    assert_eq!(rows[1]["studentId"], student_id);
    assert_eq!(rows[1]["status"], "submitted");

    app.drop_database().await;
}

#[tokio::test]
#[serial]
#[ignore = "requires a running MongoDB"]
async fn test_add_students_rejects_unknown_and_non_student_ids() {
    let app = common::create_test_app().await;
    let (class_id, teacher, _, _) = class_with_student(&app).await;
    let (other_teacher_id, _) = app.seed_user("Olga Teacher", UserRole::Teacher).await;
    let uri = format!("/api/class/{}/students", class_id);

    let unknown = mongodb::bson::oid::ObjectId::new().to_hex();
    let (status, body) = app
        .json("PUT", &uri, &teacher, json!({ "studentIds": [unknown] }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap().contains(&unknown));

    let (status, _) = app
        .json("PUT", &uri, &teacher, json!({ "studentIds": [other_teacher_id.to_hex()] }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, roster) = app.get(&uri, &teacher).await;
    assert_eq!(roster.as_array().unwrap().len(), 1);

    app.drop_database().await;
}

#[tokio::test]
#[serial]
#[ignore = "requires a running MongoDB"]
async fn test_student_cannot_see_other_class_announcements() {
    let app = common::create_test_app().await;
    let (class_id, teacher, _, _) = class_with_student(&app).await;
    let (_, outsider) = app.seed_user("Otto Outsider", UserRole::Student).await;

    let (status, announcement) = app
        .json(
            "POST",
            "/api/announcements",
            &teacher,
            json!({ "title": "Quiz on Friday", "content": "Chapter 3", "classId": class_id }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = announcement["id"].as_str().unwrap();

    let (status, listed) = app.get("/api/announcements", &outsider).await;
    assert_eq!(status, StatusCode::OK);
    assert!(listed.as_array().unwrap().is_empty());

    let (status, _) = app.get(&format!("/api/announcements/{}", id), &outsider).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .json(
            "POST",
            &format!("/api/announcements/{}/comments", id),
            &outsider,
            json!({ "text": "Hello?" }),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    app.drop_database().await;
}

#[tokio::test]
#[serial]
#[ignore = "requires a running MongoDB"]
async fn test_class_delete_removes_everything_it_owns() {
    let store = Arc::new(common::MemoryFileStore::default());
    let files = store.clone();
    let app = common::create_test_app_with(move |state| state.with_file_store(files)).await;
    let (class_id, teacher, student_id, student) = class_with_student(&app).await;

    app.json(
        "POST",
        "/api/attendance/mark",
        &teacher,
        json!([{ "studentId": student_id, "classId": class_id, "date": "2026-03-02", "status": "Present" }]),
    )
    .await;
    let activity_id = create_activity(&app, &teacher, &class_id, Duration::days(2)).await;
    submit_text(&app, &student, &activity_id, "Done").await;
    let (_, quiz) = app
        .json(
            "POST",
            "/api/quizzes",
            &teacher,
            json!({
                "title": "Warm-up",
                "classId": class_id,
                "questions": [{ "prompt": "1 + 1", "answer": "2" }],
            }),
        )
        .await;
    app.json(
        "POST",
        &format!("/api/quizzes/{}/submit", quiz["id"].as_str().unwrap()),
        &student,
        json!({ "answers": ["2"] }),
    )
    .await;
    app.json(
        "POST",
        "/api/announcements",
        &teacher,
        json!({ "title": "Welcome", "content": "Hi all", "classId": class_id }),
    )
    .await;
    let boundary = "schooldesk-boundary";
    let body = common::multipart_body(
        boundary,
        &[("title", "Syllabus"), ("classId", &class_id)],
        ("file", "syllabus.pdf", b"%PDF-1.4 syllabus"),
    );
    let (status, _) = app
        .send(
            common::authed("POST", "/api/modules", &teacher)
                .header(
                    header::CONTENT_TYPE,
                    format!("multipart/form-data; boundary={}", boundary),
                )
                .body(Body::from(body))
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let owned = [
        collections::ATTENDANCE,
        collections::ACTIVITIES,
        collections::SUBMISSIONS,
        collections::QUIZZES,
        collections::QUIZ_SUBMISSIONS,
        collections::ANNOUNCEMENTS,
        collections::MODULES,
    ];
    for name in owned {
        let count = app
            .state
            .mongo
            .collection::<Document>(name)
            .count_documents(doc! {})
            .await
            .unwrap();
        assert_eq!(count, 1, "expected one row in {}", name);
    }

    let (status, _) = app.delete(&format!("/api/class/{}", class_id), &teacher).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    for name in owned {
        let count = app
            .state
            .mongo
            .collection::<Document>(name)
            .count_documents(doc! {})
            .await
            .unwrap();
        assert_eq!(count, 0, "{} still has rows", name);
    }
    assert!(store.keys().is_empty());

    app.drop_database().await;
}

#[tokio::test]
#[serial]
#[ignore = "requires a running MongoDB"]
async fn test_concurrent_reactions_leave_one_entry() {
    let app = common::create_test_app().await;
    let (class_id, teacher, student_id, student) = class_with_student(&app).await;

    let (_, announcement) = app
        .json(
            "POST",
            "/api/announcements",
            &teacher,
            json!({ "title": "Sports day", "content": "Wear trainers", "classId": class_id }),
        )
        .await;
    let id = announcement["id"].as_str().unwrap().to_string();
    let uri = format!("/api/announcements/{}/reactions", id);

    for _ in 0..5 {
        let (like, love) = tokio::join!(
            app.json("POST", &uri, &student, json!({ "kind": "like" })),
            app.json("POST", &uri, &student, json!({ "kind": "love" })),
        );
        for (status, _) in [&like, &love] {
            assert!(
                *status == StatusCode::OK || *status == StatusCode::CONFLICT,
                "unexpected status {}",
                status
            );
        }

        let stored: Document = app
            .state
            .mongo
            .collection::<Document>(collections::ANNOUNCEMENTS)
            .find_one(doc! {})
            .await
            .unwrap()
            .unwrap();
        let mine = stored
            .get_array("reactions")
            .unwrap()
            .iter()
            .filter_map(|r| r.as_document())
            .filter(|r| {
                r.get_object_id("userId")
                    .is_ok_and(|uid| uid.to_hex() == student_id)
            })
            .count();
        assert!(mine <= 1, "student has {} reactions", mine);
    }

    app.drop_database().await;
}

#[tokio::test]
#[serial]
#[ignore = "requires a running MongoDB"]
async fn test_timed_quiz_must_be_started_before_submit() {
    let app = common::create_test_app().await;
    let (class_id, teacher, _, student) = class_with_student(&app).await;

    let (status, quiz) = app
        .json(
            "POST",
            "/api/quizzes",
            &teacher,
            json!({
                "title": "Timed",
                "classId": class_id,
                "timeLimitSeconds": 600,
                "questions": [{ "prompt": "3 * 3", "answer": "9" }],
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let quiz_id = quiz["id"].as_str().unwrap();
    let answers = json!({ "answers": ["9"] });

    let (status, body) = app
        .json("POST", &format!("/api/quizzes/{}/submit", quiz_id), &student, answers.clone())
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Start the quiz before submitting");

    let (status, _) = app
        .send(
            common::authed("POST", &format!("/api/quizzes/{}/start", quiz_id), &student)
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert!(status.is_success());

    let (status, result) = app
        .json("POST", &format!("/api/quizzes/{}/submit", quiz_id), &student, answers)
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(result["timedOut"], false);

    app.drop_database().await;
}

#[tokio::test]
#[serial]
#[ignore = "requires a running MongoDB"]
async fn test_demoted_teacher_is_unassigned_from_classes() {
    let app = common::create_test_app().await;
    let (class_id, _, _, _) = class_with_student(&app).await;
    let (_, admin) = app.seed_user("Ada Admin", UserRole::Admin).await;

    let (_, class) = app.get(&format!("/api/class/{}", class_id), &admin).await;
    let teacher_id = class["teacherId"].as_str().unwrap().to_string();

    let (status, _) = app
        .json(
            "PATCH",
            &format!("/api/users/{}", teacher_id),
            &admin,
            json!({ "role": "student" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, class) = app.get(&format!("/api/class/{}", class_id), &admin).await;
    assert_eq!(status, StatusCode::OK);
    assert!(class["teacherId"].is_null());

    app.drop_database().await;
}
