use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    http::{header, Method},
    middleware,
    routing::{delete, get, post, put},
    Router,
};
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};

pub mod config;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod metrics;
pub mod middlewares;
pub mod models;
pub mod services;
pub mod utils;

pub use config::Config;
pub use services::AppState;

type AppRouter = Router<Arc<AppState>>;

pub fn create_router(app_state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_origin(tower_http::cors::Any);

    let protected = Router::new()
        .nest("/users", user_routes())
        .nest("/class", class_routes())
        .nest("/attendance", attendance_routes())
        .nest("/announcements", announcement_routes())
        .nest("/activities", activity_routes())
        .nest("/quizzes", quiz_routes())
        .nest("/tasks", task_routes())
        .nest("/modules", module_routes())
        .nest("/admin", admin_routes())
        .route_layer(middleware::from_fn_with_state(
            app_state.clone(),
            middlewares::auth::auth_middleware,
        ));

    let api = Router::new()
        .route("/users/login", post(handlers::users::login))
        .merge(protected);

    Router::new()
        // Public endpoints (no auth required)
        .route("/health", get(handlers::health_check))
        // Metrics endpoint with Basic Auth protection
        .route(
            "/metrics",
            get(handlers::metrics_handler).layer(middleware::from_fn_with_state(
                app_state.clone(),
                handlers::metrics_auth_middleware,
            )),
        )
        .nest("/api", api)
        .nest_service("/uploads", ServeDir::new(&app_state.config.uploads.dir))
        .layer(DefaultBodyLimit::max(app_state.config.uploads.max_bytes))
        .with_state(app_state)
        .layer(cors)
        .layer(middleware::from_fn(
            middlewares::metrics::metrics_middleware,
        ))
        .layer(middleware::from_fn(
            middlewares::trace::trace_context_middleware,
        ))
        .layer(TraceLayer::new_for_http())
}

fn user_routes() -> AppRouter {
    let admin = Router::new()
        .route(
            "/",
            get(handlers::users::list_users).post(handlers::users::create_user),
        )
        .route_layer(middleware::from_fn(
            middlewares::auth::admin_guard_middleware,
        ));

    Router::new()
        .route("/me", get(handlers::users::me))
        .route("/change-password", post(handlers::users::change_password))
        .route(
            "/me/profile",
            get(handlers::users::get_profile).put(handlers::users::update_profile),
        )
        .route(
            "/{id}",
            get(handlers::users::get_user)
                .patch(handlers::users::update_user)
                .delete(handlers::users::delete_user),
        )
        .merge(admin)
}

fn class_routes() -> AppRouter {
    Router::new()
        .route(
            "/",
            get(handlers::classes::list_classes).post(handlers::classes::create_class),
        )
        .route(
            "/{id}",
            get(handlers::classes::get_class)
                .put(handlers::classes::update_class)
                .delete(handlers::classes::delete_class),
        )
        .route(
            "/{id}/students",
            get(handlers::classes::list_students).put(handlers::classes::add_students),
        )
        .route(
            "/{id}/students/{student_id}",
            delete(handlers::classes::remove_student),
        )
}

fn attendance_routes() -> AppRouter {
    Router::new()
        .route("/mark", post(handlers::attendance::mark_attendance))
        .route("/class/{id}", get(handlers::attendance::class_attendance))
        .route(
            "/class/{id}/summary",
            get(handlers::attendance::class_summary),
        )
        .route(
            "/class/{id}/export",
            get(handlers::attendance::export_attendance),
        )
        .route(
            "/student/{id}",
            get(handlers::attendance::student_attendance),
        )
}

fn announcement_routes() -> AppRouter {
    Router::new()
        .route(
            "/",
            get(handlers::announcements::list_announcements)
                .post(handlers::announcements::create_announcement),
        )
        .route(
            "/{id}",
            get(handlers::announcements::get_announcement)
                .put(handlers::announcements::update_announcement)
                .delete(handlers::announcements::delete_announcement),
        )
        .route(
            "/{id}/comments",
            get(handlers::announcements::list_comments).post(handlers::announcements::add_comment),
        )
        .route(
            "/{id}/comments/{comment_id}",
            delete(handlers::announcements::delete_comment),
        )
        .route("/{id}/reactions", post(handlers::announcements::react))
        .route(
            "/{id}/attachments",
            post(handlers::announcements::add_attachment),
        )
}

fn activity_routes() -> AppRouter {
    Router::new()
        .route(
            "/",
            get(handlers::activities::list_activities).post(handlers::activities::create_activity),
        )
        .route("/submit", post(handlers::activities::submit_activity))
        .route(
            "/submissions/mine",
            get(handlers::activities::my_submissions),
        )
        .route(
            "/submissions/{id}/grade",
            put(handlers::activities::grade_submission),
        )
        .route(
            "/{id}",
            get(handlers::activities::get_activity)
                .put(handlers::activities::update_activity)
                .delete(handlers::activities::delete_activity),
        )
        .route("/{id}/attachment", post(handlers::activities::attach_file))
        .route(
            "/{id}/submissions",
            get(handlers::activities::list_submissions),
        )
}

fn quiz_routes() -> AppRouter {
    Router::new()
        .route(
            "/",
            get(handlers::quizzes::list_quizzes).post(handlers::quizzes::create_quiz),
        )
        .route("/generate", post(handlers::quizzes::generate_quiz))
        .route(
            "/{id}",
            get(handlers::quizzes::get_quiz).delete(handlers::quizzes::delete_quiz),
        )
        .route("/{id}/start", post(handlers::quizzes::start_quiz))
        .route("/{id}/submit", post(handlers::quizzes::submit_quiz))
        .route(
            "/{id}/submissions",
            get(handlers::quizzes::list_submissions),
        )
}

fn task_routes() -> AppRouter {
    Router::new()
        .route(
            "/",
            get(handlers::tasks::list_tasks).post(handlers::tasks::create_task),
        )
        .route(
            "/{id}",
            put(handlers::tasks::update_task).delete(handlers::tasks::delete_task),
        )
}

fn module_routes() -> AppRouter {
    Router::new()
        .route(
            "/",
            get(handlers::modules::list_modules).post(handlers::modules::upload_module),
        )
        .route(
            "/{id}",
            get(handlers::modules::get_module).delete(handlers::modules::delete_module),
        )
}

fn admin_routes() -> AppRouter {
    Router::new()
        .route("/stats", get(handlers::stats::admin_stats))
        .route_layer(middleware::from_fn(
            middlewares::auth::admin_guard_middleware,
        ))
}
