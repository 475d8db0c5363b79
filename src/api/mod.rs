//! HTTP surface: trigger, inbox, preferences, push subscriptions and the
//! cron-driven maintenance endpoints.

pub mod cron;
pub mod notifications;
pub mod preferences;
pub mod subscriptions;

use actix_web::web;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .route("/notifications/trigger", web::post().to(notifications::trigger))
            .service(
                web::scope("/users/{user_id}")
                    .route("/notifications", web::get().to(notifications::list))
                    .route("/notifications/read-all", web::post().to(notifications::mark_all_read))
                    .route("/notifications/{id}/read", web::post().to(notifications::mark_read))
                    .route("/preferences", web::get().to(preferences::get))
                    .route("/preferences", web::put().to(preferences::update))
                    .route("/push-subscriptions", web::post().to(subscriptions::subscribe))
                    .route("/push-subscriptions", web::delete().to(subscriptions::unsubscribe)),
            )
            .service(
                web::scope("/cron/notifications")
                    .route("/queue", web::post().to(cron::process_queue))
                    .route("/groups", web::post().to(cron::process_groups))
                    .route("/purge", web::post().to(cron::purge))
                    .route("/stats", web::get().to(cron::stats)),
            ),
    );
}
