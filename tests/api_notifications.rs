mod common;

use actix_web::{test, web, App};
use notification_server::api;
use notification_server::db::NotificationStore;
use serde_json::{json, Value};
use uuid::Uuid;

fn mentor_request(recipient: Uuid, actor: Uuid) -> Value {
    json!({
        "event_type": "mentor_request",
        "recipient_id": recipient,
        "actor_id": actor,
        "actor_name": "Ada",
        "entity_id": "req-1"
    })
}

fn post_comment(recipient: Uuid, actor: Uuid, actor_name: &str) -> Value {
    json!({
        "event_type": "post_comment",
        "recipient_id": recipient,
        "actor_id": actor,
        "actor_name": actor_name,
        "entity_id": "post-42",
        "data": { "post_title": "Negotiating offers", "post_id": "42" }
    })
}

#[actix_web::test]
async fn test_trigger_delivers_and_lists_inbox() {
    let ctx = common::test_context();
    let user = Uuid::new_v4();
    common::subscribe(&ctx.store, user).await;

    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(ctx.state.clone()))
            .configure(api::configure),
    )
    .await;

    let resp = test::TestRequest::post()
        .uri("/api/notifications/trigger")
        .set_json(mentor_request(user, Uuid::new_v4()))
        .send_request(&app)
        .await;
    assert_eq!(resp.status(), 200);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["outcome"], "delivered");
    assert_eq!(body["report"]["sent"], 1);
    assert_eq!(ctx.sender.calls(), 1);

    let resp = test::TestRequest::get()
        .uri(&format!("/api/users/{}/notifications", user))
        .send_request(&app)
        .await;
    assert_eq!(resp.status(), 200);
    let inbox: Value = test::read_body_json(resp).await;
    assert_eq!(inbox["page"], 1);
    assert_eq!(inbox["limit"], 20);
    assert_eq!(inbox["unread_count"], 1);
    let items = inbox["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["title"], "New mentoring request");
    assert_eq!(items[0]["body"], "Ada would like you to be their mentor");
    assert!(items[0].get("dedup_key").is_none());
}

#[actix_web::test]
async fn test_trigger_skips_duplicates_and_self_notifications() {
    let ctx = common::test_context();
    let user = Uuid::new_v4();
    let actor = Uuid::new_v4();

    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(ctx.state.clone()))
            .configure(api::configure),
    )
    .await;

    let first: Value = test::read_body_json(
        test::TestRequest::post()
            .uri("/api/notifications/trigger")
            .set_json(mentor_request(user, actor))
            .send_request(&app)
            .await,
    )
    .await;
    assert_eq!(first["outcome"], "delivered");

    let second: Value = test::read_body_json(
        test::TestRequest::post()
            .uri("/api/notifications/trigger")
            .set_json(mentor_request(user, actor))
            .send_request(&app)
            .await,
    )
    .await;
    assert_eq!(second["outcome"], "duplicate");

    let own: Value = test::read_body_json(
        test::TestRequest::post()
            .uri("/api/notifications/trigger")
            .set_json(mentor_request(user, user))
            .send_request(&app)
            .await,
    )
    .await;
    assert_eq!(own["outcome"], "skipped");

    assert_eq!(ctx.store.count_unread(user).await.unwrap(), 1);
}

#[actix_web::test]
async fn test_trigger_groups_follow_up_events() {
    let ctx = common::test_context();
    let user = Uuid::new_v4();
    common::subscribe(&ctx.store, user).await;

    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(ctx.state.clone()))
            .configure(api::configure),
    )
    .await;

    let first: Value = test::read_body_json(
        test::TestRequest::post()
            .uri("/api/notifications/trigger")
            .set_json(post_comment(user, Uuid::new_v4(), "Ada"))
            .send_request(&app)
            .await,
    )
    .await;
    assert_eq!(first["outcome"], "delivered");

    let second: Value = test::read_body_json(
        test::TestRequest::post()
            .uri("/api/notifications/trigger")
            .set_json(post_comment(user, Uuid::new_v4(), "Grace"))
            .send_request(&app)
            .await,
    )
    .await;
    assert_eq!(second["outcome"], "grouped");
    assert_eq!(second["pending"], 1);

    // Only the opener was pushed; both are in the inbox.
    assert_eq!(ctx.sender.calls(), 1);
    assert_eq!(ctx.store.count_unread(user).await.unwrap(), 2);
}

#[actix_web::test]
async fn test_trigger_rejects_invalid_event() {
    let ctx = common::test_context();
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(ctx.state.clone()))
            .configure(api::configure),
    )
    .await;

    let mut event = post_comment(Uuid::new_v4(), Uuid::new_v4(), "Ada");
    event["data"]["post_title"] = json!("x'; DROP TABLE notifications; --");

    let resp = test::TestRequest::post()
        .uri("/api/notifications/trigger")
        .set_json(event)
        .send_request(&app)
        .await;
    assert_eq!(resp.status(), 400);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"]["status"], 400);

    let resp = test::TestRequest::post()
        .uri("/api/notifications/trigger")
        .set_json(json!({ "event_type": "not_a_type", "recipient_id": Uuid::new_v4() }))
        .send_request(&app)
        .await;
    assert_eq!(resp.status(), 400);
}

#[actix_web::test]
async fn test_mark_read_and_read_all() {
    let ctx = common::test_context();
    let user = Uuid::new_v4();
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(ctx.state.clone()))
            .configure(api::configure),
    )
    .await;

    let mut ids = Vec::new();
    for actor_name in ["Ada", "Grace", "Lin"] {
        let event = json!({
            "event_type": "document_shared",
            "recipient_id": user,
            "actor_id": Uuid::new_v4(),
            "actor_name": actor_name,
            "entity_id": format!("doc-{}", actor_name),
            "data": { "document_name": "Resume.pdf", "document_id": "1" }
        });
        let body: Value = test::read_body_json(
            test::TestRequest::post()
                .uri("/api/notifications/trigger")
                .set_json(event)
                .send_request(&app)
                .await,
        )
        .await;
        ids.push(body["notification_id"].as_str().unwrap().to_string());
    }

    let resp = test::TestRequest::post()
        .uri(&format!("/api/users/{}/notifications/{}/read", user, ids[0]))
        .send_request(&app)
        .await;
    assert_eq!(resp.status(), 204);

    // Someone else's notification
    let resp = test::TestRequest::post()
        .uri(&format!("/api/users/{}/notifications/{}/read", Uuid::new_v4(), ids[1]))
        .send_request(&app)
        .await;
    assert_eq!(resp.status(), 404);

    let resp = test::TestRequest::get()
        .uri(&format!("/api/users/{}/notifications?unread_only=true&limit=1", user))
        .send_request(&app)
        .await;
    let inbox: Value = test::read_body_json(resp).await;
    assert_eq!(inbox["unread_count"], 2);
    assert_eq!(inbox["items"].as_array().unwrap().len(), 1);

    let resp = test::TestRequest::post()
        .uri(&format!("/api/users/{}/notifications/read-all", user))
        .send_request(&app)
        .await;
    assert_eq!(resp.status(), 200);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["updated"], 2);
    assert_eq!(ctx.store.count_unread(user).await.unwrap(), 0);
}

#[actix_web::test]
async fn test_list_rejects_bad_pagination() {
    let ctx = common::test_context();
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(ctx.state.clone()))
            .configure(api::configure),
    )
    .await;

    for query in ["limit=0", "limit=101", "page=0"] {
        let resp = test::TestRequest::get()
            .uri(&format!("/api/users/{}/notifications?{}", Uuid::new_v4(), query))
            .send_request(&app)
            .await;
        assert_eq!(resp.status(), 400, "query {}", query);
    }
}

#[actix_web::test]
async fn test_preferences_gate_categories() {
    let ctx = common::test_context();
    let user = Uuid::new_v4();
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(ctx.state.clone()))
            .configure(api::configure),
    )
    .await;

    let resp = test::TestRequest::get()
        .uri(&format!("/api/users/{}/preferences", user))
        .send_request(&app)
        .await;
    let prefs: Value = test::read_body_json(resp).await;
    assert_eq!(prefs["push_enabled"], true);
    assert_eq!(prefs["disabled_categories"], json!([]));

    let resp = test::TestRequest::put()
        .uri(&format!("/api/users/{}/preferences", user))
        .set_json(json!({
            "push_enabled": true,
            "disabled_categories": ["community", "community"],
            "quiet_hours": { "start": "22:00:00", "end": "07:00:00", "utc_offset_minutes": -300 }
        }))
        .send_request(&app)
        .await;
    assert_eq!(resp.status(), 200);
    let prefs: Value = test::read_body_json(resp).await;
    assert_eq!(prefs["disabled_categories"], json!(["community"]));

    let body: Value = test::read_body_json(
        test::TestRequest::post()
            .uri("/api/notifications/trigger")
            .set_json(post_comment(user, Uuid::new_v4(), "Ada"))
            .send_request(&app)
            .await,
    )
    .await;
    assert_eq!(body["outcome"], "suppressed");
    assert_eq!(body["category"], "community");
    assert_eq!(ctx.store.count_unread(user).await.unwrap(), 0);

    let resp = test::TestRequest::put()
        .uri(&format!("/api/users/{}/preferences", user))
        .set_json(json!({
            "push_enabled": true,
            "quiet_hours": { "start": "22:00:00", "end": "07:00:00", "utc_offset_minutes": 900 }
        }))
        .send_request(&app)
        .await;
    assert_eq!(resp.status(), 400);
}

#[actix_web::test]
async fn test_push_subscription_lifecycle() {
    let ctx = common::test_context();
    let user = Uuid::new_v4();
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(ctx.state.clone()))
            .configure(api::configure),
    )
    .await;
    let uri = format!("/api/users/{}/push-subscriptions", user);

    let resp = test::TestRequest::post()
        .uri(&uri)
        .set_json(json!({
            "endpoint": "http://push.example/insecure",
            "keys": { "p256dh": "k", "auth": "a" }
        }))
        .send_request(&app)
        .await;
    assert_eq!(resp.status(), 400);

    let resp = test::TestRequest::post()
        .uri(&uri)
        .insert_header(("User-Agent", "Mozilla/5.0"))
        .set_json(json!({
            "endpoint": "https://push.example/device-1",
            "keys": { "p256dh": "k", "auth": "a" }
        }))
        .send_request(&app)
        .await;
    assert_eq!(resp.status(), 201);
    let subscription: Value = test::read_body_json(resp).await;
    assert_eq!(subscription["user_agent"], "Mozilla/5.0");
    assert_eq!(ctx.store.list_subscriptions(user).await.unwrap().len(), 1);

    let resp = test::TestRequest::delete()
        .uri(&uri)
        .set_json(json!({ "endpoint": "https://push.example/device-1" }))
        .send_request(&app)
        .await;
    assert_eq!(resp.status(), 204);

    let resp = test::TestRequest::delete()
        .uri(&uri)
        .set_json(json!({ "endpoint": "https://push.example/device-1" }))
        .send_request(&app)
        .await;
    assert_eq!(resp.status(), 404);
}
