use super::*;
use crate::context::ExecContext;
use crate::memory::InMemoryBackend;
use crate::test_support::{ScriptedSession, rows};
use chrono::{TimeZone, Utc};

const QUERY: &str = "SELECT 1 AS x_a, 'x' AS x_b";

fn session() -> ScriptedSession {
    ScriptedSession::new()
        .with_catalog(&[(1, "x_a", "integer"), (2, "x_b", "text")])
        .on_query("pg_size_pretty", rows(&["pg_size_pretty"], &[&[Some("16 kB")]]))
}

fn view(config: &SqlRequestConfig) -> SqlView {
    SqlView::new(7, "Sales", "sales", QUERY, config).unwrap()
}

fn now() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap()
}

#[test]
fn names_derive_from_technical_name() {
    let config = SqlRequestConfig::default();
    let mut view = view(&config);
    assert_eq!(view.view_name(), "x_bi_sql_view_sales");
    assert_eq!(view.model_name(), "x_bi_sql_view.sales");
    assert!(view.is_materialized());
    assert_eq!(view.view_order().to_string(), "pivot,graph,list");

    view.set_technical_name("margin").unwrap();
    assert_eq!(view.view_name(), "x_bi_sql_view_margin");
    assert_eq!(view.model_name(), "x_bi_sql_view.margin");
    assert!(view.set_technical_name("bad name").is_err());
    assert_eq!(view.technical_name(), "margin");
}

#[tokio::test]
async fn validate_creates_prefixed_fields_in_order() {
    let session = session();
    let config = SqlRequestConfig::default();
    let ctx = ExecContext::new(&session, &config);
    let mut view = view(&config);

    let report = view.validate(&ctx).await.unwrap();

    assert_eq!(report.created, vec!["x_a", "x_b"]);
    assert_eq!(view.state(), RequestState::SqlValid);
    let fields: Vec<_> = view.fields().iter().map(|f| (f.name.as_str(), f.sequence)).collect();
    assert_eq!(fields, vec![("x_a", 1), ("x_b", 2)]);
    let stmts = session.statements();
    assert_eq!(
        stmts[1],
        r#"CREATE VIEW "x_bi_sql_view_sales" AS (SELECT 1 AS x_a, 'x' AS x_b)"#
    );
    assert!(stmts.last().unwrap().starts_with("ROLLBACK TO SAVEPOINT bi_sql_view_"));
}

#[tokio::test]
async fn unprefixed_columns_fail_without_changes() {
    let session = ScriptedSession::new().with_catalog(&[(1, "a", "integer")]);
    let config = SqlRequestConfig::default();
    let ctx = ExecContext::new(&session, &config);
    let mut view = SqlView::new(1, "Bad", "bad", "SELECT 1 AS a", &config).unwrap();

    let err = view.validate(&ctx).await.unwrap_err();

    assert!(matches!(err, RequestError::NoColumnFound));
    assert_eq!(view.state(), RequestState::Draft);
    assert!(view.fields().is_empty());
}

#[tokio::test]
async fn revalidation_yields_the_same_manifest() {
    let session = session();
    let config = SqlRequestConfig::default();
    let ctx = ExecContext::new(&session, &config);
    let backend = InMemoryBackend::new();
    let collab = Collaborators::from_backend(&backend);
    let mut view = view(&config);

    view.validate(&ctx).await.unwrap();
    let first = view.fields().to_vec();
    view.set_draft(&ctx, collab).await.unwrap();
    let report = view.validate(&ctx).await.unwrap();

    assert!(report.is_unchanged());
    assert_eq!(view.fields(), first.as_slice());
}

#[tokio::test]
async fn full_lifecycle() {
    let session = session();
    let config = SqlRequestConfig::default();
    let ctx = ExecContext::new(&session, &config);
    let backend = InMemoryBackend::new();
    let collab = Collaborators::from_backend(&backend);
    let mut view = view(&config);
    view.validate(&ctx).await.unwrap();
    view.edit_field("x_a", |f| f.is_index = true).unwrap();
    session.clear_log();

    view.create_sql_view_and_model(&ctx, collab).await.unwrap();

    assert_eq!(view.state(), RequestState::ModelValid);
    assert_eq!(view.size(), Some("16 kB"));
    assert_eq!(backend.models()[0].model, "x_bi_sql_view.sales");
    assert_eq!(backend.models()[0].fields.len(), 2);
    assert_eq!(backend.rules()[0].domain_force, "[]");
    assert_eq!(backend.access().len(), 1);
    let cron = backend.task(view.artifacts().cron.unwrap()).unwrap();
    assert!(cron.active);
    assert_eq!(cron.spec.target_ids, vec![7]);
    assert_eq!(cron.spec.name, "Refresh Materialized View x_bi_sql_view_sales");
    assert_eq!(session.count(r#"CREATE MATERIALIZED VIEW "x_bi_sql_view_sales""#), 1);
    assert_eq!(
        session.count(r#"CREATE INDEX "x_bi_sql_view_sales_1" ON "x_bi_sql_view_sales" ("x_a")"#),
        1
    );
    assert_eq!(session.count("RELEASE SAVEPOINT bi_sql_view_"), 1);
    assert!(view.check_unlink().is_err());

    view.create_ui(collab, now()).await.unwrap();

    assert_eq!(view.state(), RequestState::UiValid);
    assert_eq!(backend.views().len(), 4);
    let action = backend.action(view.artifacts().action.unwrap()).unwrap();
    assert_eq!(action.name, "Sales (01/02/2024 03:04:05 UTC)");
    assert_eq!(action.spec.view_id, view.artifacts().pivot_view.unwrap());
    assert_eq!(action.spec.view_mode, "pivot,graph,list");
    assert_eq!(action.spec.context["pivot_measures"], serde_json::json!(["x_a"]));
    let menu = backend.menu(view.artifacts().menu.unwrap()).unwrap();
    assert_eq!(menu.spec.parent, crate::config::DEFAULT_PARENT_MENU);

    view.set_draft(&ctx, collab).await.unwrap();

    assert_eq!(view.state(), RequestState::Draft);
    assert_eq!(backend.views().len(), 0);
    assert_eq!(backend.action_count(), 0);
    assert_eq!(backend.menu_count(), 0);
    assert!(backend.models().is_empty());
    assert!(backend.rules().is_empty());
    assert!(backend.access().is_empty());
    assert!(!backend.task(cron_id(&view)).unwrap().active);
    assert_eq!(session.count(r#"DROP MATERIALIZED VIEW IF EXISTS "x_bi_sql_view_sales""#), 2);
    assert_eq!(view.size(), None);
    assert!(view.check_unlink().is_ok());
}

#[tokio::test]
async fn unlink_is_allowed_again_after_reset_to_sql_valid() {
    let session = session();
    let config = SqlRequestConfig::default();
    let ctx = ExecContext::new(&session, &config);
    let backend = InMemoryBackend::new();
    let collab = Collaborators::from_backend(&backend);
    let mut view = view(&config);
    view.validate(&ctx).await.unwrap();
    assert!(view.check_unlink().is_ok());

    view.create_sql_view_and_model(&ctx, collab).await.unwrap();
    view.create_ui(collab, now()).await.unwrap();
    assert_eq!(view.state(), RequestState::UiValid);
    assert!(view.check_unlink().unwrap_err().is_precondition());

    view.reset_to_model_valid(collab).await.unwrap();
    assert!(view.check_unlink().unwrap_err().is_precondition());

    view.reset_to_sql_valid(&ctx, collab).await.unwrap();
    assert_eq!(view.state(), RequestState::SqlValid);
    assert!(view.check_unlink().is_ok());
}

fn cron_id(view: &SqlView) -> crate::collab::ArtifactId {
    view.artifacts().cron.unwrap()
}

#[tokio::test]
async fn recreating_the_model_reactivates_the_task() {
    let session = session();
    let config = SqlRequestConfig::default();
    let ctx = ExecContext::new(&session, &config);
    let backend = InMemoryBackend::new();
    let collab = Collaborators::from_backend(&backend);
    let mut view = view(&config);
    view.validate(&ctx).await.unwrap();

    view.create_sql_view_and_model(&ctx, collab).await.unwrap();
    view.reset_to_sql_valid(&ctx, collab).await.unwrap();
    view.create_sql_view_and_model(&ctx, collab).await.unwrap();

    assert_eq!(backend.task_count(), 1);
    assert!(backend.task(cron_id(&view)).unwrap().active);
}

#[tokio::test]
async fn plain_views_have_no_task_and_no_timestamp() {
    let session = session();
    let config = SqlRequestConfig::default();
    let ctx = ExecContext::new(&session, &config);
    let backend = InMemoryBackend::new();
    let collab = Collaborators::from_backend(&backend);
    let mut view = view(&config);
    view.set_materialized(false).unwrap();
    view.set_view_order("list,graph").unwrap();
    view.validate(&ctx).await.unwrap();

    view.create_sql_view_and_model(&ctx, collab).await.unwrap();
    view.create_ui(collab, now()).await.unwrap();

    assert_eq!(backend.task_count(), 0);
    assert_eq!(session.count(r#"CREATE VIEW "x_bi_sql_view_sales" AS (SELECT CAST"#), 1);
    let action = backend.action(view.artifacts().action.unwrap()).unwrap();
    assert_eq!(action.name, "Sales");
    assert_eq!(action.spec.view_id, view.artifacts().list_view.unwrap());

    view.refresh_materialized_view(&session, collab, now()).await.unwrap();
    assert_eq!(session.count("REFRESH"), 0);

    view.reset_to_sql_valid(&ctx, collab).await.unwrap();
    assert_eq!(session.count(r#"DROP VIEW IF EXISTS "x_bi_sql_view_sales""#), 2);
}

#[tokio::test]
async fn unbound_relations_block_model_creation() {
    let session = ScriptedSession::new().with_catalog(&[(1, "x_partner_id", "integer")]);
    let config = SqlRequestConfig::default();
    let ctx = ExecContext::new(&session, &config);
    let backend = InMemoryBackend::new();
    let collab = Collaborators::from_backend(&backend);
    let mut view = SqlView::new(1, "P", "p", "SELECT partner_id AS x_partner_id FROM t", &config).unwrap();
    view.validate(&ctx).await.unwrap();

    let err = view.create_sql_view_and_model(&ctx, collab).await.unwrap_err();

    assert_eq!(
        err.to_string(),
        "Validation error: Please set related models on the following fields x_partner_id"
    );
    assert!(backend.models().is_empty());

    view.edit_field("x_partner_id", |f| f.many2one_model = Some("res.partner".into()))
        .unwrap();
    view.create_sql_view_and_model(&ctx, collab).await.unwrap();
    assert_eq!(
        backend.models()[0].fields[0].relation.as_deref(),
        Some("res.partner")
    );
}

#[tokio::test]
async fn failed_model_creation_is_compensated() {
    let session = session();
    let config = SqlRequestConfig::default();
    let ctx = ExecContext::new(&session, &config);
    let backend = InMemoryBackend::new();
    backend.fail_on("create_task");
    let collab = Collaborators::from_backend(&backend);
    let mut view = view(&config);
    view.validate(&ctx).await.unwrap();

    let err = view.create_sql_view_and_model(&ctx, collab).await.unwrap_err();

    assert!(matches!(err, RequestError::Backend(_)));
    assert_eq!(view.state(), RequestState::SqlValid);
    assert!(backend.models().is_empty());
    assert!(backend.rules().is_empty());
    assert!(backend.access().is_empty());
    assert_eq!(session.count("ROLLBACK TO SAVEPOINT bi_sql_view_"), 2);
    assert_eq!(view.artifacts().model, None);
}

#[tokio::test]
async fn failed_view_ddl_is_compensated() {
    let session = session().fail_on("CREATE MATERIALIZED VIEW", "column \"x_a\" specified more than once");
    let config = SqlRequestConfig::default();
    let ctx = ExecContext::new(&session, &config);
    let backend = InMemoryBackend::new();
    let collab = Collaborators::from_backend(&backend);
    let mut view = view(&config);
    view.validate(&ctx).await.unwrap();

    let err = view.create_sql_view_and_model(&ctx, collab).await.unwrap_err();

    assert!(matches!(err, RequestError::ViewCreation { kind: "MATERIALIZED", .. }));
    assert_eq!(view.state(), RequestState::SqlValid);
    assert!(backend.models().is_empty());
    assert_eq!(backend.task_count(), 0);
}

#[tokio::test]
async fn failed_ui_creation_is_compensated() {
    let session = session();
    let config = SqlRequestConfig::default();
    let ctx = ExecContext::new(&session, &config);
    let backend = InMemoryBackend::new();
    let collab = Collaborators::from_backend(&backend);
    let mut view = view(&config);
    view.validate(&ctx).await.unwrap();
    view.create_sql_view_and_model(&ctx, collab).await.unwrap();
    backend.fail_on("create_menu");

    assert!(view.create_ui(collab, now()).await.is_err());

    assert_eq!(view.state(), RequestState::ModelValid);
    assert!(backend.views().is_empty());
    assert_eq!(backend.action_count(), 0);
    assert_eq!(view.artifacts().action, None);
}

#[tokio::test]
async fn transitions_require_the_previous_state() {
    let session = session();
    let config = SqlRequestConfig::default();
    let ctx = ExecContext::new(&session, &config);
    let backend = InMemoryBackend::new();
    let collab = Collaborators::from_backend(&backend);
    let mut view = view(&config);

    assert!(view.create_sql_view_and_model(&ctx, collab).await.unwrap_err().is_precondition());
    assert!(view.create_ui(collab, now()).await.unwrap_err().is_precondition());
    assert!(view
        .refresh_materialized_view(&session, collab, now())
        .await
        .unwrap_err()
        .is_precondition());

    view.validate(&ctx).await.unwrap();
    view.create_sql_view_and_model(&ctx, collab).await.unwrap();
    assert!(view.validate(&ctx).await.unwrap_err().is_precondition());
    assert!(view.set_materialized(false).is_err());
}

#[tokio::test]
async fn refresh_updates_size_and_action_name() {
    let session = session();
    let config = SqlRequestConfig::default();
    let ctx = ExecContext::new(&session, &config);
    let backend = InMemoryBackend::new();
    let collab = Collaborators::from_backend(&backend);
    let mut view = view(&config);
    view.validate(&ctx).await.unwrap();
    view.create_sql_view_and_model(&ctx, collab).await.unwrap();
    view.create_ui(collab, now()).await.unwrap();
    let later = Utc.with_ymd_and_hms(2024, 6, 30, 23, 59, 58).unwrap();

    view.refresh_materialized_view(&session, collab, later).await.unwrap();

    assert_eq!(session.count(r#"REFRESH MATERIALIZED VIEW "x_bi_sql_view_sales""#), 1);
    assert_eq!(view.size(), Some("16 kB"));
    let action = backend.action(view.artifacts().action.unwrap()).unwrap();
    assert_eq!(action.name, "Sales (06/30/2024 23:59:58 UTC)");
}

#[tokio::test]
async fn cron_refresh_filters_views() {
    let session = session();
    let config = SqlRequestConfig::default();
    let ctx = ExecContext::new(&session, &config);
    let backend = InMemoryBackend::new();
    let collab = Collaborators::from_backend(&backend);

    let mut built = view(&config);
    built.validate(&ctx).await.unwrap();
    built.create_sql_view_and_model(&ctx, collab).await.unwrap();
    let mut other = SqlView::new(8, "Other", "other", QUERY, &config).unwrap();
    other.validate(&ctx).await.unwrap();
    other.create_sql_view_and_model(&ctx, collab).await.unwrap();
    let draft = SqlView::new(9, "Draft", "draft", QUERY, &config).unwrap();
    let mut views = vec![built, other, draft];

    let refreshed = refresh_materialized_views(&mut views, &[7, 9], &session, collab, now())
        .await
        .unwrap();

    assert_eq!(refreshed, 1);
    assert_eq!(session.count("REFRESH MATERIALIZED VIEW"), 1);
}

#[tokio::test]
async fn menu_follows_sequence() {
    let session = session();
    let config = SqlRequestConfig::default();
    let ctx = ExecContext::new(&session, &config);
    let backend = InMemoryBackend::new();
    let collab = Collaborators::from_backend(&backend);
    let mut view = view(&config);
    view.set_sequence(3, collab).await.unwrap();
    view.validate(&ctx).await.unwrap();
    view.create_sql_view_and_model(&ctx, collab).await.unwrap();
    view.create_ui(collab, now()).await.unwrap();
    let menu = view.artifacts().menu.unwrap();
    assert_eq!(backend.menu(menu).unwrap().sequence, 3);

    view.set_sequence(12, collab).await.unwrap();

    assert_eq!(view.sequence(), 12);
    assert_eq!(backend.menu(menu).unwrap().sequence, 12);
}

#[tokio::test]
async fn access_is_resynced_after_group_change() {
    let session = session();
    let config = SqlRequestConfig::default();
    let ctx = ExecContext::new(&session, &config);
    let backend = InMemoryBackend::new();
    let collab = Collaborators::from_backend(&backend);
    let mut view = view(&config);
    view.validate(&ctx).await.unwrap();
    assert!(view.update_model_access(collab).await.unwrap_err().is_precondition());
    view.create_sql_view_and_model(&ctx, collab).await.unwrap();

    view.request_mut()
        .set_group_ids(["base.group_user", "account.group_account_manager"]);
    assert!(view.request().has_group_changed());
    view.update_model_access(collab).await.unwrap();

    assert!(!view.request().has_group_changed());
    let mut groups: Vec<_> = backend.access().into_iter().map(|a| a.group).collect();
    groups.sort();
    assert_eq!(groups, vec!["account.group_account_manager", "base.group_user"]);
}

#[tokio::test]
async fn field_edits_respect_invariants() {
    let session = session();
    let config = SqlRequestConfig::default();
    let ctx = ExecContext::new(&session, &config);
    let mut view = view(&config);
    view.validate(&ctx).await.unwrap();

    view.edit_field("x_a", |f| f.is_index = true).unwrap();
    assert!(view.set_materialized(false).unwrap_err().is_input_rejection());
    assert!(view.is_materialized());

    view.edit_field("x_a", |f| f.is_index = false).unwrap();
    view.set_materialized(false).unwrap();
    let err = view.edit_field("x_a", |f| f.is_index = true).unwrap_err();
    assert!(err.is_input_rejection());
    assert!(!view.field("x_a").unwrap().is_index);

    assert!(view.edit_field("x_b", |f| f.name = "x_c".into()).is_err());
    assert!(view.edit_field("x_missing", |_| {}).is_err());
    view.edit_field("x_b", |f| f.graph_type = Some(GraphType::Col)).unwrap();
    assert_eq!(view.field("x_b").unwrap().graph_type, Some(GraphType::Col));
}

#[test]
fn context_and_order_setters_reject_bad_input() {
    let config = SqlRequestConfig::default();
    let mut view = view(&config);
    assert!(view.set_view_order("pivot,calendar").is_err());
    assert_eq!(view.view_order().to_string(), "pivot,graph,list");
    assert!(view.set_action_context(r#"{"__import__": "os"}"#).is_err());
    view.set_action_context(r#"{"graph_mode": "line"}"#).unwrap();
    assert!(!view.action_context().is_empty());
}

#[test]
fn duplicate_is_a_fresh_draft() {
    let config = SqlRequestConfig::default();
    let mut original = view(&config);
    original.domain_force = "[('x_company_id', '=', 1)]".into();
    original.request_mut().set_state(RequestState::UiValid);

    let copy = original.duplicate(11, &config).unwrap();

    assert_eq!(copy.name(), "Sales (Copy)");
    assert_eq!(copy.technical_name(), "sales_copy");
    assert_eq!(copy.view_name(), "x_bi_sql_view_sales_copy");
    assert_eq!(copy.state(), RequestState::Draft);
    assert_eq!(copy.domain_force, original.domain_force);
    assert!(copy.fields().is_empty());
    assert_eq!(copy.artifacts(), &ViewArtifacts::default());
}

#[tokio::test]
async fn external_views_are_refused() {
    let session = session();
    let config = SqlRequestConfig::from_toml_str(
        r#"
external_db_name = "dwh"

[external_databases.dwh]
url = "postgres://localhost/dwh"
"#,
    )
    .unwrap();
    let ctx = ExecContext::new(&session, &config);
    let mut view = view(&config);
    view.request_mut().set_use_external_database(true, &config).unwrap();

    assert!(matches!(view.validate(&ctx).await.unwrap_err(), RequestError::Config(_)));
    assert!(session.statements().is_empty());
}

#[tokio::test]
async fn preview_shows_rows() {
    let session = session().on_query(
        "SELECT 1 AS x_a",
        rows(&["x_a", "x_b"], &[&[Some("1"), Some("x")]]),
    );
    let config = SqlRequestConfig::default();
    let ctx = ExecContext::new(&session, &config);
    let mut view = view(&config);

    let lines = view.preview(&ctx).await.unwrap();

    assert_eq!(lines, vec!["(1, x)"]);
}
