//! HTTP request handlers.

use super::AppState;
use crate::db::{PreferencePatch, PreferenceStore, StatusStore};
use crate::health::{display_time, HealthState, ServiceId};
use crate::history::LogRecord;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Json, Redirect},
    Form,
};
use serde::{Deserialize, Serialize};

// ============================================================================
// Templates
// ============================================================================

const DASHBOARD_TEMPLATE: &str = include_str!("templates/dashboard.html");
const LAYOUT_TEMPLATE: &str = include_str!("templates/layout.html");

// ============================================================================
// Dashboard
// ============================================================================

pub async fn handle_dashboard(State(state): State<AppState>) -> impl IntoResponse {
    let preference = state.store.get_preference().unwrap_or_default();

    let mut panels = String::new();
    for service in ServiceId::ALL {
        let status = state.store.get_status(service).ok();
        let live = state.live.get(service);
        let records = state.history.history(service).snapshot().await;
        panels.push_str(&render_panel(service, status.as_ref(), live, &records));
    }

    let content = DASHBOARD_TEMPLATE
        .replace("{{email}}", &escape_html(&preference.address))
        .replace("{{toggle_checked}}", if preference.enabled { "checked" } else { "" })
        .replace("{{panels}}", &panels);

    let page = LAYOUT_TEMPLATE
        .replace("{{title}}", "Echo Server Monitor")
        .replace("{{content}}", &content);

    Html(page)
}

fn render_panel(
    service: ServiceId,
    status: Option<&HealthState>,
    live: Option<bool>,
    records: &[LogRecord],
) -> String {
    let (label, counters, since) = match status {
        Some(s) => (
            s.state.as_str(),
            format!("up {} / down {}", s.uptime_count, s.downtime_count),
            s.last_transition.map(display_time).unwrap_or_else(|| "-".to_string()),
        ),
        None => ("unknown", "-".to_string(), "-".to_string()),
    };
    let last_cycle = match live {
        Some(true) => "up",
        Some(false) => "down",
        None => "pending",
    };

    let rows: String = records
        .iter()
        .rev()
        .map(|r| {
            format!(
                "<tr class=\"{}\"><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
                if r.cloud_state { "up" } else { "down" },
                escape_html(&r.auth),
                escape_html(&r.sent),
                escape_html(&r.received),
                escape_html(&r.state),
                escape_html(r.threshold.as_deref().unwrap_or("")),
                escape_html(r.error.as_deref().unwrap_or("")),
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"<div class="panel">
    <h2>{service} echo server: <span class="{label}">{label}</span></h2>
    <p>Counters: {counters} &middot; Last transition: {since} &middot; Last cycle: {last_cycle} &middot; {count} records</p>
    <div class="scroll"><table>
        <tr><th>Auth</th><th>Sent</th><th>Received</th><th>State</th><th>Threshold</th><th>Error</th></tr>
        {rows}
    </table></div>
</div>
"#,
        service = service,
        label = label,
        counters = counters,
        since = escape_html(&since),
        last_cycle = last_cycle,
        count = records.len(),
        rows = rows,
    )
}

#[derive(Debug, Deserialize)]
pub struct OptInForm {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub toggle: Option<String>,
}

pub async fn handle_opt_in(State(state): State<AppState>, Form(form): Form<OptInForm>) -> impl IntoResponse {
    let email = form.email.trim();
    let patch = PreferencePatch {
        address: (!email.is_empty()).then(|| email.to_string()),
        enabled: Some(form.toggle.as_deref() == Some("on")),
    };

    match state.store.set_preference(&patch) {
        Ok(()) => {
            tracing::info!(enabled = ?patch.enabled, "Notification preference updated");
            Redirect::to("/").into_response()
        }
        Err(e) => {
            tracing::error!("Failed to update notification preference: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

// ============================================================================
// API
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ServiceStatus {
    pub service: ServiceId,
    /// Persisted state, `None` when the store could not be read.
    pub health: Option<HealthState>,
    /// Result of the latest cycle, `None` before the first one.
    pub up: Option<bool>,
    pub last_record: Option<LogRecord>,
}

pub async fn handle_get_status(State(state): State<AppState>) -> impl IntoResponse {
    let mut statuses = Vec::with_capacity(ServiceId::ALL.len());
    for service in ServiceId::ALL {
        statuses.push(ServiceStatus {
            service,
            health: state.store.get_status(service).ok(),
            up: state.live.get(service),
            last_record: state.history.history(service).latest().await,
        });
    }

    Json(statuses)
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub service: ServiceId,
}

pub async fn handle_get_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> impl IntoResponse {
    Json(state.history.history(query.service).snapshot().await)
}

// ============================================================================
// Static Assets
// ============================================================================

pub async fn handle_favicon() -> impl IntoResponse {
    let svg = r##"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 100 100">
        <circle cx="50" cy="50" r="45" fill="#2e7d32"/>
        <path d="M20 50 H38 L45 30 L55 70 L62 50 H80" stroke="white" stroke-width="6" fill="none"/>
    </svg>"##;

    ([(axum::http::header::CONTENT_TYPE, "image/svg+xml")], svg)
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Store;
    use crate::health::Health;
    use crate::history::HistoryBook;
    use crate::probe::ProbeResult;
    use crate::web::{routes, LiveStatus};
    use std::sync::Arc;
    use tempfile::NamedTempFile;
    use tokio::net::TcpListener;

    async fn spawn_app() -> (NamedTempFile, AppState, String) {
        let tmp = NamedTempFile::new().unwrap();
        let store = Arc::new(Store::new(tmp.path()).unwrap());
        for service in ServiceId::ALL {
            store.seed_status(service, Health::Healthy).unwrap();
        }
        let state = AppState {
            store,
            history: Arc::new(HistoryBook::new(10)),
            live: Arc::new(LiveStatus::default()),
        };

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let router = routes(state.clone());
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        (tmp, state, format!("http://{}", addr))
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html("<b>\"a\" & 'b'</b>"), "&lt;b&gt;&quot;a&quot; &amp; &#39;b&#39;&lt;/b&gt;");
    }

    #[test]
    fn test_render_panel_escapes_received_text() {
        let mut r = ProbeResult::new(ServiceId::Tcp);
        r.received = Some("<script>".to_string());
        let record = LogRecord::from_cycle(&r, None, None);

        let html = render_panel(ServiceId::Tcp, None, Some(false), &[record]);

        assert!(html.contains("&lt;script&gt;"));
        assert!(!html.contains("<script>"));
        assert!(html.contains("class=\"unknown\""));
    }

    #[tokio::test]
    async fn test_opt_in_form_updates_preference() {
        let (_tmp, state, base) = spawn_app().await;
        let client = reqwest::Client::new();

        let response = client
            .post(format!("{}/", base))
            .form(&[("email", "ops@example.com"), ("toggle", "on")])
            .send()
            .await
            .unwrap();
        assert!(response.status().is_success());

        let pref = state.store.get_preference().unwrap();
        assert_eq!(pref.address, "ops@example.com");
        assert!(pref.enabled);

        let page = reqwest::get(format!("{}/", base)).await.unwrap().text().await.unwrap();
        assert!(page.contains("value=\"ops@example.com\""));
        assert!(page.contains("checked"));
        assert!(page.contains("tcp echo server"));

        // Unchecked box turns alerts off but keeps the address.
        client
            .post(format!("{}/", base))
            .form(&[("email", "")])
            .send()
            .await
            .unwrap();
        let pref = state.store.get_preference().unwrap();
        assert_eq!(pref.address, "ops@example.com");
        assert!(!pref.enabled);
    }

    #[tokio::test]
    async fn test_status_and_history_api() {
        let (_tmp, state, base) = spawn_app().await;
        let mut r = ProbeResult::new(ServiceId::Http);
        r.up = true;
        state.history.record(&r, None, None).await;
        state.live.set(ServiceId::Http, true);

        let statuses: serde_json::Value = reqwest::get(format!("{}/api/status", base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(statuses[0]["service"], "tcp");
        assert_eq!(statuses[0]["health"]["state"], "healthy");
        assert_eq!(statuses[0]["up"], serde_json::Value::Null);
        assert_eq!(statuses[1]["up"], true);
        assert_eq!(statuses[1]["last_record"]["cloud_state"], true);

        let history: Vec<serde_json::Value> = reqwest::get(format!("{}/api/history?service=http", base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0]["cloud_state"], true);

        let bad = reqwest::get(format!("{}/api/history?service=udp", base)).await.unwrap();
        assert_eq!(bad.status(), reqwest::StatusCode::BAD_REQUEST);
    }
}
