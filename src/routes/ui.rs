use axum::{
    extract::State,
    http::{header, HeaderMap},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Router,
};
use tracing::error;

use super::flash::{clear_cookie, Flash, FlashKind};
use crate::models::{AppState, JobFields, Posting, SubmitPostingForm};
use crate::types::AppError;

pub const SUBMITTED_NOTICE: &str = "Job posting added to queue. Please wait for processing.";
pub const EMPTY_NOTICE: &str = "Job posting cannot be empty.";
pub const SUBMIT_ERROR_NOTICE: &str = "An error occurred while adding the job posting.";

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/input", post(submit))
        .with_state(state)
}

async fn index(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let flash = state.flash.read(&headers);
    let (postings, warning) = state.intake().index().await;
    let page = Html(render_index(&postings, flash.as_ref(), warning.as_deref()));

    match flash {
        Some(_) => ([(header::SET_COOKIE, clear_cookie())], page).into_response(),
        None => page.into_response(),
    }
}

async fn submit(State(state): State<AppState>, Form(form): Form<SubmitPostingForm>) -> Response {
    let flash = match state.intake().submit(&form.job_posting).await {
        Ok(_) => Flash::info(SUBMITTED_NOTICE),
        Err(AppError::Validation(_)) => Flash::error(EMPTY_NOTICE),
        Err(_) => Flash::error(SUBMIT_ERROR_NOTICE),
    };

    let redirect = Redirect::to("/");
    match state.flash.cookie(&flash) {
        Ok(cookie) => ([(header::SET_COOKIE, cookie)], redirect).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to sign flash cookie");
            redirect.into_response()
        }
    }
}

pub fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

fn render_fields(fields: Option<&JobFields>) -> String {
    let Some(fields) = fields else {
        return String::new();
    };

    let mut out = String::from("<dl>");
    for (label, value) in fields.known() {
        if let Some(value) = value {
            out.push_str(&format!(
                "<dt>{}</dt><dd>{}</dd>",
                label,
                escape_html(value)
            ));
        }
    }
    for (label, value) in &fields.extra {
        let value = match value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        out.push_str(&format!(
            "<dt>{}</dt><dd>{}</dd>",
            escape_html(label),
            escape_html(&value)
        ));
    }
    out.push_str("</dl>");
    out
}

fn render_row(posting: &Posting) -> String {
    format!(
        r#"<tr id="posting-{id}"><td>{id}</td><td class="content">{content}</td><td class="status">{status}</td><td class="fields">{fields}</td></tr>"#,
        id = posting.id,
        content = escape_html(&posting.content),
        status = posting.status,
        fields = render_fields(posting.fields.as_ref()),
    )
}

pub fn render_index(postings: &[Posting], flash: Option<&Flash>, warning: Option<&str>) -> String {
    let mut notices = String::new();
    if let Some(flash) = flash {
        let class = match flash.kind {
            FlashKind::Info => "notice",
            FlashKind::Error => "notice error",
        };
        notices.push_str(&format!(
            r#"<p class="{}">{}</p>"#,
            class,
            escape_html(&flash.message)
        ));
    }
    if let Some(warning) = warning {
        notices.push_str(&format!(
            r#"<p class="notice error">{}</p>"#,
            escape_html(warning)
        ));
    }

    let rows: String = postings.iter().map(render_row).collect();

    format!(
        r#"<!doctype html>
<html lang="en">
<head>
  <meta charset="utf-8" />
  <meta name="viewport" content="width=device-width, initial-scale=1" />
  <title>Jobalizer</title>
  <style>
    body {{ font-family: Arial, sans-serif; margin: 2rem; color: #1d1d1f; }}
    textarea {{ width: 100%; min-height: 10rem; padding: 0.5rem; }}
    button {{ margin-top: 1rem; padding: 0.6rem 1rem; }}
    table {{ border-collapse: collapse; width: 100%; margin-top: 2rem; }}
    td, th {{ border: 1px solid #ddd; padding: 0.5rem; vertical-align: top; text-align: left; }}
    td.content {{ white-space: pre-wrap; max-width: 30rem; }}
    dt {{ font-weight: 600; }}
    .notice {{ padding: 0.75rem; border-radius: 6px; background: #eef6ee; }}
    .notice.error {{ background: #fbeaea; }}
  </style>
</head>
<body>
  <h1>Jobalizer</h1>
  {notices}
  <form method="post" action="/input">
    <textarea name="job_posting" placeholder="Paste a job posting"></textarea>
    <button type="submit">Submit</button>
  </form>

  <table>
    <thead><tr><th>ID</th><th>Content</th><th>Status</th><th>Fields</th></tr></thead>
    <tbody id="postings">{rows}</tbody>
  </table>

  <script>
    function renderFields(fields) {{
      const dl = document.createElement('dl');
      for (const [key, value] of Object.entries(fields || {{}})) {{
        const dt = document.createElement('dt');
        dt.textContent = key;
        const dd = document.createElement('dd');
        dd.textContent = typeof value === 'string' ? value : JSON.stringify(value);
        dl.append(dt, dd);
      }}
      return dl;
    }}

    function connect() {{
      const scheme = location.protocol === 'https:' ? 'wss' : 'ws';
      const socket = new WebSocket(`${{scheme}}://${{location.host}}/ws`);
      socket.addEventListener('message', (msg) => {{
        const {{ event, data }} = JSON.parse(msg.data);
        if (event !== 'job_processed') return;
        const row = document.getElementById(`posting-${{data.id}}`);
        if (!row) return;
        row.querySelector('.status').textContent = 'processed';
        row.querySelector('.fields').replaceChildren(renderFields(data.fields));
      }});
      socket.addEventListener('close', () => setTimeout(connect, 2000));
    }}
    connect();
  </script>
</body>
</html>
"#
    )
}
