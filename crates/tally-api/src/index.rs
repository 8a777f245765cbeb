//! HTML index of every stored metric.

use askama::Template;
use axum::extract::State;
use axum::response::Html;

use tally_core::Metric;

use crate::ApiState;

fn render<T: Template>(tmpl: T) -> Html<String> {
    Html(tmpl.render().unwrap_or_else(|e| {
        format!("<pre>Template error: {e}</pre>")
    }))
}

struct MetricRowView {
    id: String,
    kind: &'static str,
    value: String,
}

impl MetricRowView {
    fn from_metric(m: &Metric) -> Self {
        Self {
            id: m.id.clone(),
            kind: m.kind().as_str(),
            value: m.value.to_text(),
        }
    }
}

#[derive(Template)]
#[template(
    ext = "html",
    source = r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>tally metrics</title></head>
<body>
<h1>Metrics ({{ rows.len() }})</h1>
<table>
<tr><th>Name</th><th>Type</th><th>Value</th></tr>
{% for row in rows %}<tr><td>{{ row.id }}</td><td>{{ row.kind }}</td><td>{{ row.value }}</td></tr>
{% endfor %}</table>
</body>
</html>
"#
)]
struct IndexTemplate {
    rows: Vec<MetricRowView>,
}

/// GET /
pub async fn index(State(state): State<ApiState>) -> Html<String> {
    let rows = state
        .storage
        .list()
        .await
        .iter()
        .map(MetricRowView::from_metric)
        .collect();
    render(IndexTemplate { rows })
}
