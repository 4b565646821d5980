//! Preview composition.
//!
//! Generated markup is untrusted. It is only ever shown inside a sandboxed
//! iframe via an escaped `srcdoc` attribute, never inlined into the host page.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

pub const TAILWIND_CDN: &str = "https://cdn.tailwindcss.com";

/// Scripts must run for the generated app to work; same-origin lets it
/// use storage APIs.
pub const IFRAME_SANDBOX: &str = "allow-scripts allow-same-origin";

pub const NO_PREVIEW_MESSAGE: &str = "No preview available";
pub const LOADING_MESSAGE: &str = "Generating preview…";

/// How a preview payload is going to be rendered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(tag = "mode", content = "html", rename_all = "lowercase")]
#[ts(export)]
pub enum PreviewRender {
    /// Payload is already a complete HTML document.
    Document(String),
    /// Bare fragment, wrapped in the shell before display.
    Fragment(String),
    /// A turn is still streaming and nothing is renderable yet.
    Loading,
    /// Nothing to show.
    Empty,
}

impl PreviewRender {
    pub fn mode(&self) -> &'static str {
        match self {
            PreviewRender::Document(_) => "document",
            PreviewRender::Fragment(_) => "fragment",
            PreviewRender::Loading => "loading",
            PreviewRender::Empty => "empty",
        }
    }
}

/// Decide how to render `payload`. A pending turn with no payload is
/// `Loading`; a finished turn with no payload is `Empty`.
pub fn classify(payload: Option<&str>, loading: bool) -> PreviewRender {
    match payload.map(str::trim).filter(|p| !p.is_empty()) {
        Some(html) if is_full_document(html) => PreviewRender::Document(html.to_string()),
        Some(html) => PreviewRender::Fragment(html.to_string()),
        None if loading => PreviewRender::Loading,
        None => PreviewRender::Empty,
    }
}

pub fn is_full_document(html: &str) -> bool {
    let lower = html.to_ascii_lowercase();
    lower.contains("<!doctype html") || lower.contains("<html")
}

/// Complete document for a render, or `None` for the placeholder states.
pub fn compose_document(render: &PreviewRender) -> Option<String> {
    match render {
        PreviewRender::Document(html) => Some(html.clone()),
        PreviewRender::Fragment(fragment) => Some(wrap_fragment(fragment)),
        PreviewRender::Loading | PreviewRender::Empty => None,
    }
}

fn wrap_fragment(fragment: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="UTF-8" />
  <meta name="viewport" content="width=device-width, initial-scale=1.0" />
  <title>Preview</title>
  <script src="{cdn}"></script>
</head>
<body>
{fragment}
</body>
</html>
"#,
        cdn = TAILWIND_CDN,
        fragment = fragment,
    )
}

/// Host-safe markup for a render: a sandboxed iframe or a placeholder.
pub fn render_frame(render: &PreviewRender) -> String {
    match compose_document(render) {
        Some(document) => format!(
            r#"<iframe class="preview-frame" title="Preview" sandbox="{}" srcdoc="{}"></iframe>"#,
            IFRAME_SANDBOX,
            ammonia::clean_text(&document),
        ),
        None if *render == PreviewRender::Loading => placeholder("loading", LOADING_MESSAGE),
        None => placeholder("empty", NO_PREVIEW_MESSAGE),
    }
}

fn placeholder(state: &str, message: &str) -> String {
    format!(
        r#"<div class="preview-placeholder" data-state="{}">{}</div>"#,
        state, message
    )
}

/// Standalone host page embedding the preview of a saved project.
pub fn host_page(title: &str, render: &PreviewRender) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="UTF-8" />
  <title>{title}</title>
  <style>
    html, body {{ margin: 0; height: 100%; }}
    .preview-frame {{ border: 0; width: 100%; height: 100%; }}
    .preview-placeholder {{ display: flex; height: 100%; align-items: center; justify-content: center; font-family: system-ui, sans-serif; color: #6B7280; }}
  </style>
</head>
<body>
{frame}
</body>
</html>
"#,
        title = ammonia::clean_text(title),
        frame = render_frame(render),
    )
}
