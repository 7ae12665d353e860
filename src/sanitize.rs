//! Strict HTML sanitization for `dom.set`/`dom.replace`/`dom.append` payloads.
//!
//! Scripts, inline event handlers, and `javascript:`/`data:text/html` URLs are
//! the injection vectors that matter here: agent-authored HTML lands directly
//! in a live window's DOM, so anything that can execute script is stripped
//! rather than escaped.

use ammonia::Builder;
use once_cell::sync::Lazy;

static ALLOWED_ATTRIBUTES: &[&str] = &[
    "id", "class", "style", "href", "src", "alt", "title", "type", "name", "value",
    "placeholder", "for", "colspan", "rowspan", "target", "rel", "disabled", "checked",
    "selected", "min", "max", "step", "width", "height", "aria-label", "data-uicp-bind",
];

static ALLOWED_FORM_TAGS: &[&str] = &[
    "textarea", "input", "button", "label", "select", "option", "form",
];

fn build_cleaner() -> Builder<'static> {
    let mut builder = Builder::default();
    builder
        .rm_tags(["script", "style", "iframe", "object", "embed"])
        .add_tags(ALLOWED_FORM_TAGS.iter().copied())
        .rm_tag_attributes("*", ["on*"].as_slice())
        .generic_attributes(ALLOWED_ATTRIBUTES.iter().copied())
        .url_schemes(["http", "https", "mailto"].into_iter().collect());
    builder
}

static CLEANER: Lazy<Builder<'static>> = Lazy::new(build_cleaner);

/// Strip disallowed tags/attributes/URL schemes from `html`, returning the
/// cleaned markup. Idempotent: sanitizing already-clean output is a no-op.
pub fn sanitize_html_strict(html: &str) -> String {
    CLEANER.clean(html).to_string()
}

/// Report whether `html` would be altered by sanitization, without paying for
/// the full clean when the caller just wants a gate check.
pub fn contains_disallowed_content(html: &str) -> bool {
    let cleaned = sanitize_html_strict(html);
    cleaned != html
}
