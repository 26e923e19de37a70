use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::pathspec::{self, FileKind};

/// Header of the stored envelope. `wrap` emits exactly this; `unwrap`
/// additionally accepts whitespace variations via [`header_re`].
const HEADER: &str = "__defineModule__(function _main(module, exports, require) {\n";
const HOIST_BEGIN: &str = "// ===== HOISTED CUSTOM FUNCTIONS =====\n";
const HOIST_END: &str = "// ===== END HOISTED CUSTOM FUNCTIONS =====\n";
const EVENTS_PREFIX: &str = "var __events__ = ";

/// Options that ride along with the wrapper and must survive every edit path
/// that funnels through unwrap/rewrap.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load_now: Option<bool>,
    /// Top-level functions (custom functions, triggers) kept outside the
    /// module closure in a marker-delimited block.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hoisted_functions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub events: Option<Vec<String>>,
}

impl ModuleOptions {
    pub fn is_empty(&self) -> bool {
        self.load_now.is_none() && self.hoisted_functions.is_none() && self.events.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unwrapped {
    pub inner: String,
    pub options: ModuleOptions,
    /// False when the content carried no wrapper and was returned verbatim.
    pub was_wrapped: bool,
}

fn header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^__defineModule__\(\s*function\s+_main\s*\(\s*module\s*,\s*exports\s*,\s*require\s*\)\s*\{\n?",
        )
        .expect("wrapper header regex")
    })
}

/// Only user SERVER_JS code is wrapped; the manifest never is.
pub fn should_wrap(kind: FileKind, filename: &str) -> bool {
    kind == FileKind::ServerJs && !pathspec::is_manifest(filename)
}

/// Apply the CommonJS envelope around `inner`.
pub fn wrap(inner: &str, _filename: &str, options: &ModuleOptions) -> String {
    let mut out = String::with_capacity(inner.len() + 128);
    out.push_str(HEADER);
    out.push_str(inner);
    out.push_str("\n}");
    if let Some(load_now) = options.load_now {
        out.push_str(if load_now { ", true" } else { ", false" });
    }
    out.push_str(");\n");
    if let Some(hoisted) = &options.hoisted_functions {
        out.push('\n');
        out.push_str(HOIST_BEGIN);
        out.push_str(hoisted);
        out.push('\n');
        out.push_str(HOIST_END);
    }
    if let Some(events) = &options.events {
        out.push('\n');
        out.push_str(EVENTS_PREFIX);
        out.push_str(&serde_json::to_string(events).unwrap_or_else(|_| "[]".into()));
        out.push_str(";\n");
    }
    out
}

/// Recover the user-editable body. Content without a recognizable wrapper is
/// returned as-is with `was_wrapped == false`.
pub fn unwrap(content: &str) -> Unwrapped {
    let mut tail = content;
    let mut options = ModuleOptions::default();

    // Trailing __events__ line.
    if let Some(idx) = tail.rfind(&format!("\n{EVENTS_PREFIX}")) {
        let seg = &tail[idx + 1 + EVENTS_PREFIX.len()..];
        let json_part = seg
            .strip_suffix(";\n")
            .or_else(|| seg.strip_suffix(';'))
            .unwrap_or("");
        if let Ok(list) = serde_json::from_str::<Vec<String>>(json_part) {
            options.events = Some(list);
            tail = &tail[..idx];
        }
    }

    // Trailing hoisted-functions block.
    if tail.ends_with(HOIST_END) || tail.ends_with(HOIST_END.trim_end()) {
        if let Some(idx) = tail.rfind(&format!("\n{HOIST_BEGIN}")) {
            let body_start = idx + 1 + HOIST_BEGIN.len();
            let body_end = tail.rfind(HOIST_END.trim_end()).unwrap_or(tail.len());
            if body_start <= body_end {
                let body = &tail[body_start..body_end];
                let body = body.strip_suffix('\n').unwrap_or(body);
                options.hoisted_functions = Some(body.to_string());
                tail = &tail[..idx];
            }
        }
    }

    let Some(m) = header_re().find(tail) else {
        return Unwrapped {
            inner: content.to_string(),
            options: ModuleOptions::default(),
            was_wrapped: false,
        };
    };
    let body = &tail[m.end()..];
    let body = body.trim_end();
    let Some(body) = body.strip_suffix(");") else {
        return Unwrapped {
            inner: content.to_string(),
            options: ModuleOptions::default(),
            was_wrapped: false,
        };
    };
    let (body, load_now) = if let Some(b) = body.strip_suffix(", true") {
        (b, Some(true))
    } else if let Some(b) = body.strip_suffix(", false") {
        (b, Some(false))
    } else {
        (body, None)
    };
    options.load_now = load_now;
    let Some(body) = body.strip_suffix('}') else {
        return Unwrapped {
            inner: content.to_string(),
            options: ModuleOptions::default(),
            was_wrapped: false,
        };
    };
    let inner = body.strip_suffix('\n').unwrap_or(body);
    Unwrapped {
        inner: inner.to_string(),
        options,
        was_wrapped: true,
    }
}

/// Static-scan statistics over an unwrapped body, for tooling.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommonJsUsage {
    pub require_calls: Vec<String>,
    pub module_exports: bool,
    pub exports_usage: Vec<String>,
}

pub fn analyze_commonjs_usage(inner: &str) -> CommonJsUsage {
    static REQUIRE_RE: OnceLock<Regex> = OnceLock::new();
    static EXPORTS_RE: OnceLock<Regex> = OnceLock::new();
    static MODULE_EXPORTS_RE: OnceLock<Regex> = OnceLock::new();
    let require_re = REQUIRE_RE
        .get_or_init(|| Regex::new(r#"\brequire\(\s*['"]([^'"]+)['"]\s*\)"#).expect("require re"));
    let exports_re = EXPORTS_RE
        .get_or_init(|| Regex::new(r"\bexports\.([A-Za-z_$][\w$]*)\s*=").expect("exports re"));
    let module_exports_re =
        MODULE_EXPORTS_RE.get_or_init(|| Regex::new(r"\bmodule\.exports\b").expect("mod re"));

    let mut require_calls = Vec::new();
    for cap in require_re.captures_iter(inner) {
        let name = cap[1].to_string();
        if !require_calls.contains(&name) {
            require_calls.push(name);
        }
    }
    let mut exports_usage = Vec::new();
    for cap in exports_re.captures_iter(inner) {
        let name = cap[1].to_string();
        if !exports_usage.contains(&name) {
            exports_usage.push(name);
        }
    }
    CommonJsUsage {
        require_calls,
        module_exports: module_exports_re.is_match(inner),
        exports_usage,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_plain() {
        let inner = "function hello() {\n  return 1;\n}";
        let stored = wrap(inner, "Util", &ModuleOptions::default());
        let back = unwrap(&stored);
        assert!(back.was_wrapped);
        assert_eq!(back.inner, inner);
        assert_eq!(back.options, ModuleOptions::default());
    }

    #[test]
    fn round_trip_all_options() {
        let inner = "const x = require('lib/a');\nexports.run = () => x;";
        let options = ModuleOptions {
            load_now: Some(true),
            hoisted_functions: Some(
                "function DOUBLE(n) {\n  return require('Util').double(n);\n}".to_string(),
            ),
            events: Some(vec!["onOpen".to_string(), "onEdit".to_string()]),
        };
        let stored = wrap(inner, "Util", &options);
        let back = unwrap(&stored);
        assert!(back.was_wrapped);
        assert_eq!(back.inner, inner);
        assert_eq!(back.options, options);
    }

    #[test]
    fn unwrapped_content_passes_through() {
        let raw = "function plain() {}\n";
        let back = unwrap(raw);
        assert!(!back.was_wrapped);
        assert_eq!(back.inner, raw);
    }

    #[test]
    fn tolerates_header_whitespace_variants() {
        let stored = "__defineModule__( function _main( module, exports, require ) {\nvar a = 1;\n});";
        let back = unwrap(stored);
        assert!(back.was_wrapped);
        assert_eq!(back.inner, "var a = 1;");
    }

    #[test]
    fn should_wrap_only_user_server_js() {
        assert!(should_wrap(FileKind::ServerJs, "Util"));
        assert!(!should_wrap(FileKind::ServerJs, "appsscript"));
        assert!(!should_wrap(FileKind::Html, "index"));
        assert!(!should_wrap(FileKind::Json, "data"));
    }

    #[test]
    fn usage_scan() {
        let usage = analyze_commonjs_usage(
            "const a = require('A');\nconst b = require('B');\nconst a2 = require('A');\nexports.one = 1;\nmodule.exports = {};",
        );
        assert_eq!(usage.require_calls, vec!["A", "B"]);
        assert!(usage.module_exports);
        assert_eq!(usage.exports_usage, vec!["one"]);
    }
}
